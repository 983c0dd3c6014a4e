use glob::glob;
use log::{debug, info, warn};
use polars::prelude::*;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::data_models::{FileFormat, ReducedRecord, ReducedSeries, Unit};
use crate::errors::{valid_years, PipelineError, Result};
use crate::interval::Interval;
use crate::io;
use crate::metrics::METRICS;
use crate::reducer::{FileCounts, IntervalReducer};

/// Outcome of reducing and saving one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Saved {
        path: PathBuf,
        rows: usize,
        files: FileCounts,
    },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct ReductionReport {
    pub year: i32,
    pub units: Vec<(Unit, UnitOutcome)>,
}

impl ReductionReport {
    pub fn saved(&self) -> usize {
        self.units
            .iter()
            .filter(|(_, o)| matches!(o, UnitOutcome::Saved { .. }))
            .count()
    }

    /// Units saved from only some of their raw files.
    pub fn partial(&self) -> usize {
        self.units
            .iter()
            .filter(|(_, o)| matches!(o, UnitOutcome::Saved { files, .. } if files.is_partial()))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.units
            .iter()
            .filter(|(_, o)| matches!(o, UnitOutcome::Failed { .. }))
            .count()
    }
}

/// Reduced tables laid out as `<interval>/<unit>/<year>_<unit>.<ext>`.
pub struct ProfileStore<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ProfileStore<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn unit_dir(&self, unit: Unit, interval: Interval) -> PathBuf {
        self.config
            .resampled_dir
            .join(interval.dir_name())
            .join(unit.as_str())
    }

    pub fn table_path(&self, year: i32, unit: Unit, interval: Interval, format: FileFormat) -> PathBuf {
        self.unit_dir(unit, interval)
            .join(format!("{}_{}.{}", year, unit, format.extension()))
    }

    pub fn save(&self, series: &ReducedSeries, format: FileFormat) -> Result<PathBuf> {
        let path = self.table_path(series.year, series.unit, series.interval, format);
        match format {
            FileFormat::Parquet => {
                let mut df = reduced_to_dataframe(&series.records)?;
                io::write_parquet(&mut df, &path)?;
            }
            FileFormat::Csv => io::write_records_csv(&series.records, &path)?,
        }
        METRICS.lock().record_table_written();
        info!("Saved {} rows to {}", series.len(), path.display());
        Ok(path)
    }

    /// Persisted tables for (year, unit, interval), preferred format first.
    pub fn find(&self, year: i32, unit: Unit, interval: Interval) -> Result<Vec<PathBuf>> {
        let dir = self.unit_dir(unit, interval);
        let pattern = format!("{}/{}_*", glob::Pattern::escape(&dir.to_string_lossy()), year);
        let preferred = self.config.default_format;
        let mut found: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| PipelineError::SchemaMismatch {
                path: dir.clone(),
                message: e.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .and_then(FileFormat::from_extension)
                    .is_some()
            })
            .collect();
        found.sort_by_key(|p| {
            let is_preferred = p.extension().and_then(|e| e.to_str()) == Some(preferred.extension());
            (!is_preferred, p.clone())
        });
        Ok(found)
    }

    /// Loads a reduced table, reducing and saving it first when it is not on disk.
    pub fn load(&self, year: i32, unit: Unit, interval: Interval) -> Result<ReducedSeries> {
        valid_years(&[year])?;
        if let Some(path) = self.find(year, unit, interval)?.into_iter().next() {
            debug!("Loading reduced {} {} from {}", unit, year, path.display());
            return read_reduced(&path, year, unit, interval);
        }

        info!(
            "No reduced {} table for {} at {}; reducing from raw profiles",
            unit, year, interval
        );
        let series = IntervalReducer::new(self.config).reduce(year, unit, interval)?;
        self.save(&series, self.config.default_format)?;
        Ok(series)
    }

    /// Reduces and saves every unit for the year. Units without data are skipped.
    pub fn save_reduced_profiles(
        &self,
        year: i32,
        interval: Interval,
        format: FileFormat,
    ) -> Result<ReductionReport> {
        valid_years(&[year])?;
        let reducer = IntervalReducer::new(self.config);
        let mut report = ReductionReport {
            year,
            units: Vec::with_capacity(Unit::ALL.len()),
        };

        for unit in Unit::ALL {
            let outcome = match reducer
                .reduce_counted(year, unit, interval)
                .and_then(|(series, files)| {
                    self.save(&series, format).map(|p| (p, series.len(), files))
                }) {
                Ok((path, rows, files)) => UnitOutcome::Saved { path, rows, files },
                Err(e @ PipelineError::InvalidInput(_)) => return Err(e),
                Err(e) if e.is_soft() => {
                    warn!("Skipping {} {}: {}", unit, year, e);
                    UnitOutcome::Skipped {
                        reason: e.to_string(),
                    }
                }
                Err(e) => {
                    warn!("Failed to reduce {} {}: {}", unit, year, e);
                    METRICS.lock().record_unit_failed();
                    UnitOutcome::Failed {
                        reason: e.to_string(),
                    }
                }
            };
            report.units.push((unit, outcome));
        }
        Ok(report)
    }
}

pub fn reduced_to_dataframe(records: &[ReducedRecord]) -> Result<DataFrame> {
    let recorder: Vec<&str> = records.iter().map(|r| r.recorder_id.as_str()).collect();
    let profile: Vec<i64> = records.iter().map(|r| r.profile_id).collect();
    let dates: Vec<_> = records.iter().map(|r| r.datefield).collect();
    let units: Vec<f64> = records.iter().map(|r| r.unitsread).collect();
    let valid: Vec<i64> = records.iter().map(|r| i64::from(r.valid)).collect();
    let valid_count: Vec<i64> = records.iter().map(|r| i64::from(r.valid_count)).collect();
    let count: Vec<i64> = records.iter().map(|r| i64::from(r.count)).collect();

    Ok(DataFrame::new(vec![
        Series::new("RecorderID".into(), recorder).into(),
        Series::new("ProfileID".into(), profile).into(),
        io::datetime_series("Datefield", &dates)?.into(),
        Series::new("Unitsread".into(), units).into(),
        Series::new("Valid".into(), valid).into(),
        Series::new("ValidCount".into(), valid_count).into(),
        Series::new("Count".into(), count).into(),
    ])?)
}

fn reduced_from_dataframe(df: &DataFrame, path: &Path) -> Result<Vec<ReducedRecord>> {
    for required in ["RecorderID", "ProfileID", "Datefield", "Unitsread", "Valid"] {
        if !io::has_column(df, required) {
            return Err(PipelineError::SchemaMismatch {
                path: path.to_path_buf(),
                message: format!("missing column {required}"),
            });
        }
    }
    let recorder = io::str_column(df, "RecorderID")?;
    let profile = io::i64_column(df, "ProfileID")?;
    let dates = io::datetime_column(df, "Datefield")?;
    let units = io::f64_column(df, "Unitsread")?;
    let valid = io::i64_column(df, "Valid")?;
    let valid_count = if io::has_column(df, "ValidCount") {
        io::i64_column(df, "ValidCount")?
    } else {
        vec![None; df.height()]
    };
    let count = if io::has_column(df, "Count") {
        io::i64_column(df, "Count")?
    } else {
        vec![None; df.height()]
    };

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(profile_id), Some(datefield)) = (profile[i], dates[i]) else {
            continue;
        };
        records.push(ReducedRecord {
            recorder_id: recorder[i].clone().unwrap_or_default(),
            profile_id,
            datefield,
            unitsread: units[i].unwrap_or(f64::NAN),
            valid: u8::from(valid[i] == Some(1)),
            valid_count: valid_count[i].and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
            count: count[i].and_then(|v| u32::try_from(v).ok()).unwrap_or(0),
        });
    }
    Ok(records)
}

/// Reads a persisted reduced table and drops duplicate rows.
pub fn read_reduced(path: &Path, year: i32, unit: Unit, interval: Interval) -> Result<ReducedSeries> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FileFormat::from_extension)
        .ok_or_else(|| PipelineError::SchemaMismatch {
            path: path.to_path_buf(),
            message: "unrecognised table extension".to_string(),
        })?;
    let records = match format {
        FileFormat::Parquet => reduced_from_dataframe(&io::read_parquet(path)?, path)?,
        FileFormat::Csv => io::read_records_csv(path)?,
    };
    let before = records.len();
    let mut series = ReducedSeries {
        year,
        unit,
        interval,
        records,
    };
    series.normalize();
    if series.len() < before {
        warn!(
            "Dropped {} duplicate rows from {}",
            before - series.len(),
            path.display()
        );
    }
    Ok(series)
}
