use chrono::NaiveDateTime;
use log::{error, info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::data_models::{Reading, ReducedRecord, ReducedSeries, Unit};
use crate::errors::{valid_years, PipelineError, Result};
use crate::interval::Interval;
use crate::metrics::METRICS;
use crate::raw_reader::{read_raw_file, RawReader};
use crate::validity::clamp_bin_validity;

type BinKey = (String, i64, NaiveDateTime);

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct BinAccumulator {
    sum: f64,
    values: u32,
    valid_count: u32,
    count: u32,
}

impl BinAccumulator {
    fn push(&mut self, value: f64, valid: u8) {
        self.count += 1;
        if valid == 1 {
            self.valid_count += 1;
        }
        if !value.is_nan() {
            self.sum += value;
            self.values += 1;
        }
    }

    fn merge(&mut self, other: &BinAccumulator) {
        self.sum += other.sum;
        self.values += other.values;
        self.valid_count += other.valid_count;
        self.count += other.count;
    }
}

/// Bin accumulators for a subset of the raw files of one (year, unit).
///
/// Partials merge associatively, so files can be reduced independently and combined.
#[derive(Debug, Default)]
pub struct PartialReduction {
    bins: BTreeMap<BinKey, BinAccumulator>,
}

impl PartialReduction {
    pub fn from_readings(readings: &[Reading], interval: Interval) -> Self {
        let mut partial = Self::default();
        for reading in readings {
            partial.add(reading, interval);
        }
        partial
    }

    pub fn add(&mut self, reading: &Reading, interval: Interval) {
        let Some(label) = interval.bin_label(reading.datefield) else {
            return;
        };
        self.bins
            .entry((reading.recorder_id.clone(), reading.profile_id, label))
            .or_default()
            .push(reading.unitsread, reading.valid);
    }

    pub fn merge(mut self, other: PartialReduction) -> Self {
        let (mut big, small) = if self.bins.len() >= other.bins.len() {
            (std::mem::take(&mut self.bins), other.bins)
        } else {
            (other.bins, std::mem::take(&mut self.bins))
        };
        for (key, acc) in small {
            big.entry(key).or_default().merge(&acc);
        }
        PartialReduction { bins: big }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Emits one record per bin that has at least one non-NaN value, in key order.
    pub fn finish(self) -> Vec<ReducedRecord> {
        self.bins
            .into_iter()
            .filter(|(_, acc)| acc.values > 0)
            .map(|((recorder_id, profile_id, datefield), acc)| ReducedRecord {
                recorder_id,
                profile_id,
                datefield,
                unitsread: acc.sum / f64::from(acc.values),
                valid: clamp_bin_validity(acc.valid_count, acc.count),
                valid_count: acc.valid_count,
                count: acc.count,
            })
            .collect()
    }
}

/// Resamples readings to `interval` without touching disk.
pub fn reduce_readings(readings: &[Reading], interval: Interval) -> Vec<ReducedRecord> {
    PartialReduction::from_readings(readings, interval).finish()
}

/// Raw files that contributed to a reduction, and those skipped as unreadable.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileCounts {
    pub files_read: usize,
    pub files_skipped: usize,
}

impl FileCounts {
    pub fn is_partial(&self) -> bool {
        self.files_skipped > 0
    }
}

struct FileReduction {
    path: PathBuf,
    partial: PartialReduction,
    error: Option<String>,
}

pub struct IntervalReducer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> IntervalReducer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    /// Reduces every raw file of (year, unit) to `interval`.
    pub fn reduce(&self, year: i32, unit: Unit, interval: Interval) -> Result<ReducedSeries> {
        self.reduce_counted(year, unit, interval).map(|(series, _)| series)
    }

    /// Like `reduce`, also returning how many raw files were read and skipped.
    ///
    /// Files are reduced in parallel on a pool of `config.workers` threads and
    /// merged. A year with no usable readings is `MissingData`.
    pub fn reduce_counted(
        &self,
        year: i32,
        unit: Unit,
        interval: Interval,
    ) -> Result<(ReducedSeries, FileCounts)> {
        valid_years(&[year])?;
        let start = Instant::now();
        let files = RawReader::new(self.config).list_files(year, unit, None)?;
        if files.is_empty() {
            return Err(PipelineError::missing_unit(year, unit, "raw profiles"));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()?;

        let results: Vec<FileReduction> = pool.install(|| {
            files
                .into_par_iter()
                .map(|path| match read_raw_file(&path) {
                    Ok(parsed) => FileReduction {
                        partial: PartialReduction::from_readings(&parsed.readings, interval),
                        path,
                        error: None,
                    },
                    Err(e) => {
                        error!("Failed to reduce {}: {}", path.display(), e);
                        FileReduction {
                            path,
                            partial: PartialReduction::default(),
                            error: Some(e.to_string()),
                        }
                    }
                })
                .collect()
        });

        let mut merged = PartialReduction::default();
        let mut counts = FileCounts::default();
        for result in results {
            match result.error {
                None => {
                    counts.files_read += 1;
                    merged = merged.merge(result.partial);
                }
                Some(e) => {
                    counts.files_skipped += 1;
                    warn!("Skipped {} for {} {}: {}", result.path.display(), unit, year, e);
                    METRICS.lock().record_file_skipped();
                }
            }
        }

        let records = merged.finish();
        if records.is_empty() {
            return Err(PipelineError::missing_unit(year, unit, "usable readings"));
        }

        let mut series = ReducedSeries {
            year,
            unit,
            interval,
            records,
        };
        series.normalize();
        info!(
            "Reduced {} {} to {} bins at {} from {} files ({} skipped) in {:.2?}",
            unit,
            year,
            series.len(),
            interval,
            counts.files_read,
            counts.files_skipped,
            start.elapsed()
        );
        METRICS.lock().record_bins(series.len() as u64);
        Ok((series, counts))
    }
}
