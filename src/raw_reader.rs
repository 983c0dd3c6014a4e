use chrono::{Duration, NaiveDateTime, Timelike};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::data_models::{
    datefield_format, deserialize_float_or_nan, parse_whole_number, FileFormat, Reading, Unit,
};
use crate::errors::{valid_years, InputError, PipelineError, Result};
use crate::io;
use crate::metrics::METRICS;
use crate::validity::normalize_validity;

const RAW_FILE_PATTERN: &str = r"^(?P<year>\d{4})-(?P<month>\d{1,2})(?:_.*)?\.(?P<ext>csv|parquet)$";

fn raw_file_regex() -> Result<Regex> {
    Ok(Regex::new(RAW_FILE_PATTERN)?)
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "RecorderID")]
    recorder_id: String,
    #[serde(rename = "ProfileID")]
    profile_id: String,
    #[serde(rename = "Datefield")]
    datefield: String,
    #[serde(rename = "Unitsread", default, deserialize_with = "deserialize_float_or_nan")]
    unitsread: f64,
    #[serde(rename = "Valid", default)]
    valid: Option<String>,
}

/// Readings for one (year, unit[, month]) plus which files contributed.
#[derive(Debug, Default)]
pub struct RawLoad {
    pub readings: Vec<Reading>,
    pub files_read: Vec<PathBuf>,
    pub files_skipped: Vec<PathBuf>,
    pub rows_dropped: usize,
}

impl RawLoad {
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Readings parsed from a single raw file.
#[derive(Debug, Default)]
pub struct FileReadings {
    pub readings: Vec<Reading>,
    pub rows_dropped: usize,
}

pub struct RawReader<'a> {
    config: &'a PipelineConfig,
}

impl<'a> RawReader<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn partition_dir(&self, year: i32, unit: Unit) -> PathBuf {
        self.config
            .raw_profiles_dir
            .join(unit.as_str())
            .join(year.to_string())
    }

    /// Raw files for the partition, sorted by path. A missing partition yields an empty list.
    pub fn list_files(&self, year: i32, unit: Unit, month: Option<u32>) -> Result<Vec<PathBuf>> {
        valid_years(&[year])?;
        if let Some(m) = month {
            if !(1..=12).contains(&m) {
                return Err(InputError::InvalidMonth(m).into());
            }
        }

        let dir = self.partition_dir(year, unit);
        if !dir.is_dir() {
            warn!("No raw {} profiles for {}: {} does not exist", unit, year, dir.display());
            return Ok(Vec::new());
        }

        let pattern = raw_file_regex()?;
        let mut files: Vec<PathBuf> = WalkDir::new(&dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(err) => {
                    warn!("Skipping unreadable entry in {}: {}", dir.display(), err);
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| matches_partition(&pattern, e.path(), year, month))
            .map(|e| e.into_path())
            .collect();
        files.sort();
        debug!("Found {} raw files for {} {}", files.len(), unit, year);
        Ok(files)
    }

    /// Loads and normalises every raw file of the partition.
    ///
    /// Unreadable files are logged and listed in `files_skipped`; they do not fail the load.
    pub fn load_raw_profiles(&self, year: i32, unit: Unit, month: Option<u32>) -> Result<RawLoad> {
        let files = self.list_files(year, unit, month)?;
        let mut load = RawLoad::default();
        for path in files {
            match read_raw_file(&path) {
                Ok(parsed) => {
                    load.rows_dropped += parsed.rows_dropped;
                    load.readings.extend(parsed.readings);
                    load.files_read.push(path);
                }
                Err(e) => {
                    warn!("Skipping raw file {} ({} {}): {}", path.display(), unit, year, e);
                    METRICS.lock().record_file_skipped();
                    load.files_skipped.push(path);
                }
            }
        }
        info!(
            "Loaded {} {} readings for {} from {} files ({} skipped)",
            load.readings.len(),
            unit,
            year,
            load.files_read.len(),
            load.files_skipped.len()
        );
        Ok(load)
    }
}

fn matches_partition(pattern: &Regex, path: &Path, year: i32, month: Option<u32>) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some(caps) = pattern.captures(name) else {
        return false;
    };
    let file_year = caps.name("year").and_then(|m| m.as_str().parse::<i32>().ok());
    let file_month = caps.name("month").and_then(|m| m.as_str().parse::<u32>().ok());
    file_year == Some(year) && month.map_or(true, |m| file_month == Some(m))
}

/// Rounds to the nearest whole second.
pub fn round_to_second(dt: NaiveDateTime) -> NaiveDateTime {
    let nanos = i64::from(dt.nanosecond());
    let truncated = dt - Duration::nanoseconds(nanos);
    if nanos >= 500_000_000 {
        truncated + Duration::seconds(1)
    } else {
        truncated
    }
}

/// Parses one raw file, csv or parquet by extension.
pub fn read_raw_file(path: &Path) -> Result<FileReadings> {
    let format = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FileFormat::from_extension)
        .ok_or_else(|| PipelineError::SchemaMismatch {
            path: path.to_path_buf(),
            message: "unrecognised raw file extension".to_string(),
        })?;

    let parsed = match format {
        FileFormat::Csv => read_raw_csv(path)?,
        FileFormat::Parquet => read_raw_parquet(path)?,
    };
    if parsed.rows_dropped > 0 {
        warn!(
            "Dropped {} rows without a usable ProfileID or Datefield in {}",
            parsed.rows_dropped,
            path.display()
        );
    }
    METRICS
        .lock()
        .record_file_read(parsed.readings.len() as u64);
    Ok(parsed)
}

fn build_reading(
    recorder_id: Option<&str>,
    profile_id: Option<i64>,
    datefield: Option<NaiveDateTime>,
    unitsread: f64,
    valid: Option<&str>,
) -> Option<Reading> {
    Some(Reading {
        recorder_id: recorder_id.map(str::trim).unwrap_or_default().to_string(),
        profile_id: profile_id?,
        datefield: round_to_second(datefield?),
        unitsread,
        valid: normalize_validity(valid),
    })
}

fn read_raw_csv(path: &Path) -> Result<FileReadings> {
    let rows: Vec<RawRow> = io::read_records_csv(path)?;
    let mut out = FileReadings::default();
    for row in rows {
        match build_reading(
            Some(&row.recorder_id),
            parse_whole_number(&row.profile_id),
            datefield_format::parse(&row.datefield),
            row.unitsread,
            row.valid.as_deref(),
        ) {
            Some(r) => out.readings.push(r),
            None => out.rows_dropped += 1,
        }
    }
    Ok(out)
}

fn read_raw_parquet(path: &Path) -> Result<FileReadings> {
    let df = io::read_parquet(path)?;
    for required in ["RecorderID", "ProfileID", "Datefield", "Unitsread"] {
        if !io::has_column(&df, required) {
            return Err(PipelineError::SchemaMismatch {
                path: path.to_path_buf(),
                message: format!("missing column {required}"),
            });
        }
    }

    let recorders = io::str_column(&df, "RecorderID")?;
    let profiles = io::f64_column(&df, "ProfileID")?;
    let dates = io::datetime_column(&df, "Datefield")?;
    let values = io::f64_column(&df, "Unitsread")?;
    let valids = if io::has_column(&df, "Valid") {
        io::str_column(&df, "Valid")?
    } else {
        vec![None; df.height()]
    };

    let mut out = FileReadings::default();
    for i in 0..df.height() {
        let profile_id = profiles[i]
            .filter(|p| p.is_finite() && p.fract() == 0.0)
            .map(|p| p as i64);
        match build_reading(
            recorders[i].as_deref(),
            profile_id,
            dates[i],
            values[i].unwrap_or(f64::NAN),
            valids[i].as_deref(),
        ) {
            Some(r) => out.readings.push(r),
            None => out.rows_dropped += 1,
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_second() {
        let dt = datefield_format::parse("2012-01-02 10:04:59.6").unwrap();
        assert_eq!(round_to_second(dt), datefield_format::parse("2012-01-02 10:05:00").unwrap());
        let dt = datefield_format::parse("2012-01-02 10:05:00.4").unwrap();
        assert_eq!(round_to_second(dt), datefield_format::parse("2012-01-02 10:05:00").unwrap());
    }

    #[test]
    fn partition_file_names() {
        let re = raw_file_regex().unwrap();
        assert!(matches_partition(&re, Path::new("2012-1_7.csv"), 2012, None));
        assert!(matches_partition(&re, Path::new("2012-11_7.parquet"), 2012, Some(11)));
        assert!(!matches_partition(&re, Path::new("2012-11_7.parquet"), 2012, Some(1)));
        assert!(!matches_partition(&re, Path::new("2011-11_7.csv"), 2012, None));
        assert!(!matches_partition(&re, Path::new("notes.txt"), 2012, None));
    }
}
