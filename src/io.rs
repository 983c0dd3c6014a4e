use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::data_models::datefield_format;
use crate::errors::{PipelineError, Result};

/// Writes through a temp file in the destination directory, then renames into place.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|e| PipelineError::io(parent, e))?;
    write(tmp.as_file_mut())?;
    tmp.as_file_mut()
        .flush()
        .map_err(|e| PipelineError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::io(path, e.error))?;
    Ok(())
}

pub fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<()> {
    write_atomic(path, |file| {
        ParquetWriter::new(file).finish(df)?;
        Ok(())
    })
}

pub fn write_dataframe_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    write_atomic(path, |file| {
        CsvWriter::new(file).include_header(true).finish(df)?;
        Ok(())
    })
}

pub fn write_records_csv<T: Serialize>(records: &[T], path: &Path) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for record in records {
            writer
                .serialize(record)
                .map_err(|e| PipelineError::csv(path, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    })
}

pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(ParquetReader::new(file).finish()?)
}

pub fn read_records_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;
    reader
        .deserialize()
        .map(|row| row.map_err(|e| PipelineError::csv(path, e)))
        .collect()
}

fn series<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Series> {
    Ok(df.column(name)?.as_materialized_series())
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

pub fn f64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let casted = series(df, name)?.cast(&DataType::Float64)?;
    Ok(casted.f64()?.into_iter().collect())
}

pub fn i64_column(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let casted = series(df, name)?.cast(&DataType::Int64)?;
    Ok(casted.i64()?.into_iter().collect())
}

pub fn str_column(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let casted = series(df, name)?.cast(&DataType::String)?;
    Ok(casted
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect())
}

/// Reads a timestamp column stored either as a datetime, a date, or text.
pub fn datetime_column(df: &DataFrame, name: &str) -> Result<Vec<Option<NaiveDateTime>>> {
    let s = series(df, name)?;
    match s.dtype() {
        DataType::Datetime(unit, _) => {
            let per_second: i64 = match unit {
                TimeUnit::Milliseconds => 1_000,
                TimeUnit::Microseconds => 1_000_000,
                TimeUnit::Nanoseconds => 1_000_000_000,
            };
            let raw = s.cast(&DataType::Int64)?;
            Ok(raw
                .i64()?
                .into_iter()
                .map(|v| v.and_then(|v| from_epoch(v, per_second)))
                .collect())
        }
        DataType::Date => {
            let raw = s.cast(&DataType::Int32)?;
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1);
            Ok(raw
                .i32()?
                .into_iter()
                .map(|v| {
                    v.zip(epoch)
                        .and_then(|(days, e)| e.checked_add_signed(chrono::Duration::days(days.into())))
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .collect())
        }
        _ => Ok(str_column(df, name)?
            .into_iter()
            .map(|v| v.as_deref().and_then(datefield_format::parse))
            .collect()),
    }
}

fn from_epoch(value: i64, per_second: i64) -> Option<NaiveDateTime> {
    let secs = value.div_euclid(per_second);
    let nanos = value.rem_euclid(per_second) * (1_000_000_000 / per_second);
    DateTime::from_timestamp(secs, u32::try_from(nanos).ok()?).map(|d| d.naive_utc())
}

/// Millisecond-precision datetime series.
pub fn datetime_series(name: &str, values: &[NaiveDateTime]) -> Result<Series> {
    let millis: Vec<i64> = values
        .iter()
        .map(|dt| dt.and_utc().timestamp_millis())
        .collect();
    Ok(Series::new(name.into(), millis)
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?)
}
