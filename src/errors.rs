use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::data_models::Unit;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config file {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse JSON configuration in {path}: {source}")]
    JsonParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Configuration file not found at {path}")]
    NotFound { path: PathBuf },
    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidEnv { var: String, value: String },
}

/// Bad caller input. Always surfaced, never corrected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Year {0} is out of range. Please select a year between 1994 and 2014")]
    YearOutOfRange(i32),
    #[error("Invalid year range: start year {start} is after end year {end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("Invalid unit '{0}'. Expected one of A, V, Hz, kVA, kW")]
    InvalidUnit(String),
    #[error("Invalid month {0}. Expected 1-12")]
    InvalidMonth(u32),
    #[error("Invalid interval specifier '{0}'")]
    InvalidInterval(String),
    #[error("Interval '{interval}' cannot be used for {purpose}")]
    UnsupportedInterval { interval: String, purpose: String },
    #[error("Unsupported aggregation function '{0}'; use mean, sum, min, max or median")]
    InvalidAggFunc(String),
    #[error("Unknown aggregate stage '{0}'")]
    InvalidStage(String),
    #[error("Unsupported file format '{0}'; use parquet or csv")]
    InvalidFormat(String),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("Configuration failed: {0}")]
    Config(#[from] ConfigError),
    #[error("No data: {context}")]
    MissingData { context: String },
    #[error("Data quality check failed for {build}: {column} has {check} value {value}")]
    DataQuality {
        build: String,
        column: String,
        check: String,
        value: f64,
    },
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Table operation failed: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
    #[error("Schema mismatch in {path}: {message}")]
    SchemaMismatch { path: PathBuf, message: String },
    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub fn missing(context: impl Into<String>) -> Self {
        PipelineError::MissingData {
            context: context.into(),
        }
    }

    pub fn missing_unit(year: i32, unit: Unit, what: &str) -> Self {
        PipelineError::MissingData {
            context: format!("{what} for {unit} {year}"),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        PipelineError::Csv {
            path: path.into(),
            source,
        }
    }

    /// Soft failures are logged and skipped by batch loops; everything else propagates.
    pub fn is_soft(&self) -> bool {
        matches!(self, PipelineError::MissingData { .. })
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Valid study years are 1994 to 2014 inclusive.
pub fn valid_years(years: &[i32]) -> std::result::Result<(), InputError> {
    for &year in years {
        if !(1994..=2014).contains(&year) {
            return Err(InputError::YearOutOfRange(year));
        }
    }
    Ok(())
}

pub fn valid_year_range(start: i32, end: i32) -> std::result::Result<(), InputError> {
    valid_years(&[start, end])?;
    if start > end {
        return Err(InputError::InvalidYearRange { start, end });
    }
    Ok(())
}
