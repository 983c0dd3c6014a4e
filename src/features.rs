use chrono::{NaiveDate, Timelike};
use log::{info, warn};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::PipelineConfig;
use crate::data_models::{ReducedSeries, Unit};
use crate::errors::{valid_year_range, InputError, PipelineError, Result};
use crate::interval::Interval;
use crate::io;
use crate::metrics::METRICS;
use crate::store::ProfileStore;
use crate::validity::mask_invalid;

pub const HOURS: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AggFunc {
    #[default]
    Mean,
    Sum,
    Min,
    Max,
    Median,
}

impl AggFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Mean => "mean",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Median => "median",
        }
    }

    /// Applies the function to the non-NaN values. Sum of nothing is 0, everything else NaN.
    pub fn apply(&self, values: &[f64]) -> f64 {
        let mut v: Vec<f64> = values.iter().copied().filter(|x| !x.is_nan()).collect();
        if v.is_empty() {
            return if *self == AggFunc::Sum { 0.0 } else { f64::NAN };
        }
        match self {
            AggFunc::Mean => v.iter().sum::<f64>() / v.len() as f64,
            AggFunc::Sum => v.iter().sum(),
            AggFunc::Min => v.iter().copied().fold(f64::INFINITY, f64::min),
            AggFunc::Max => v.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggFunc::Median => {
                v.sort_by(|a, b| a.total_cmp(b));
                let mid = v.len() / 2;
                if v.len() % 2 == 0 {
                    (v[mid - 1] + v[mid]) / 2.0
                } else {
                    v[mid]
                }
            }
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggFunc {
    type Err = InputError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mean" => Ok(AggFunc::Mean),
            "sum" => Ok(AggFunc::Sum),
            "min" => Ok(AggFunc::Min),
            "max" => Ok(AggFunc::Max),
            "median" => Ok(AggFunc::Median),
            other => Err(InputError::InvalidAggFunc(other.to_string())),
        }
    }
}

/// One profile-day (or resampled period) of hourly values. Missing hours are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub profile_id: i64,
    pub date: NaiveDate,
    pub hours: [f64; HOURS],
}

impl FeatureRow {
    pub fn is_all_nan(&self) -> bool {
        self.hours.iter().all(|v| v.is_nan())
    }

    pub fn nan_sum(&self) -> f64 {
        self.hours.iter().filter(|v| !v.is_nan()).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRequest {
    pub start_year: i32,
    pub end_year: i32,
    pub unit: Unit,
    /// Resample dates to D, M or A. `None` keeps one row per day.
    pub interval: Option<Interval>,
    pub aggfunc: AggFunc,
    pub drop_zero: bool,
}

impl FeatureRequest {
    pub fn new(start_year: i32, end_year: i32) -> Self {
        Self {
            start_year,
            end_year,
            unit: Unit::A,
            interval: None,
            aggfunc: AggFunc::Mean,
            drop_zero: false,
        }
    }

    fn validate(&self) -> std::result::Result<(), InputError> {
        valid_year_range(self.start_year, self.end_year)?;
        if let Some(interval) = self.interval {
            if !interval.is_calendar() {
                return Err(InputError::UnsupportedInterval {
                    interval: interval.dir_name(),
                    purpose: "feature matrix resampling".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Cache file name; `drop_zero` is applied after loading and is not part of it.
    pub fn cache_file_name(&self) -> String {
        let interval = self.interval.map(|i| i.dir_name()).unwrap_or_default();
        format!(
            "{}_{}{}{}{}.parquet",
            self.start_year, self.end_year, interval, self.aggfunc, self.unit
        )
    }
}

/// Mean of masked hourly values per (ProfileID, date, hour), one row per profile-day.
pub fn daily_hourly_profiles(series: &ReducedSeries) -> Vec<FeatureRow> {
    let mut cells: BTreeMap<(i64, NaiveDate), [(f64, u32); HOURS]> = BTreeMap::new();
    for r in &series.records {
        let value = mask_invalid(r.unitsread, r.valid);
        let cell = cells
            .entry((r.profile_id, r.datefield.date()))
            .or_insert([(0.0, 0); HOURS]);
        if !value.is_nan() {
            let slot = &mut cell[r.datefield.hour() as usize];
            slot.0 += value;
            slot.1 += 1;
        }
    }
    cells
        .into_iter()
        .map(|((profile_id, date), cell)| {
            let mut hours = [f64::NAN; HOURS];
            for (h, (sum, n)) in cell.iter().enumerate() {
                if *n > 0 {
                    hours[h] = sum / f64::from(*n);
                }
            }
            FeatureRow {
                profile_id,
                date,
                hours,
            }
        })
        .collect()
}

/// Resamples profile-day rows to `interval` bins with `aggfunc` applied per hour column.
pub fn resample_profiles(rows: Vec<FeatureRow>, interval: Option<Interval>, aggfunc: AggFunc) -> Vec<FeatureRow> {
    let Some(interval) = interval else {
        return rows;
    };
    let mut bins: BTreeMap<(i64, NaiveDate), Vec<[f64; HOURS]>> = BTreeMap::new();
    for row in rows {
        let Some(label) = row
            .date
            .and_hms_opt(0, 0, 0)
            .and_then(|dt| interval.bin_label(dt))
        else {
            continue;
        };
        bins.entry((row.profile_id, label.date()))
            .or_default()
            .push(row.hours);
    }
    bins.into_iter()
        .map(|((profile_id, date), members)| {
            let mut hours = [f64::NAN; HOURS];
            for (h, slot) in hours.iter_mut().enumerate() {
                let column: Vec<f64> = members.iter().map(|m| m[h]).collect();
                *slot = aggfunc.apply(&column);
            }
            FeatureRow {
                profile_id,
                date,
                hours,
            }
        })
        .collect()
}

/// Rejects values outside `[0, ceiling]`.
pub fn check_plausible(rows: &[FeatureRow], ceiling: f64, build: &str) -> Result<()> {
    for row in rows {
        for (h, v) in row.hours.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            let check = if *v < 0.0 {
                "negative"
            } else if *v > ceiling {
                "implausibly large"
            } else {
                continue;
            };
            return Err(PipelineError::DataQuality {
                build: build.to_string(),
                column: h.to_string(),
                check: check.to_string(),
                value: *v,
            });
        }
    }
    Ok(())
}

pub fn features_to_dataframe(rows: &[FeatureRow]) -> Result<DataFrame> {
    let epoch = NaiveDate::default();
    let days: Vec<i32> = rows
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let mut columns: Vec<Column> = vec![
        Series::new("ProfileID".into(), rows.iter().map(|r| r.profile_id).collect::<Vec<_>>()).into(),
        Series::new("date".into(), days).cast(&DataType::Date)?.into(),
    ];
    for h in 0..HOURS {
        let values: Vec<Option<f64>> = rows
            .iter()
            .map(|r| Some(r.hours[h]).filter(|v| !v.is_nan()))
            .collect();
        columns.push(Series::new(h.to_string().as_str().into(), values).into());
    }
    Ok(DataFrame::new(columns)?)
}

pub fn features_from_dataframe(df: &DataFrame, path: &Path) -> Result<Vec<FeatureRow>> {
    let profile = io::i64_column(df, "ProfileID")?;
    let dates = io::datetime_column(df, "date")?;
    let mut hour_columns = Vec::with_capacity(HOURS);
    for h in 0..HOURS {
        hour_columns.push(io::f64_column(df, &h.to_string())?);
    }
    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(profile_id), Some(date)) = (profile[i], dates[i]) else {
            return Err(PipelineError::SchemaMismatch {
                path: path.to_path_buf(),
                message: format!("incomplete key in row {i}"),
            });
        };
        let mut hours = [f64::NAN; HOURS];
        for (h, slot) in hours.iter_mut().enumerate() {
            *slot = hour_columns[h][i].unwrap_or(f64::NAN);
        }
        rows.push(FeatureRow {
            profile_id,
            date: date.date(),
            hours,
        });
    }
    Ok(rows)
}

pub struct FeatureMatrixBuilder<'a> {
    config: &'a PipelineConfig,
    store: ProfileStore<'a>,
}

impl<'a> FeatureMatrixBuilder<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self {
            config,
            store: ProfileStore::new(config),
        }
    }

    pub fn cache_path(&self, request: &FeatureRequest) -> PathBuf {
        self.config
            .feature_cache_dir()
            .join(request.cache_file_name())
    }

    /// Builds or loads the profile x hour matrix for the request.
    ///
    /// A build whose values fail the plausibility check writes nothing.
    pub fn build(&self, request: &FeatureRequest) -> Result<Vec<FeatureRow>> {
        request.validate()?;
        let path = self.cache_path(request);

        let mut rows = if path.exists() {
            info!("Loading cached feature matrix {}", path.display());
            features_from_dataframe(&io::read_parquet(&path)?, &path)?
        } else {
            let rows = self.compute(request)?;
            if request.aggfunc != AggFunc::Sum {
                check_plausible(&rows, self.config.value_ceiling, &request.cache_file_name())?;
            }
            let mut df = features_to_dataframe(&rows)?;
            io::write_parquet(&mut df, &path)?;
            METRICS.lock().record_table_written();
            info!("Saved feature matrix with {} rows to {}", rows.len(), path.display());
            rows
        };

        if request.drop_zero {
            let before = rows.len();
            rows.retain(|r| r.nan_sum() != 0.0);
            info!("Dropped {} all-zero rows", before - rows.len());
        }
        Ok(rows)
    }

    fn compute(&self, request: &FeatureRequest) -> Result<Vec<FeatureRow>> {
        let mut all = Vec::new();
        for year in request.start_year..=request.end_year {
            match self.store.load(year, request.unit, Interval::HOURLY) {
                Ok(series) => {
                    let daily = daily_hourly_profiles(&series);
                    drop(series);
                    all.extend(resample_profiles(daily, request.interval, request.aggfunc));
                }
                Err(e) if e.is_soft() => {
                    warn!("Skipping {} {} in feature matrix: {}", request.unit, year, e);
                }
                Err(e) => return Err(e),
            }
        }
        all.retain(|r| !r.is_all_nan());
        if all.is_empty() {
            return Err(PipelineError::missing(format!(
                "hourly {} profiles for {}-{}",
                request.unit, request.start_year, request.end_year
            )));
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_functions_skip_nan() {
        let values = [3.0, f64::NAN, 1.0, 2.0];
        assert_eq!(AggFunc::Mean.apply(&values), 2.0);
        assert_eq!(AggFunc::Sum.apply(&values), 6.0);
        assert_eq!(AggFunc::Min.apply(&values), 1.0);
        assert_eq!(AggFunc::Max.apply(&values), 3.0);
        assert_eq!(AggFunc::Median.apply(&values), 2.0);
        assert_eq!(AggFunc::Sum.apply(&[f64::NAN]), 0.0);
        assert!(AggFunc::Mean.apply(&[]).is_nan());
        assert!("average".parse::<AggFunc>().is_err());
    }

    #[test]
    fn cache_name_encodes_parameters() {
        let mut request = FeatureRequest::new(2010, 2012);
        assert_eq!(request.cache_file_name(), "2010_2012meanA.parquet");
        request.interval = Some(Interval::Month);
        request.unit = Unit::KW;
        request.aggfunc = AggFunc::Max;
        request.drop_zero = true;
        assert_eq!(request.cache_file_name(), "2010_2012MmaxkW.parquet");
    }
}
