use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use polars::prelude::DataFrame;
use std::path::PathBuf;

use crate::aggregate::{
    aggregate_by_daytype, aggregate_by_interval, aggregate_by_season, aggregate_to_dataframe,
    aggregate_unit, daytype_from_dataframe, daytype_to_dataframe, interval_demand,
    interval_demand_to_dataframe, seasonal_to_dataframe, unit_aggregate_to_dataframe,
    unit_interval_means, unit_means_to_dataframe,
};
use crate::config::PipelineConfig;
use crate::data_models::{FileFormat, Unit};
use crate::errors::{valid_year_range, valid_years, InputError, PipelineError, Result};
use crate::features::{FeatureMatrixBuilder, FeatureRequest, FeatureRow};
use crate::identity::IdentityResolver;
use crate::interval::Interval;
use crate::io;
use crate::metrics::METRICS;
use crate::power::{power_to_dataframe, PowerReconstructor};
use crate::store::{ProfileStore, ReductionReport};
use crate::time_operation;

/// Persisted output of the aggregation passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ProfilePower,
    AggregateProfilePower(Interval),
    IntervalDemand(Interval),
    DaytypeDemand,
    SeasonalDaytypeDemand,
}

impl Stage {
    pub fn name(&self) -> String {
        match self {
            Stage::ProfilePower => "pp".to_string(),
            Stage::AggregateProfilePower(i) => format!("aggpp_{}", i.dir_name()),
            Stage::IntervalDemand(i) => format!("a{}d", i.dir_name()),
            Stage::DaytypeDemand => "adtd".to_string(),
            Stage::SeasonalDaytypeDemand => "adtd_season".to_string(),
        }
    }

    /// Parses `pp`, `aggpp_<interval>`, `a<interval>d`, `adtd` or `adtd_season`.
    pub fn parse(name: &str) -> std::result::Result<Stage, InputError> {
        let invalid = || InputError::InvalidStage(name.to_string());
        match name {
            "pp" => Ok(Stage::ProfilePower),
            "adtd" => Ok(Stage::DaytypeDemand),
            "adtd_season" => Ok(Stage::SeasonalDaytypeDemand),
            _ => {
                if let Some(token) = name.strip_prefix("aggpp_") {
                    Interval::parse(token)
                        .map(Stage::AggregateProfilePower)
                        .map_err(|_| invalid())
                } else if let Some(token) = name.strip_prefix('a').and_then(|s| s.strip_suffix('d')) {
                    Interval::parse(token)
                        .map(Stage::IntervalDemand)
                        .map_err(|_| invalid())
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

/// Per-year outcome of a range run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeReport {
    pub completed: Vec<i32>,
    pub skipped: Vec<(i32, String)>,
    pub failed: Vec<(i32, String)>,
}

impl RangeReport {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty() && self.failed.is_empty()
    }

    pub fn log_summary(&self, what: &str) {
        info!(
            "{}: {} years completed, {} skipped, {} failed",
            what,
            self.completed.len(),
            self.skipped.len(),
            self.failed.len()
        );
        for (year, reason) in &self.skipped {
            warn!("{} {} skipped: {}", what, year, reason);
        }
        for (year, reason) in &self.failed {
            error!("{} {} failed: {}", what, year, reason);
        }
    }
}

fn progress_bar(len: u64, message: &str) -> ProgressBar {
    let progress = ProgressBar::new(len);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    progress.set_message(message.to_string());
    progress
}

/// Runs `work` for each year. Input errors abort; anything else is recorded and the range continues.
fn run_range<F>(start: i32, end: i32, what: &str, mut work: F) -> Result<RangeReport>
where
    F: FnMut(i32) -> Result<()>,
{
    valid_year_range(start, end)?;
    let progress = progress_bar((end - start + 1) as u64, what);
    let mut report = RangeReport::default();

    for year in start..=end {
        progress.set_message(format!("{what} {year}"));
        match work(year) {
            Ok(()) => report.completed.push(year),
            Err(e @ PipelineError::InvalidInput(_)) => {
                progress.abandon();
                return Err(e);
            }
            Err(e) if e.is_soft() => {
                warn!("{} {}: {}", what, year, e);
                report.skipped.push((year, e.to_string()));
            }
            Err(e) => {
                error!("{} {}: {}", what, year, e);
                METRICS.lock().record_unit_failed();
                report.failed.push((year, e.to_string()));
            }
        }
        progress.inc(1);
    }
    progress.finish_with_message(format!("{what} done"));
    report.log_summary(what);
    Ok(report)
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    resolver: &'a dyn IdentityResolver,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, resolver: &'a dyn IdentityResolver) -> Self {
        Self { config, resolver }
    }

    pub fn stage_path(&self, stage: &str, year: i32, format: FileFormat) -> PathBuf {
        self.config
            .agg_profiles_dir()
            .join(stage)
            .join(format.extension())
            .join(format!("{}_{}.{}", stage, year, format.extension()))
    }

    fn write_stage(&self, stage: &Stage, year: i32, df: &mut DataFrame) -> Result<PathBuf> {
        let name = stage.name();
        let parquet = self.stage_path(&name, year, FileFormat::Parquet);
        io::write_parquet(df, &parquet)?;
        io::write_dataframe_csv(df, &self.stage_path(&name, year, FileFormat::Csv))?;
        let mut metrics = METRICS.lock();
        metrics.record_table_written();
        metrics.record_table_written();
        info!("{}: saved {} ({} rows)", year, name, df.height());
        Ok(parquet)
    }

    /// Reduces and saves every unit of every year in the range.
    pub fn reduce_years(
        &self,
        interval: Interval,
        start: i32,
        end: i32,
        format: FileFormat,
    ) -> Result<(RangeReport, Vec<ReductionReport>)> {
        let store = ProfileStore::new(self.config);
        let mut reductions = Vec::new();
        let report = run_range(start, end, "reduce", |year| {
            let reduction = time_operation!(
                format!("reduce {year}"),
                store.save_reduced_profiles(year, interval, format)
            )?;
            let saved = reduction.saved();
            if reduction.partial() > 0 {
                warn!("{} units of {} were reduced from a partial set of raw files", reduction.partial(), year);
            }
            reductions.push(reduction);
            if saved == 0 {
                return Err(PipelineError::missing(format!("raw profiles for {year}")));
            }
            Ok(())
        })?;
        Ok((report, reductions))
    }

    /// Writes the `pp`, `aggpp_<interval>`, `a<interval>d` and `adtd` tables for the year.
    pub fn generate_agg_profiles(&self, year: i32, interval: Interval) -> Result<Vec<PathBuf>> {
        valid_years(&[year])?;
        if !interval.is_calendar() {
            return Err(InputError::UnsupportedInterval {
                interval: interval.dir_name(),
                purpose: "aggregate profiles".to_string(),
            }
            .into());
        }

        let power = time_operation!(
            format!("power {year}"),
            PowerReconstructor::new(self.config, self.resolver).reconstruct(year)
        )?;
        let mut written = Vec::with_capacity(4);
        written.push(self.write_stage(&Stage::ProfilePower, year, &mut power_to_dataframe(&power)?)?);

        let aggregate = time_operation!(format!("aggregate {year}"), aggregate_by_interval(&power, interval));
        written.push(self.write_stage(
            &Stage::AggregateProfilePower(interval),
            year,
            &mut aggregate_to_dataframe(&aggregate)?,
        )?);

        let demand = interval_demand(&aggregate);
        written.push(self.write_stage(
            &Stage::IntervalDemand(interval),
            year,
            &mut interval_demand_to_dataframe(&demand)?,
        )?);

        let daytype = time_operation!(format!("daytype {year}"), aggregate_by_daytype(&power));
        drop(power);
        written.push(self.write_stage(&Stage::DaytypeDemand, year, &mut daytype_to_dataframe(&daytype)?)?);
        Ok(written)
    }

    /// Aggregates one unit's hourly profiles to `interval`.
    ///
    /// With `mean` set, returns one valid-weighted mean per profile instead
    /// of one row per bin. Either shape carries the profile's `AnswerID`.
    pub fn aggregate_unit_profiles(
        &self,
        year: i32,
        unit: Unit,
        interval: Interval,
        mean: bool,
    ) -> Result<DataFrame> {
        valid_years(&[year])?;
        if !interval.is_calendar() {
            return Err(InputError::UnsupportedInterval {
                interval: interval.dir_name(),
                purpose: "unit aggregation".to_string(),
            }
            .into());
        }

        let series = ProfileStore::new(self.config).load(year, unit, Interval::HOURLY)?;
        let metadata = self.resolver.profile_metadata(year)?;
        let aggregate = time_operation!(
            format!("aggregate {unit} {year}"),
            aggregate_unit(&series, interval, &metadata)
        );
        info!("{}: aggregated {} to {} bins at {}", year, unit, aggregate.rows.len(), interval);
        if mean {
            unit_means_to_dataframe(&unit_interval_means(&aggregate))
        } else {
            unit_aggregate_to_dataframe(&aggregate)
        }
    }

    pub fn generate_agg_profiles_range(&self, start: i32, end: i32, interval: Interval) -> Result<RangeReport> {
        run_range(start, end, "aggregate", |year| {
            self.generate_agg_profiles(year, interval).map(|_| ())
        })
    }

    /// Reads the persisted `adtd` table for the year and writes `adtd_season`.
    pub fn generate_season_adtd(&self, year: i32) -> Result<PathBuf> {
        let stage = Stage::DaytypeDemand.name();
        let df = self.read_agg_profiles(year, &stage)?;
        let path = self.stage_path(&stage, year, FileFormat::Parquet);
        let daytype = daytype_from_dataframe(&df, year, &path)?;
        let seasonal = aggregate_by_season(&daytype);
        self.write_stage(
            &Stage::SeasonalDaytypeDemand,
            year,
            &mut seasonal_to_dataframe(&seasonal)?,
        )
    }

    pub fn generate_season_range(&self, start: i32, end: i32) -> Result<RangeReport> {
        run_range(start, end, "season", |year| self.generate_season_adtd(year).map(|_| ()))
    }

    /// Loads a persisted aggregate table.
    pub fn read_agg_profiles(&self, year: i32, stage: &str) -> Result<DataFrame> {
        valid_years(&[year])?;
        let stage = Stage::parse(stage)?.name();
        let path = self.stage_path(&stage, year, FileFormat::Parquet);
        if !path.exists() {
            return Err(PipelineError::missing(format!("{} table for {}", stage, year)));
        }
        io::read_parquet(&path)
    }

    pub fn build_features(&self, request: &FeatureRequest) -> Result<Vec<FeatureRow>> {
        time_operation!("features", FeatureMatrixBuilder::new(self.config).build(request))
    }
}
