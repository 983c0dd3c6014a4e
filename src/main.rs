use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use dlr_profiles::data_models::{FileFormat, Unit};
use dlr_profiles::features::{AggFunc, FeatureRequest};
use dlr_profiles::identity::TableIdentityResolver;
use dlr_profiles::io::write_dataframe_csv;
use dlr_profiles::metrics::METRICS;
use dlr_profiles::store::{ReductionReport, UnitOutcome};
use dlr_profiles::{Interval, Pipeline, PipelineConfig, RangeReport};

#[derive(Parser, Debug)]
#[command(name = "dlrprofiles")]
#[command(about = "Reduce, reconstruct and aggregate Domestic Load Research profiles", long_about = None)]
struct Cli {
    /// Data root holding observations/ and resampled_profiles/
    #[arg(long, env = "DLR_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file; takes precedence over --data-dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads for per-file reduction
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resample raw profiles of every unit and save them per year
    Reduce {
        /// Resample interval, e.g. 30T, H, D
        #[arg(short = 'i', long = "interval", default_value = "30T")]
        interval: String,
        /// Start year
        #[arg(short = 'y', long = "startyear")]
        start: i32,
        /// End year
        #[arg(short = 'z', long = "endyear")]
        end: i32,
        /// Write csv instead of parquet
        #[arg(long)]
        csv: bool,
    },
    /// Reconstruct power and write interval and day-type aggregates
    Aggregate {
        #[arg(short = 'y', long = "startyear")]
        start: i32,
        #[arg(short = 'z', long = "endyear")]
        end: i32,
        /// Aggregation interval: D, M or A
        #[arg(short = 'i', long = "interval", default_value = "M")]
        interval: String,
    },
    /// Build seasonal day-type profiles from saved day-type aggregates
    Season {
        #[arg(short = 'y', long = "startyear")]
        start: i32,
        #[arg(short = 'z', long = "endyear")]
        end: i32,
    },
    /// Aggregate one unit's hourly profiles per profile and interval
    Unit {
        #[arg(short = 'y', long = "year")]
        year: i32,
        /// A, V, Hz, kVA or kW
        #[arg(short = 'u', long = "unit")]
        unit: String,
        /// Aggregation interval: D, M or A
        #[arg(short = 'i', long = "interval", default_value = "M")]
        interval: String,
        /// Emit one row per bin instead of the per-profile weighted mean
        #[arg(long)]
        per_bin: bool,
        /// Write the result to this csv file
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Build the profile x hour-of-day feature matrix
    Features {
        #[arg(short = 'y', long = "startyear")]
        start: i32,
        #[arg(short = 'z', long = "endyear")]
        end: i32,
        #[arg(long, default_value = "A")]
        unit: String,
        /// Resample dates to D, M or A
        #[arg(long)]
        interval: Option<String>,
        #[arg(long, default_value = "mean")]
        aggfunc: String,
        /// Drop rows that sum to zero
        #[arg(long)]
        drop_zero: bool,
    },
}

fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match (&cli.config, &cli.data_dir) {
        (Some(path), _) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        (None, Some(root)) => PipelineConfig::from_root(root),
        (None, None) => PipelineConfig::from_env().context("Set --data-dir, --config or DLR_DATA_DIR")?,
    };
    config.apply_env_overrides()?;
    if let Some(workers) = cli.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

fn print_range(report: &RangeReport) {
    println!(
        "Completed: {:?}  Skipped: {}  Failed: {}",
        report.completed,
        report.skipped.len(),
        report.failed.len()
    );
}

fn print_reductions(reductions: &[ReductionReport]) {
    for reduction in reductions {
        for (unit, outcome) in &reduction.units {
            match outcome {
                UnitOutcome::Saved { rows, files, .. } => println!(
                    "{} {}: {} rows from {} files, {} skipped",
                    reduction.year, unit, rows, files.files_read, files.files_skipped
                ),
                UnitOutcome::Skipped { reason } => println!("{} {}: skipped ({})", reduction.year, unit, reason),
                UnitOutcome::Failed { reason } => println!("{} {}: FAILED ({})", reduction.year, unit, reason),
            }
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    info!("Using data in {}", config.resampled_dir.display());
    let resolver = TableIdentityResolver::new(&config);
    let pipeline = Pipeline::new(&config, &resolver);

    match &cli.command {
        Command::Reduce {
            interval,
            start,
            end,
            csv,
        } => {
            let interval = Interval::parse(interval)?;
            let format = if *csv { FileFormat::Csv } else { config.default_format };
            let (report, reductions) = pipeline.reduce_years(interval, *start, *end, format)?;
            print_reductions(&reductions);
            print_range(&report);
        }
        Command::Aggregate {
            start,
            end,
            interval,
        } => {
            let interval = Interval::parse(interval)?;
            let report = pipeline.generate_agg_profiles_range(*start, *end, interval)?;
            print_range(&report);
        }
        Command::Season { start, end } => {
            let report = pipeline.generate_season_range(*start, *end)?;
            print_range(&report);
        }
        Command::Unit {
            year,
            unit,
            interval,
            per_bin,
            out,
        } => {
            let mut df = pipeline.aggregate_unit_profiles(
                *year,
                unit.parse::<Unit>()?,
                Interval::parse(interval)?,
                !*per_bin,
            )?;
            match out {
                Some(path) => {
                    write_dataframe_csv(&mut df, path)?;
                    println!("Wrote {} rows to {}", df.height(), path.display());
                }
                None => println!("{} rows: {:?}", df.height(), df.get_column_names()),
            }
        }
        Command::Features {
            start,
            end,
            unit,
            interval,
            aggfunc,
            drop_zero,
        } => {
            let request = FeatureRequest {
                start_year: *start,
                end_year: *end,
                unit: unit.parse::<Unit>()?,
                interval: interval.as_deref().map(Interval::parse).transpose()?,
                aggfunc: aggfunc.parse::<AggFunc>()?,
                drop_zero: *drop_zero,
            };
            let rows = pipeline.build_features(&request)?;
            println!("Feature matrix: {} rows", rows.len());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = run(&cli);
    METRICS.lock().print_summary();
    result
}
