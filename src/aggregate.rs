use chrono::{Datelike, NaiveDateTime, Timelike};
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;

use crate::data_models::{
    Daytype, PowerRecord, PowerTable, ProfileMeta, ReducedSeries, Schema, Season, Unit,
};
use crate::errors::{PipelineError, Result};
use crate::interval::Interval;
use crate::io;
use crate::power::answer_ids;
use crate::validity::mask_invalid;

/// Running mean/sum over masked values.
#[derive(Debug, Default, Clone, Copy)]
struct Moments {
    sum: f64,
    n: u32,
}

impl Moments {
    fn push(&mut self, value: f64) {
        if !value.is_nan() {
            self.sum += value;
            self.n += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.n > 0).then(|| self.sum / f64::from(self.n))
    }
}

/// Mean and sample standard deviation of the non-NaN values. The deviation needs two values.
pub fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = finite.len();
    if n == 0 {
        return (None, None);
    }
    let mean = finite.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (Some(mean), None);
    }
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (Some(mean), Some(var.sqrt()))
}

fn mean_of(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    let mut m = Moments::default();
    for v in values.flatten() {
        m.push(v);
    }
    m.mean()
}

/// One `(RecorderID, ProfileID_i, bin)` row of the interval aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub recorder_id: String,
    pub profile_id_i: i64,
    pub answer_id: i64,
    pub datefield: NaiveDateTime,
    pub unitsread_i: Option<f64>,
    pub unitsread_v: Option<f64>,
    /// Summed metered kW. Only populated for the metered schema.
    pub unitsread_kw: Option<f64>,
    /// Mean metered kVA. Only populated for the metered schema.
    pub unitsread_kva: Option<f64>,
    pub kw_calculated: f64,
    pub valid_calculated: f64,
    pub interval_hours: f64,
    pub valid_obs_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateDemand {
    pub year: i32,
    pub interval: Interval,
    pub schema: Schema,
    pub rows: Vec<AggregateRow>,
}

#[derive(Debug, Default)]
struct BinSums {
    answer_id: i64,
    i: Moments,
    v: Moments,
    kw: Moments,
    kva: Moments,
    kw_calculated: Moments,
    valid_calculated: f64,
}

/// Resamples power records per `(RecorderID, ProfileID_i)` to `interval`.
///
/// Bins between a profile's first and last observation are always emitted,
/// empty ones with zero sums and no means.
pub fn aggregate_by_interval(table: &PowerTable, interval: Interval) -> AggregateDemand {
    let metered = table.schema == Schema::Metered;
    let mut groups: BTreeMap<(String, i64), BTreeMap<NaiveDateTime, BinSums>> = BTreeMap::new();

    for r in &table.records {
        let Some(label) = interval.bin_label(r.datefield) else {
            continue;
        };
        let bin = groups
            .entry((r.recorder_id.clone(), r.profile_id_i))
            .or_default()
            .entry(label)
            .or_default();
        if bin.answer_id == 0 {
            bin.answer_id = r.answer_id;
        }
        bin.i.push(mask_invalid(r.unitsread_i, r.valid_i));
        bin.v.push(mask_invalid(r.unitsread_v, r.valid_v));
        if let (Some(kw), Some(valid)) = (r.unitsread_kw, r.valid_kw) {
            bin.kw.push(mask_invalid(kw, valid));
        }
        if let (Some(kva), Some(valid)) = (r.unitsread_kva, r.valid_kva) {
            bin.kva.push(mask_invalid(kva, valid));
        }
        bin.kw_calculated
            .push(mask_invalid(r.kw_calculated, r.valid_calculated));
        bin.valid_calculated += f64::from(r.valid_calculated);
    }

    let mut rows = Vec::new();
    for ((recorder_id, profile_id_i), bins) in groups {
        let answer_id = bins.values().map(|b| b.answer_id).find(|a| *a != 0).unwrap_or(0);
        let (Some(first), Some(last)) = (bins.keys().next().copied(), bins.keys().last().copied())
        else {
            continue;
        };
        let empty = BinSums::default();
        let mut label = first;
        while label <= last {
            let bin = bins.get(&label).unwrap_or(&empty);
            let interval_hours = interval.span_hours(label);
            rows.push(AggregateRow {
                recorder_id: recorder_id.clone(),
                profile_id_i,
                answer_id,
                datefield: label,
                unitsread_i: bin.i.mean(),
                unitsread_v: bin.v.mean(),
                unitsread_kw: metered.then_some(bin.kw.sum),
                unitsread_kva: if metered { bin.kva.mean() } else { None },
                kw_calculated: bin.kw_calculated.sum,
                valid_calculated: bin.valid_calculated,
                interval_hours,
                valid_obs_ratio: bin.valid_calculated / interval_hours,
            });
            match interval.next_label(label) {
                Some(next) => label = next,
                None => break,
            }
        }
    }

    AggregateDemand {
        year: table.year,
        interval,
        schema: table.schema,
        rows,
    }
}

/// Per-profile statistics over the bins of an interval aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalDemandRow {
    pub recorder_id: String,
    pub profile_id_i: i64,
    pub answer_id: i64,
    pub kw_mean: Option<f64>,
    pub kw_std: Option<f64>,
    pub kva_mean: Option<f64>,
    pub kva_std: Option<f64>,
    pub valid_hours: f64,
    pub interval_hours_sum: f64,
    pub valid_obs_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalDemand {
    pub year: i32,
    pub interval: Interval,
    pub schema: Schema,
    pub rows: Vec<IntervalDemandRow>,
}

/// Mean and deviation across bins of metered kW/kVA, or of `kw_calculated` for the calculated schema.
pub fn interval_demand(aggregate: &AggregateDemand) -> IntervalDemand {
    let metered = aggregate.schema == Schema::Metered;
    let mut groups: BTreeMap<(&str, i64), Vec<&AggregateRow>> = BTreeMap::new();
    for row in &aggregate.rows {
        groups
            .entry((row.recorder_id.as_str(), row.profile_id_i))
            .or_default()
            .push(row);
    }

    let rows = groups
        .into_iter()
        .map(|((recorder_id, profile_id_i), bins)| {
            let kw: Vec<f64> = bins
                .iter()
                .map(|b| {
                    if metered {
                        b.unitsread_kw.unwrap_or(f64::NAN)
                    } else {
                        b.kw_calculated
                    }
                })
                .collect();
            let (kw_mean, kw_std) = mean_std(&kw);
            let (kva_mean, kva_std) = if metered {
                let kva: Vec<f64> = bins
                    .iter()
                    .map(|b| b.unitsread_kva.unwrap_or(f64::NAN))
                    .collect();
                mean_std(&kva)
            } else {
                (None, None)
            };
            let valid_hours: f64 = bins.iter().map(|b| b.valid_calculated).sum();
            let interval_hours_sum: f64 = bins.iter().map(|b| b.interval_hours).sum();
            IntervalDemandRow {
                recorder_id: recorder_id.to_string(),
                profile_id_i,
                answer_id: bins.iter().map(|b| b.answer_id).find(|a| *a != 0).unwrap_or(0),
                kw_mean,
                kw_std,
                kva_mean,
                kva_std,
                valid_hours,
                interval_hours_sum,
                valid_obs_ratio: if interval_hours_sum > 0.0 {
                    valid_hours / interval_hours_sum
                } else {
                    0.0
                },
            }
        })
        .collect();

    IntervalDemand {
        year: aggregate.year,
        interval: aggregate.interval,
        schema: aggregate.schema,
        rows,
    }
}

/// One `(ProfileID, bin)` row of a single-unit aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitBinRow {
    pub profile_id: i64,
    /// `None` when the profile is not linked to a survey response.
    pub answer_id: Option<i64>,
    pub datefield: NaiveDateTime,
    /// Sum of valid readings for kW and kVA, their mean for A, V and Hz.
    pub value: Option<f64>,
    pub valid_hours: f64,
    pub total_hours: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitAggregate {
    pub year: i32,
    pub unit: Unit,
    pub interval: Interval,
    pub rows: Vec<UnitBinRow>,
}

/// Valid-hour weighted mean of a profile's bins.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitMeanRow {
    pub profile_id: i64,
    pub answer_id: Option<i64>,
    pub mean: Option<f64>,
    pub valid_hours_of_total: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitMeans {
    pub year: i32,
    pub unit: Unit,
    pub interval: Interval,
    pub rows: Vec<UnitMeanRow>,
}

#[derive(Debug, Default)]
struct UnitBin {
    values: Moments,
    valid_hours: f64,
    total_hours: f64,
}

/// Resamples one unit's hourly profiles per `ProfileID` to `interval`.
///
/// Gaps between a profile's first and last bin are filled like
/// `aggregate_by_interval` does.
pub fn aggregate_unit(series: &ReducedSeries, interval: Interval, metadata: &[ProfileMeta]) -> UnitAggregate {
    let summed = series.unit.is_summed();
    let answers = answer_ids(metadata);
    let mut groups: BTreeMap<i64, BTreeMap<NaiveDateTime, UnitBin>> = BTreeMap::new();

    for r in &series.records {
        let Some(label) = interval.bin_label(r.datefield) else {
            continue;
        };
        let bin = groups.entry(r.profile_id).or_default().entry(label).or_default();
        bin.values.push(mask_invalid(r.unitsread, r.valid));
        bin.valid_hours += f64::from(r.valid);
        bin.total_hours += 1.0;
    }

    let mut rows = Vec::new();
    for (profile_id, bins) in groups {
        let answer_id = answers.get(&profile_id).copied();
        let (Some(first), Some(last)) = (bins.keys().next().copied(), bins.keys().last().copied())
        else {
            continue;
        };
        let empty = UnitBin::default();
        let mut label = first;
        while label <= last {
            let bin = bins.get(&label).unwrap_or(&empty);
            rows.push(UnitBinRow {
                profile_id,
                answer_id,
                datefield: label,
                value: if summed { Some(bin.values.sum) } else { bin.values.mean() },
                valid_hours: bin.valid_hours,
                total_hours: bin.total_hours,
            });
            match interval.next_label(label) {
                Some(next) => label = next,
                None => break,
            }
        }
    }

    UnitAggregate {
        year: series.year,
        unit: series.unit,
        interval,
        rows,
    }
}

/// Collapses a unit aggregation to one row per profile.
///
/// Each bin's value is weighted by its valid hours, so empty and fully
/// invalid bins do not pull the mean.
pub fn unit_interval_means(agg: &UnitAggregate) -> UnitMeans {
    let mut groups: BTreeMap<i64, Vec<&UnitBinRow>> = BTreeMap::new();
    for row in &agg.rows {
        groups.entry(row.profile_id).or_default().push(row);
    }

    let rows = groups
        .into_iter()
        .map(|(profile_id, bins)| {
            let weighted: f64 = bins
                .iter()
                .filter_map(|b| b.value.map(|v| v * b.valid_hours))
                .sum();
            let valid: f64 = bins.iter().map(|b| b.valid_hours).sum();
            let total: f64 = bins.iter().map(|b| b.total_hours).sum();
            UnitMeanRow {
                profile_id,
                answer_id: bins.iter().find_map(|b| b.answer_id),
                mean: (valid > 0.0).then(|| weighted / valid),
                valid_hours_of_total: (total > 0.0).then(|| valid / total),
            }
        })
        .collect();

    UnitMeans {
        year: agg.year,
        unit: agg.unit,
        interval: agg.interval,
        rows,
    }
}

pub fn daytype_of(dt: NaiveDateTime) -> Option<Daytype> {
    Daytype::from_weekday_index(dt.weekday().num_days_from_monday())
}

/// One `(ProfileID_i, month, daytype, hour)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct DaytypeRow {
    pub profile_id_i: i64,
    pub answer_id: i64,
    pub month: u32,
    pub daytype: Daytype,
    pub hour: u32,
    pub kw_mean: Option<f64>,
    pub kw_std: Option<f64>,
    pub kva_mean: Option<f64>,
    pub kva_std: Option<f64>,
    pub valid_hours: f64,
    pub total_hours_sum: f64,
    pub valid_obs_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DaytypeDemand {
    pub year: i32,
    pub schema: Schema,
    pub rows: Vec<DaytypeRow>,
}

#[derive(Default)]
struct DaytypeSlot {
    answer_id: i64,
    kw: Vec<f64>,
    kva: Vec<f64>,
    valid_hours: f64,
    total_hours: f64,
}

fn slot_kw(r: &PowerRecord, metered: bool) -> f64 {
    if metered {
        match (r.unitsread_kw, r.valid_kw) {
            (Some(kw), Some(valid)) => mask_invalid(kw, valid),
            _ => f64::NAN,
        }
    } else {
        mask_invalid(r.kw_calculated, r.valid_calculated)
    }
}

/// Hourly load shape per profile, month and day type.
pub fn aggregate_by_daytype(table: &PowerTable) -> DaytypeDemand {
    let metered = table.schema == Schema::Metered;
    let mut slots: BTreeMap<(i64, u32, Daytype, u32), DaytypeSlot> = BTreeMap::new();

    for r in &table.records {
        let Some(daytype) = daytype_of(r.datefield) else {
            continue;
        };
        let slot = slots
            .entry((r.profile_id_i, r.datefield.month(), daytype, r.datefield.hour()))
            .or_default();
        if slot.answer_id == 0 {
            slot.answer_id = r.answer_id;
        }
        slot.kw.push(slot_kw(r, metered));
        if metered {
            slot.kva.push(match (r.unitsread_kva, r.valid_kva) {
                (Some(kva), Some(valid)) => mask_invalid(kva, valid),
                _ => f64::NAN,
            });
        }
        slot.valid_hours += f64::from(r.valid_calculated);
        slot.total_hours += 1.0;
    }

    let rows = slots
        .into_iter()
        .map(|((profile_id_i, month, daytype, hour), slot)| {
            let (kw_mean, kw_std) = mean_std(&slot.kw);
            let (kva_mean, kva_std) = mean_std(&slot.kva);
            DaytypeRow {
                profile_id_i,
                answer_id: slot.answer_id,
                month,
                daytype,
                hour,
                kw_mean,
                kw_std,
                kva_mean,
                kva_std,
                valid_hours: slot.valid_hours,
                total_hours_sum: slot.total_hours,
                valid_obs_ratio: slot.valid_hours / slot.total_hours,
            }
        })
        .collect();

    DaytypeDemand {
        year: table.year,
        schema: table.schema,
        rows,
    }
}

/// One `(ProfileID_i, season, daytype, hour)` row.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalRow {
    pub profile_id_i: i64,
    pub answer_id: i64,
    pub season: Season,
    pub daytype: Daytype,
    pub hour: u32,
    pub kw_mean: Option<f64>,
    pub kw_std: Option<f64>,
    pub kva_mean: Option<f64>,
    pub kva_std: Option<f64>,
    pub valid_hours: f64,
    pub valid_obs_ratio: Option<f64>,
    pub total_hours_sum: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalDemand {
    pub year: i32,
    pub schema: Schema,
    pub rows: Vec<SeasonalRow>,
}

/// Re-aggregates the day-type table by season.
///
/// Means and deviations are averages of the monthly values (mean of means),
/// not recomputed from hourly data, so months with few valid hours weigh as
/// much as complete months.
pub fn aggregate_by_season(daytype: &DaytypeDemand) -> SeasonalDemand {
    let mut groups: BTreeMap<(i64, Season, Daytype, u32), Vec<&DaytypeRow>> = BTreeMap::new();
    for row in &daytype.rows {
        groups
            .entry((row.profile_id_i, Season::from_month(row.month), row.daytype, row.hour))
            .or_default()
            .push(row);
    }

    let rows = groups
        .into_iter()
        .map(|((profile_id_i, season, daytype, hour), months)| SeasonalRow {
            profile_id_i,
            answer_id: months.iter().map(|m| m.answer_id).find(|a| *a != 0).unwrap_or(0),
            season,
            daytype,
            hour,
            kw_mean: mean_of(months.iter().map(|m| m.kw_mean)),
            kw_std: mean_of(months.iter().map(|m| m.kw_std)),
            kva_mean: mean_of(months.iter().map(|m| m.kva_mean)),
            kva_std: mean_of(months.iter().map(|m| m.kva_std)),
            valid_hours: months.iter().map(|m| m.valid_hours).sum(),
            valid_obs_ratio: mean_of(months.iter().map(|m| Some(m.valid_obs_ratio))),
            total_hours_sum: months.iter().map(|m| m.total_hours_sum).sum(),
        })
        .collect();

    SeasonalDemand {
        year: daytype.year,
        schema: daytype.schema,
        rows,
    }
}

fn schema_column(schema: Schema, len: usize) -> Column {
    Series::new("schema".into(), vec![schema.as_str(); len]).into()
}

pub fn aggregate_to_dataframe(agg: &AggregateDemand) -> Result<DataFrame> {
    let r = &agg.rows;
    let dates: Vec<NaiveDateTime> = r.iter().map(|x| x.datefield).collect();
    let interval = agg.interval.dir_name();
    let mut columns: Vec<Column> = vec![
        Series::new("RecorderID".into(), r.iter().map(|x| x.recorder_id.as_str()).collect::<Vec<_>>()).into(),
        Series::new("ProfileID_i".into(), r.iter().map(|x| x.profile_id_i).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
        io::datetime_series("Datefield", &dates)?.into(),
        Series::new("Unitsread_i".into(), r.iter().map(|x| x.unitsread_i).collect::<Vec<_>>()).into(),
        Series::new("Unitsread_v".into(), r.iter().map(|x| x.unitsread_v).collect::<Vec<_>>()).into(),
    ];
    if agg.schema == Schema::Metered {
        columns.push(Series::new("Unitsread_kw".into(), r.iter().map(|x| x.unitsread_kw).collect::<Vec<_>>()).into());
        columns.push(Series::new("Unitsread_kva".into(), r.iter().map(|x| x.unitsread_kva).collect::<Vec<_>>()).into());
    }
    columns.extend([
        Series::new("kw_calculated".into(), r.iter().map(|x| x.kw_calculated).collect::<Vec<_>>()).into(),
        Series::new("valid_calculated".into(), r.iter().map(|x| x.valid_calculated).collect::<Vec<_>>()).into(),
        Series::new("interval_hours".into(), r.iter().map(|x| x.interval_hours).collect::<Vec<_>>()).into(),
        Series::new("valid_obs_ratio".into(), r.iter().map(|x| x.valid_obs_ratio).collect::<Vec<_>>()).into(),
        Series::new("interval".into(), vec![interval.as_str(); r.len()]).into(),
        schema_column(agg.schema, r.len()),
    ]);
    Ok(DataFrame::new(columns)?)
}

pub fn interval_demand_to_dataframe(demand: &IntervalDemand) -> Result<DataFrame> {
    let r = &demand.rows;
    let prefix = demand.interval.dir_name();
    let mut columns: Vec<Column> = vec![
        Series::new("RecorderID".into(), r.iter().map(|x| x.recorder_id.as_str()).collect::<Vec<_>>()).into(),
        Series::new("ProfileID_i".into(), r.iter().map(|x| x.profile_id_i).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
        Series::new(format!("{prefix}_kw_mean").as_str().into(), r.iter().map(|x| x.kw_mean).collect::<Vec<_>>()).into(),
        Series::new(format!("{prefix}_kw_std").as_str().into(), r.iter().map(|x| x.kw_std).collect::<Vec<_>>()).into(),
    ];
    if demand.schema == Schema::Metered {
        columns.push(Series::new(format!("{prefix}_kva_mean").as_str().into(), r.iter().map(|x| x.kva_mean).collect::<Vec<_>>()).into());
        columns.push(Series::new(format!("{prefix}_kva_std").as_str().into(), r.iter().map(|x| x.kva_std).collect::<Vec<_>>()).into());
    }
    columns.extend([
        Series::new("valid_hours".into(), r.iter().map(|x| x.valid_hours).collect::<Vec<_>>()).into(),
        Series::new("interval_hours_sum".into(), r.iter().map(|x| x.interval_hours_sum).collect::<Vec<_>>()).into(),
        Series::new("valid_obs_ratio".into(), r.iter().map(|x| x.valid_obs_ratio).collect::<Vec<_>>()).into(),
        Series::new("interval".into(), vec![prefix.as_str(); r.len()]).into(),
        schema_column(demand.schema, r.len()),
    ]);
    Ok(DataFrame::new(columns)?)
}

pub fn daytype_to_dataframe(demand: &DaytypeDemand) -> Result<DataFrame> {
    let r = &demand.rows;
    Ok(DataFrame::new(vec![
        Series::new("ProfileID_i".into(), r.iter().map(|x| x.profile_id_i).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
        Series::new("month".into(), r.iter().map(|x| i64::from(x.month)).collect::<Vec<_>>()).into(),
        Series::new("daytype".into(), r.iter().map(|x| x.daytype.as_str()).collect::<Vec<_>>()).into(),
        Series::new("hour".into(), r.iter().map(|x| i64::from(x.hour)).collect::<Vec<_>>()).into(),
        Series::new("kw_mean".into(), r.iter().map(|x| x.kw_mean).collect::<Vec<_>>()).into(),
        Series::new("kw_std".into(), r.iter().map(|x| x.kw_std).collect::<Vec<_>>()).into(),
        Series::new("kva_mean".into(), r.iter().map(|x| x.kva_mean).collect::<Vec<_>>()).into(),
        Series::new("kva_std".into(), r.iter().map(|x| x.kva_std).collect::<Vec<_>>()).into(),
        Series::new("valid_hours".into(), r.iter().map(|x| x.valid_hours).collect::<Vec<_>>()).into(),
        Series::new("total_hours_sum".into(), r.iter().map(|x| x.total_hours_sum).collect::<Vec<_>>()).into(),
        Series::new("valid_obs_ratio".into(), r.iter().map(|x| x.valid_obs_ratio).collect::<Vec<_>>()).into(),
        schema_column(demand.schema, r.len()),
    ])?)
}

/// Rebuilds a day-type table from its persisted form.
pub fn daytype_from_dataframe(df: &DataFrame, year: i32, path: &Path) -> Result<DaytypeDemand> {
    let mismatch = |message: String| PipelineError::SchemaMismatch {
        path: path.to_path_buf(),
        message,
    };
    for required in ["ProfileID_i", "month", "daytype", "hour", "kw_mean", "kw_std", "valid_hours", "total_hours_sum", "valid_obs_ratio"] {
        if !io::has_column(df, required) {
            return Err(mismatch(format!("missing column {required}")));
        }
    }
    let profile = io::i64_column(df, "ProfileID_i")?;
    let answer = if io::has_column(df, "AnswerID") {
        io::i64_column(df, "AnswerID")?
    } else {
        vec![None; df.height()]
    };
    let month = io::i64_column(df, "month")?;
    let daytype = io::str_column(df, "daytype")?;
    let hour = io::i64_column(df, "hour")?;
    let kw_mean = io::f64_column(df, "kw_mean")?;
    let kw_std = io::f64_column(df, "kw_std")?;
    let (kva_mean, kva_std) = if io::has_column(df, "kva_mean") && io::has_column(df, "kva_std") {
        (io::f64_column(df, "kva_mean")?, io::f64_column(df, "kva_std")?)
    } else {
        (vec![None; df.height()], vec![None; df.height()])
    };
    let valid_hours = io::f64_column(df, "valid_hours")?;
    let total_hours = io::f64_column(df, "total_hours_sum")?;
    let ratio = io::f64_column(df, "valid_obs_ratio")?;
    let schema = if io::has_column(df, "schema") {
        io::str_column(df, "schema")?
            .into_iter()
            .flatten()
            .next()
            .and_then(|s| Schema::parse(&s))
            .unwrap_or(Schema::Calculated)
    } else {
        Schema::Calculated
    };

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let parsed_daytype = daytype[i].as_deref().and_then(Daytype::parse);
        let (Some(profile_id_i), Some(month), Some(daytype), Some(hour)) = (
            profile[i],
            month[i].and_then(|m| u32::try_from(m).ok()),
            parsed_daytype,
            hour[i].and_then(|h| u32::try_from(h).ok()),
        ) else {
            return Err(mismatch(format!("incomplete key in row {i}")));
        };
        rows.push(DaytypeRow {
            profile_id_i,
            answer_id: answer[i].unwrap_or(0),
            month,
            daytype,
            hour,
            kw_mean: kw_mean[i].filter(|v| !v.is_nan()),
            kw_std: kw_std[i].filter(|v| !v.is_nan()),
            kva_mean: kva_mean[i].filter(|v| !v.is_nan()),
            kva_std: kva_std[i].filter(|v| !v.is_nan()),
            valid_hours: valid_hours[i].unwrap_or(0.0),
            total_hours_sum: total_hours[i].unwrap_or(0.0),
            valid_obs_ratio: ratio[i].unwrap_or(f64::NAN),
        });
    }
    Ok(DaytypeDemand { year, schema, rows })
}

pub fn seasonal_to_dataframe(demand: &SeasonalDemand) -> Result<DataFrame> {
    let r = &demand.rows;
    Ok(DataFrame::new(vec![
        Series::new("ProfileID_i".into(), r.iter().map(|x| x.profile_id_i).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
        Series::new("season".into(), r.iter().map(|x| x.season.as_str()).collect::<Vec<_>>()).into(),
        Series::new("daytype".into(), r.iter().map(|x| x.daytype.as_str()).collect::<Vec<_>>()).into(),
        Series::new("hour".into(), r.iter().map(|x| i64::from(x.hour)).collect::<Vec<_>>()).into(),
        Series::new("kw_mean".into(), r.iter().map(|x| x.kw_mean).collect::<Vec<_>>()).into(),
        Series::new("kw_std".into(), r.iter().map(|x| x.kw_std).collect::<Vec<_>>()).into(),
        Series::new("kva_mean".into(), r.iter().map(|x| x.kva_mean).collect::<Vec<_>>()).into(),
        Series::new("kva_std".into(), r.iter().map(|x| x.kva_std).collect::<Vec<_>>()).into(),
        Series::new("valid_hours".into(), r.iter().map(|x| x.valid_hours).collect::<Vec<_>>()).into(),
        Series::new("valid_obs_ratio".into(), r.iter().map(|x| x.valid_obs_ratio).collect::<Vec<_>>()).into(),
        Series::new("total_hours_sum".into(), r.iter().map(|x| x.total_hours_sum).collect::<Vec<_>>()).into(),
        schema_column(demand.schema, r.len()),
    ])?)
}

pub fn unit_aggregate_to_dataframe(agg: &UnitAggregate) -> Result<DataFrame> {
    let r = &agg.rows;
    let dates: Vec<NaiveDateTime> = r.iter().map(|x| x.datefield).collect();
    let value_name = format!("Mean_{}_{}", agg.interval.dir_name(), agg.unit);
    Ok(DataFrame::new(vec![
        Series::new("ProfileID".into(), r.iter().map(|x| x.profile_id).collect::<Vec<_>>()).into(),
        io::datetime_series("Datefield", &dates)?.into(),
        Series::new(value_name.as_str().into(), r.iter().map(|x| x.value).collect::<Vec<_>>()).into(),
        Series::new("ValidHours".into(), r.iter().map(|x| x.valid_hours).collect::<Vec<_>>()).into(),
        Series::new("TotalHours".into(), r.iter().map(|x| x.total_hours).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
    ])?)
}

pub fn unit_means_to_dataframe(means: &UnitMeans) -> Result<DataFrame> {
    let r = &means.rows;
    let mean_name = format!("AnnualMean_{}_{}", means.interval.dir_name(), means.unit);
    Ok(DataFrame::new(vec![
        Series::new("ProfileID".into(), r.iter().map(|x| x.profile_id).collect::<Vec<_>>()).into(),
        Series::new(mean_name.as_str().into(), r.iter().map(|x| x.mean).collect::<Vec<_>>()).into(),
        Series::new("ValidHoursOfTotal".into(), r.iter().map(|x| x.valid_hours_of_total).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sample_std_needs_two_values() {
        assert_eq!(mean_std(&[]), (None, None));
        assert_eq!(mean_std(&[f64::NAN, 2.0]), (Some(2.0), None));
        let (mean, std) = mean_std(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(mean.unwrap(), 2.5);
        assert_relative_eq!(std.unwrap(), 1.2909944487358056, epsilon = 1e-12);
    }
}
