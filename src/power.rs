use chrono::NaiveDateTime;
use log::{info, warn};
use polars::prelude::*;
use std::collections::HashMap;

use crate::config::{PairedChannelOffsets, PipelineConfig};
use crate::data_models::{
    PowerRecord, PowerTable, ProfileMeta, ReducedRecord, ReducedSeries, Schema, Unit,
};
use crate::errors::{valid_years, PipelineError, Result};
use crate::identity::IdentityResolver;
use crate::interval::Interval;
use crate::io;
use crate::store::ProfileStore;

/// Last year of the shared-voltage recorder generation.
pub const SHARED_VOLTAGE_LAST_YEAR: i32 = 2009;

/// How current, voltage and power channels relate on a recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// Up to 12 current channels share the voltage channel(s) of their recorder.
    SharedVoltage,
    /// Each current channel has its own voltage channel, with kW and kVA on fixed offsets.
    PairedChannel,
}

impl Topology {
    pub fn for_year(year: i32) -> Result<Topology> {
        valid_years(&[year])?;
        if year <= SHARED_VOLTAGE_LAST_YEAR {
            Ok(Topology::SharedVoltage)
        } else {
            Ok(Topology::PairedChannel)
        }
    }
}

/// Metered when the year is in the paired-channel era and its metadata lists kW and kVA channels.
pub fn select_schema(year: i32, metadata: &[ProfileMeta]) -> Schema {
    if year <= SHARED_VOLTAGE_LAST_YEAR {
        return Schema::Calculated;
    }
    let has = |unit: Unit| metadata.iter().any(|m| m.unit() == Some(unit));
    if has(Unit::KW) && has(Unit::KVA) {
        Schema::Metered
    } else {
        Schema::Calculated
    }
}

type SeriesIndex<'s> = HashMap<(i64, NaiveDateTime), &'s ReducedRecord>;

fn index_series(series: &ReducedSeries) -> SeriesIndex<'_> {
    series
        .records
        .iter()
        .map(|r| ((r.profile_id, r.datefield), r))
        .collect()
}

pub(crate) fn answer_ids(metadata: &[ProfileMeta]) -> HashMap<i64, i64> {
    let mut answers = HashMap::new();
    for meta in metadata.iter().filter(|m| m.is_linked()) {
        answers.entry(meta.profile_id).or_insert(meta.answer_id);
    }
    answers
}

fn power_record(
    recorder_id: &str,
    current: &ReducedRecord,
    voltage: &ReducedRecord,
    answer_id: i64,
) -> PowerRecord {
    PowerRecord {
        recorder_id: recorder_id.to_string(),
        profile_id_i: current.profile_id,
        profile_id_v: voltage.profile_id,
        answer_id,
        datefield: current.datefield,
        unitsread_i: current.unitsread,
        valid_i: current.valid,
        unitsread_v: voltage.unitsread,
        valid_v: voltage.valid,
        unitsread_kw: None,
        valid_kw: None,
        unitsread_kva: None,
        valid_kva: None,
        kw_calculated: voltage.unitsread * current.unitsread * 1e-3,
        valid_calculated: current.valid & voltage.valid,
    }
}

/// Joins current to voltage through the voltage channels of the same recorder.
pub fn reconstruct_shared_voltage(
    current: &ReducedSeries,
    voltage: &ReducedSeries,
    metadata: &[ProfileMeta],
) -> Vec<PowerRecord> {
    let mut voltage_channels: HashMap<&str, Vec<i64>> = HashMap::new();
    for meta in metadata.iter().filter(|m| m.unit() == Some(Unit::V)) {
        let channels = voltage_channels.entry(meta.recorder_id.as_str()).or_default();
        if !channels.contains(&meta.profile_id) {
            channels.push(meta.profile_id);
        }
    }
    let voltage_index = index_series(voltage);
    let answers = answer_ids(metadata);

    let mut out = Vec::new();
    for i in &current.records {
        let Some(channels) = voltage_channels.get(i.recorder_id.as_str()) else {
            continue;
        };
        for v_profile in channels {
            if let Some(v) = voltage_index.get(&(*v_profile, i.datefield)) {
                let answer = answers.get(&i.profile_id).copied().unwrap_or(0);
                out.push(power_record(&v.recorder_id, i, v, answer));
            }
        }
    }
    out
}

/// Joins current to its own voltage channel and, when given, to metered kW and kVA channels.
pub fn reconstruct_paired(
    current: &ReducedSeries,
    voltage: &ReducedSeries,
    metered: Option<(&ReducedSeries, &ReducedSeries)>,
    offsets: PairedChannelOffsets,
    metadata: &[ProfileMeta],
) -> Vec<PowerRecord> {
    let voltage_index = index_series(voltage);
    let metered_index = metered.map(|(kw, kva)| (index_series(kw), index_series(kva)));
    let answers = answer_ids(metadata);

    let mut out = Vec::new();
    for i in &current.records {
        let Some(v) = voltage_index.get(&(i.profile_id + offsets.voltage, i.datefield)) else {
            continue;
        };
        let answer = answers.get(&i.profile_id).copied().unwrap_or(0);
        let mut record = power_record(&i.recorder_id, i, v, answer);
        if let Some((kw_index, kva_index)) = &metered_index {
            if let Some(kw) = kw_index.get(&(i.profile_id + offsets.kw, i.datefield)) {
                record.unitsread_kw = Some(kw.unitsread);
                record.valid_kw = Some(kw.valid);
            }
            if let Some(kva) = kva_index.get(&(i.profile_id + offsets.kva, i.datefield)) {
                record.unitsread_kva = Some(kva.unitsread);
                record.valid_kva = Some(kva.valid);
            }
        }
        out.push(record);
    }
    out
}

pub struct PowerReconstructor<'a> {
    config: &'a PipelineConfig,
    store: ProfileStore<'a>,
    resolver: &'a dyn IdentityResolver,
}

impl<'a> PowerReconstructor<'a> {
    pub fn new(config: &'a PipelineConfig, resolver: &'a dyn IdentityResolver) -> Self {
        Self {
            config,
            store: ProfileStore::new(config),
            resolver,
        }
    }

    fn load_metered(&self, year: i32) -> Result<(ReducedSeries, ReducedSeries)> {
        let kw = self.store.load(year, Unit::KW, Interval::HOURLY)?;
        let kva = self.store.load(year, Unit::KVA, Interval::HOURLY)?;
        Ok((kw, kva))
    }

    /// Builds the power table for `year` using the matching rule of its recorder era.
    pub fn reconstruct(&self, year: i32) -> Result<PowerTable> {
        let topology = Topology::for_year(year)?;
        let metadata = self.resolver.profile_metadata(year)?;
        let current = self.store.load(year, Unit::A, Interval::HOURLY)?;
        let voltage = self.store.load(year, Unit::V, Interval::HOURLY)?;

        let (schema, mut records) = match topology {
            Topology::SharedVoltage => (
                Schema::Calculated,
                reconstruct_shared_voltage(&current, &voltage, &metadata),
            ),
            Topology::PairedChannel => {
                let offsets = self.config.paired_offsets;
                let metered = match select_schema(year, &metadata) {
                    Schema::Metered => match self.load_metered(year) {
                        Ok(tables) => Some(tables),
                        Err(e) if e.is_soft() => {
                            warn!("Metered kW/kVA unavailable for {}, using calculated power only: {}", year, e);
                            None
                        }
                        Err(e) => return Err(e),
                    },
                    Schema::Calculated => {
                        warn!("No metered kW/kVA channels listed for {}; using calculated power only", year);
                        None
                    }
                };
                let schema = if metered.is_some() {
                    Schema::Metered
                } else {
                    Schema::Calculated
                };
                let records = reconstruct_paired(
                    &current,
                    &voltage,
                    metered.as_ref().map(|(kw, kva)| (kw, kva)),
                    offsets,
                    &metadata,
                );
                (schema, records)
            }
        };

        if records.is_empty() {
            return Err(PipelineError::missing(format!(
                "matching current and voltage readings for {year}"
            )));
        }
        records.sort_by(|a, b| {
            (&a.recorder_id, a.profile_id_i, a.datefield, a.profile_id_v)
                .cmp(&(&b.recorder_id, b.profile_id_i, b.datefield, b.profile_id_v))
        });
        info!(
            "Reconstructed {} power records for {} ({:?}, {} schema)",
            records.len(),
            year,
            topology,
            schema
        );
        Ok(PowerTable {
            year,
            schema,
            records,
        })
    }
}

pub fn power_to_dataframe(table: &PowerTable) -> Result<DataFrame> {
    let r = &table.records;
    let dates: Vec<NaiveDateTime> = r.iter().map(|x| x.datefield).collect();
    let mut columns: Vec<Column> = vec![
        Series::new("RecorderID".into(), r.iter().map(|x| x.recorder_id.as_str()).collect::<Vec<_>>()).into(),
        Series::new("ProfileID_i".into(), r.iter().map(|x| x.profile_id_i).collect::<Vec<_>>()).into(),
        Series::new("ProfileID_v".into(), r.iter().map(|x| x.profile_id_v).collect::<Vec<_>>()).into(),
        Series::new("AnswerID".into(), r.iter().map(|x| x.answer_id).collect::<Vec<_>>()).into(),
        io::datetime_series("Datefield", &dates)?.into(),
        Series::new("Unitsread_i".into(), r.iter().map(|x| x.unitsread_i).collect::<Vec<_>>()).into(),
        Series::new("Valid_i".into(), r.iter().map(|x| i64::from(x.valid_i)).collect::<Vec<_>>()).into(),
        Series::new("Unitsread_v".into(), r.iter().map(|x| x.unitsread_v).collect::<Vec<_>>()).into(),
        Series::new("Valid_v".into(), r.iter().map(|x| i64::from(x.valid_v)).collect::<Vec<_>>()).into(),
    ];
    if table.schema == Schema::Metered {
        columns.push(Series::new("Unitsread_kw".into(), r.iter().map(|x| x.unitsread_kw).collect::<Vec<_>>()).into());
        columns.push(Series::new("Valid_kw".into(), r.iter().map(|x| x.valid_kw.map(i64::from)).collect::<Vec<_>>()).into());
        columns.push(Series::new("Unitsread_kva".into(), r.iter().map(|x| x.unitsread_kva).collect::<Vec<_>>()).into());
        columns.push(Series::new("Valid_kva".into(), r.iter().map(|x| x.valid_kva.map(i64::from)).collect::<Vec<_>>()).into());
    }
    columns.push(Series::new("kw_calculated".into(), r.iter().map(|x| x.kw_calculated).collect::<Vec<_>>()).into());
    columns.push(Series::new("valid_calculated".into(), r.iter().map(|x| i64::from(x.valid_calculated)).collect::<Vec<_>>()).into());
    columns.push(Series::new("schema".into(), vec![table.schema.as_str(); r.len()]).into());
    Ok(DataFrame::new(columns)?)
}
