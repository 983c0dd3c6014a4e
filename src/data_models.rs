use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::InputError;
use crate::interval::Interval;

/// Physical quantity recorded by a metering channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    A,
    V,
    Hz,
    KVA,
    KW,
}

impl Unit {
    /// Order in which units are materialised by a full reduction pass.
    pub const ALL: [Unit; 5] = [Unit::A, Unit::V, Unit::KVA, Unit::Hz, Unit::KW];

    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::A => "A",
            Unit::V => "V",
            Unit::Hz => "Hz",
            Unit::KVA => "kVA",
            Unit::KW => "kW",
        }
    }

    /// Energy channels add up over a bin; the others are averaged.
    pub fn is_summed(&self) -> bool {
        matches!(self, Unit::KW | Unit::KVA)
    }

    /// Code used by the `Unit of measurement` column of the profiles table.
    pub fn from_measurement_code(code: i64) -> Option<Unit> {
        match code {
            1 => Some(Unit::V),
            2 => Some(Unit::A),
            3 => Some(Unit::Hz),
            4 => Some(Unit::KVA),
            5 => Some(Unit::KW),
            _ => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Unit::A),
            "V" => Ok(Unit::V),
            "Hz" => Ok(Unit::Hz),
            "kVA" => Ok(Unit::KVA),
            "kW" => Ok(Unit::KW),
            other => Err(InputError::InvalidUnit(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Parquet,
    Csv,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FileFormat::Parquet => "parquet",
            FileFormat::Csv => "csv",
        }
    }

    pub fn from_extension(ext: &str) -> Option<FileFormat> {
        match ext.to_lowercase().as_str() {
            "parquet" => Some(FileFormat::Parquet),
            "csv" => Some(FileFormat::Csv),
            _ => None,
        }
    }
}

impl FromStr for FileFormat {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileFormat::from_extension(s).ok_or_else(|| InputError::InvalidFormat(s.to_string()))
    }
}

/// One raw 5-minute observation after normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub recorder_id: String,
    pub profile_id: i64,
    pub datefield: NaiveDateTime,
    /// NaN when the source value was missing or unparseable.
    pub unitsread: f64,
    pub valid: u8,
}

/// One interval bin of one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedRecord {
    #[serde(rename = "RecorderID")]
    pub recorder_id: String,
    #[serde(rename = "ProfileID")]
    pub profile_id: i64,
    #[serde(rename = "Datefield", with = "datefield_format")]
    pub datefield: NaiveDateTime,
    #[serde(
        rename = "Unitsread",
        serialize_with = "serialize_nan_as_empty",
        deserialize_with = "deserialize_float_or_nan"
    )]
    pub unitsread: f64,
    #[serde(rename = "Valid")]
    pub valid: u8,
    #[serde(rename = "ValidCount")]
    pub valid_count: u32,
    #[serde(rename = "Count")]
    pub count: u32,
}

/// Reduced table for one (year, unit, interval).
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedSeries {
    pub year: i32,
    pub unit: Unit,
    pub interval: Interval,
    pub records: Vec<ReducedRecord>,
}

impl ReducedSeries {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Sorts by (RecorderID, ProfileID, Datefield) and removes exact duplicate rows.
    pub fn normalize(&mut self) {
        self.records.sort_by(|a, b| {
            (&a.recorder_id, a.profile_id, a.datefield)
                .cmp(&(&b.recorder_id, b.profile_id, b.datefield))
                .then(a.unitsread.total_cmp(&b.unitsread))
                .then(a.valid.cmp(&b.valid))
        });
        self.records.dedup_by(|a, b| {
            a.recorder_id == b.recorder_id
                && a.profile_id == b.profile_id
                && a.datefield == b.datefield
                && a.unitsread.to_bits() == b.unitsread.to_bits()
                && a.valid == b.valid
                && a.valid_count == b.valid_count
                && a.count == b.count
        });
    }
}

/// Metadata for one profile (metering channel) as resolved from the survey tables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfileMeta {
    pub profile_id: i64,
    pub recorder_id: String,
    pub channel_no: Option<i64>,
    pub unit_code: Option<i64>,
    pub group_id: i64,
    /// 0 when the profile is not linked to a survey response.
    pub answer_id: i64,
    pub survey: Option<String>,
    pub year: i32,
    pub loc_name: Option<String>,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub province: Option<String>,
    pub municipality: Option<String>,
    pub district: Option<String>,
}

impl ProfileMeta {
    pub fn unit(&self) -> Option<Unit> {
        self.unit_code.and_then(Unit::from_measurement_code)
    }

    pub fn is_linked(&self) -> bool {
        self.profile_id != 0 && self.answer_id != 0
    }
}

/// Which power columns a year's reconstruction carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schema {
    /// Only current x voltage estimates.
    Calculated,
    /// Directly metered kW and kVA alongside the calculated estimate.
    Metered,
}

impl Schema {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schema::Calculated => "calculated",
            Schema::Metered => "metered",
        }
    }

    pub fn parse(s: &str) -> Option<Schema> {
        match s {
            "calculated" => Some(Schema::Calculated),
            "metered" => Some(Schema::Metered),
            _ => None,
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconstructed power observation for a current profile at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerRecord {
    pub recorder_id: String,
    pub profile_id_i: i64,
    pub profile_id_v: i64,
    pub answer_id: i64,
    pub datefield: NaiveDateTime,
    pub unitsread_i: f64,
    pub valid_i: u8,
    pub unitsread_v: f64,
    pub valid_v: u8,
    pub unitsread_kw: Option<f64>,
    pub valid_kw: Option<u8>,
    pub unitsread_kva: Option<f64>,
    pub valid_kva: Option<u8>,
    pub kw_calculated: f64,
    pub valid_calculated: u8,
}

/// Reconstructed power for one year together with the schema it was built with.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerTable {
    pub year: i32,
    pub schema: Schema,
    pub records: Vec<PowerRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Daytype {
    Weekday,
    Saturday,
    Sunday,
}

impl Daytype {
    /// Half-open bins over a Monday-based day index: [0,5) Weekday, [5,6) Saturday, [6,7) Sunday.
    pub fn from_weekday_index(ix: u32) -> Option<Daytype> {
        match ix {
            ix if ix < 5 => Some(Daytype::Weekday),
            5 => Some(Daytype::Saturday),
            6 => Some(Daytype::Sunday),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Daytype::Weekday => "Weekday",
            Daytype::Saturday => "Saturday",
            Daytype::Sunday => "Sunday",
        }
    }

    pub fn parse(s: &str) -> Option<Daytype> {
        match s {
            "Weekday" => Some(Daytype::Weekday),
            "Saturday" => Some(Daytype::Saturday),
            "Sunday" => Some(Daytype::Sunday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Season {
    High,
    Low,
}

impl Season {
    /// May to August is the high-demand (winter) season.
    pub fn from_month(month: u32) -> Season {
        match month {
            5..=8 => Season::High,
            _ => Season::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::High => "high",
            Season::Low => "low",
        }
    }
}

pub mod datefield_format {
    use chrono::NaiveDateTime;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
    const READ_FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];

    pub fn parse(s: &str) -> Option<NaiveDateTime> {
        let trimmed = s.trim();
        READ_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
            .or_else(|| {
                chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
    }

    pub fn serialize<S>(dt: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.format(WRITE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid Datefield '{s}'")))
    }
}

/// Parses a float that may use a comma as decimal separator.
pub fn parse_comma_decimal(s: &str) -> Result<f64, std::num::ParseFloatError> {
    s.replace(',', ".").parse::<f64>()
}

/// Empty or unparseable numeric cells become NaN instead of failing the row.
pub(crate) fn deserialize_float_or_nan<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let opt_s: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt_s
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| parse_comma_decimal(s).ok())
        .unwrap_or(f64::NAN))
}

/// Integer cells are sometimes exported as floats ("1234.0").
pub(crate) fn parse_whole_number(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        parse_comma_decimal(trimmed)
            .ok()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

/// Writes NaN as an empty cell so csv tables read back the same way raw exports do.
pub(crate) fn serialize_nan_as_empty<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if value.is_nan() {
        serializer.serialize_none()
    } else {
        serializer.serialize_f64(*value)
    }
}
