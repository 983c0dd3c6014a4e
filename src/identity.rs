use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::data_models::{parse_whole_number, ProfileMeta};
use crate::errors::{valid_years, PipelineError, Result};
use crate::io;

/// Source of profile metadata for a study year.
pub trait IdentityResolver: Send + Sync {
    fn profile_metadata(&self, year: i32) -> Result<Vec<ProfileMeta>>;
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(rename = "ProfileId", alias = "ProfileID")]
    profile_id: i64,
    #[serde(rename = "RecorderID", default)]
    recorder_id: Option<String>,
    #[serde(rename = "ChannelNo", default)]
    channel_no: Option<i64>,
    #[serde(rename = "Unit of measurement", default)]
    unit_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LinkRow {
    #[serde(rename = "GroupID", default)]
    group_id: Option<i64>,
    #[serde(rename = "AnswerID", default)]
    answer_id: Option<i64>,
    #[serde(rename = "ProfileID", default)]
    profile_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GroupRow {
    #[serde(rename = "GroupID")]
    group_id: i64,
    #[serde(rename = "Survey", default)]
    survey: Option<String>,
    #[serde(rename = "Year", default)]
    year: Option<String>,
    #[serde(rename = "LocName", default)]
    loc_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeoRow {
    #[serde(rename = "GPSName")]
    gps_name: String,
    #[serde(rename = "Lat", default)]
    lat: Option<f64>,
    #[serde(rename = "Long", default)]
    long: Option<f64>,
    #[serde(rename = "Province", default)]
    province: Option<String>,
    #[serde(rename = "Municipality", default)]
    municipality: Option<String>,
    #[serde(rename = "District", default)]
    district: Option<String>,
}

/// Resolves profile metadata from the `profiles`, `links`, `groups` and
/// optional `site_geo` tables exported to `tables_dir`.
pub struct TableIdentityResolver {
    tables_dir: PathBuf,
    all_ids: OnceCell<Vec<ProfileMeta>>,
}

impl TableIdentityResolver {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            tables_dir: config.tables_dir.clone(),
            all_ids: OnceCell::new(),
        }
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.tables_dir.join(format!("{name}.csv"))
    }

    fn load_table<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        let path = self.table_path(name);
        if !path.exists() {
            return Err(PipelineError::missing(format!("table {}", path.display())));
        }
        io::read_records_csv(&path)
    }

    /// Every linked profile across all years, loaded once.
    pub fn all_ids(&self) -> Result<&[ProfileMeta]> {
        let ids = self.all_ids.get_or_try_init(|| {
            let profiles: Vec<ProfileRow> = self.load_table("profiles")?;
            let links: Vec<LinkRow> = self.load_table("links")?;
            let groups: Vec<GroupRow> = self.load_table("groups")?;
            let geo = self.load_geo()?;
            let ids = link_profiles(profiles, links, groups, &geo);
            info!("Resolved {} profile identities from {}", ids.len(), self.tables_dir.display());
            Ok::<_, PipelineError>(ids)
        })?;
        Ok(ids)
    }

    fn load_geo(&self) -> Result<Vec<GeoRow>> {
        let path = self.table_path("site_geo");
        if !path.exists() {
            debug!("No site_geo table at {}; geography left empty", path.display());
            return Ok(Vec::new());
        }
        io::read_records_csv(&path)
    }
}

impl IdentityResolver for TableIdentityResolver {
    fn profile_metadata(&self, year: i32) -> Result<Vec<ProfileMeta>> {
        valid_years(&[year])?;
        Ok(self
            .all_ids()?
            .iter()
            .filter(|m| m.year == year)
            .cloned()
            .collect())
    }
}

/// Joins profiles to groups through group links and to survey answers through answer links.
fn link_profiles(
    profiles: Vec<ProfileRow>,
    links: Vec<LinkRow>,
    groups: Vec<GroupRow>,
    geo: &[GeoRow],
) -> Vec<ProfileMeta> {
    let mut profile_groups: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut profile_answers: HashMap<i64, Vec<i64>> = HashMap::new();
    for link in &links {
        let group = link.group_id.unwrap_or(0);
        let Some(profile) = link.profile_id.filter(|p| *p != 0) else {
            continue;
        };
        if group != 0 {
            profile_groups.entry(profile).or_default().push(group);
        } else if let Some(answer) = link.answer_id.filter(|a| *a != 0) {
            profile_answers.entry(profile).or_default().push(answer);
        }
    }

    let groups_by_id: HashMap<i64, &GroupRow> = groups.iter().map(|g| (g.group_id, g)).collect();
    let geo_by_name: HashMap<&str, &GeoRow> =
        geo.iter().map(|g| (g.gps_name.trim(), g)).collect();

    let mut out = Vec::new();
    for profile in profiles {
        let Some(group_ids) = profile_groups.get(&profile.profile_id) else {
            continue;
        };
        let answers = profile_answers
            .get(&profile.profile_id)
            .cloned()
            .unwrap_or_else(|| vec![0]);

        for group_id in group_ids {
            let Some(group) = groups_by_id.get(group_id) else {
                continue;
            };
            if group.survey.as_deref().map(str::trim) == Some("Namibia") {
                continue;
            }
            let Some(year) = group
                .year
                .as_deref()
                .and_then(parse_whole_number)
                .and_then(|y| i32::try_from(y).ok())
            else {
                continue;
            };
            let location = group
                .loc_name
                .as_deref()
                .and_then(|name| geo_by_name.get(name.trim()).copied());

            for &answer_id in &answers {
                out.push(ProfileMeta {
                    profile_id: profile.profile_id,
                    recorder_id: profile.recorder_id.clone().unwrap_or_default(),
                    channel_no: profile.channel_no,
                    unit_code: profile.unit_code,
                    group_id: *group_id,
                    answer_id,
                    survey: group.survey.clone(),
                    year,
                    loc_name: group.loc_name.clone(),
                    lat: location.and_then(|l| l.lat),
                    long: location.and_then(|l| l.long),
                    province: location.and_then(|l| l.province.clone()),
                    municipality: location.and_then(|l| l.municipality.clone()),
                    district: location.and_then(|l| l.district.clone()),
                });
            }
        }
    }
    if out.is_empty() {
        warn!("No profiles could be linked to a survey group");
    }
    out
}

/// Serves preloaded metadata.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdentityResolver {
    metadata: Vec<ProfileMeta>,
}

impl InMemoryIdentityResolver {
    pub fn new(metadata: Vec<ProfileMeta>) -> Self {
        Self { metadata }
    }
}

impl IdentityResolver for InMemoryIdentityResolver {
    fn profile_metadata(&self, year: i32) -> Result<Vec<ProfileMeta>> {
        valid_years(&[year])?;
        Ok(self
            .metadata
            .iter()
            .filter(|m| m.year == year)
            .cloned()
            .collect())
    }
}
