use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::data_models::FileFormat;
use crate::errors::ConfigError;

/// ProfileID offsets, relative to the current channel, used for paired-channel recorders.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairedChannelOffsets {
    pub voltage: i64,
    pub kw: i64,
    pub kva: i64,
}

impl Default for PairedChannelOffsets {
    fn default() -> Self {
        Self {
            voltage: 1,
            kw: -3,
            kva: -2,
        }
    }
}

/// Directory layout and tuning knobs shared by every component.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub raw_profiles_dir: PathBuf,
    pub tables_dir: PathBuf,
    pub resampled_dir: PathBuf,
    #[serde(default)]
    pub default_format: FileFormat,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub paired_offsets: PairedChannelOffsets,
    #[serde(default = "default_value_ceiling")]
    pub value_ceiling: f64,
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_value_ceiling() -> f64 {
    1000.0
}

impl PipelineConfig {
    /// Standard layout below a single data root.
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            raw_profiles_dir: root.join("observations").join("profiles").join("raw"),
            tables_dir: root.join("observations").join("tables"),
            resampled_dir: root.join("resampled_profiles"),
            default_format: FileFormat::default(),
            workers: default_workers(),
            paired_offsets: PairedChannelOffsets::default(),
            value_ceiling: default_value_ceiling(),
        }
    }

    /// Loads a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let file = File::open(&path).map_err(|e| ConfigError::IoError {
            path: path.clone(),
            source: e,
        })?;
        let reader = BufReader::new(file);
        let config: PipelineConfig =
            serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
                path: path.clone(),
                source: e,
            })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Builds from `DLR_DATA_DIR`, then applies `DLR_WORKERS` and `DLR_FORMAT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let root = std::env::var("DLR_DATA_DIR").map_err(|_| ConfigError::InvalidEnv {
            var: "DLR_DATA_DIR".to_string(),
            value: String::new(),
        })?;
        let mut config = Self::from_root(root);
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(workers) = std::env::var("DLR_WORKERS") {
            self.workers = workers
                .parse::<usize>()
                .ok()
                .filter(|w| *w > 0)
                .ok_or(ConfigError::InvalidEnv {
                    var: "DLR_WORKERS".to_string(),
                    value: workers.clone(),
                })?;
        }
        if let Ok(format) = std::env::var("DLR_FORMAT") {
            self.default_format =
                FileFormat::from_extension(&format).ok_or(ConfigError::InvalidEnv {
                    var: "DLR_FORMAT".to_string(),
                    value: format.clone(),
                })?;
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn agg_profiles_dir(&self) -> PathBuf {
        self.resampled_dir.join("aggProfiles")
    }

    pub fn feature_cache_dir(&self) -> PathBuf {
        self.resampled_dir.join("X")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_layout() {
        let config = PipelineConfig::from_root("/data");
        assert_eq!(config.raw_profiles_dir, PathBuf::from("/data/observations/profiles/raw"));
        assert_eq!(config.tables_dir, PathBuf::from("/data/observations/tables"));
        assert_eq!(config.resampled_dir, PathBuf::from("/data/resampled_profiles"));
        assert_eq!(config.paired_offsets, PairedChannelOffsets { voltage: 1, kw: -3, kva: -2 });
        assert_eq!(config.value_ceiling, 1000.0);
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"raw_profiles_dir":"raw","tables_dir":"tables","resampled_dir":"out","default_format":"csv"}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.default_format, FileFormat::Csv);
        assert!(config.workers >= 1);
        assert_eq!(config.paired_offsets, PairedChannelOffsets::default());
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = PipelineConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
