//! Detector configuration
//!
//! All tunables in one serde tree: storage paths, the expected
//! contamination fraction, and the per-backend model and training
//! parameters. Loadable from TOML; every section has defaults.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ForestConfig, ReconstructionConfig};
use crate::trainer::TrainingConfig;

/// Paths for the two persisted artifacts of a trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Serialized scoring model.
    pub model_path: PathBuf,
    /// Serialized feature scaler, fit on the same data as the model.
    pub scaler_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/model.bin"),
            scaler_path: PathBuf::from("models/scaler.bin"),
        }
    }
}

/// Top-level detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Expected fraction of anomalous samples in training data. Used as
    /// the contamination input for dataset training and validated there.
    #[serde(default = "default_contamination")]
    pub contamination: f32,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub forest: ForestConfig,

    #[serde(default)]
    pub reconstruction: ReconstructionConfig,

    #[serde(default)]
    pub training: TrainingConfig,
}

fn default_contamination() -> f32 {
    0.1
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: default_contamination(),
            storage: StorageConfig::default(),
            forest: ForestConfig::default(),
            reconstruction: ReconstructionConfig::default(),
            training: TrainingConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {:?}", path))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config from {:?}", path))?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize config")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write config to {:?}", path.as_ref()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DetectorConfig::default();
        assert_eq!(config.contamination, 0.1);
        assert_eq!(config.reconstruction.error_threshold, 0.02);
        assert_eq!(config.reconstruction.seq_length, 30);
        assert_eq!(config.training.epochs, 50);
        assert_eq!(config.storage.model_path, PathBuf::from("models/model.bin"));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = DetectorConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: DetectorConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(parsed.contamination, config.contamination);
        assert_eq!(parsed.forest.num_trees, config.forest.num_trees);
        assert_eq!(
            parsed.reconstruction.error_threshold,
            config.reconstruction.error_threshold
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: DetectorConfig = toml::from_str("contamination = 0.05\n").unwrap();
        assert_eq!(parsed.contamination, 0.05);
        assert_eq!(parsed.training.batch_size, 32);
        assert_eq!(parsed.forest.seed, 42);
    }

    #[test]
    fn test_empty_toml_is_all_defaults() {
        let parsed: DetectorConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.contamination, 0.1);
        assert_eq!(parsed.storage.model_path, PathBuf::from("models/model.bin"));
    }

    #[test]
    fn test_save_load_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = DetectorConfig::default();
        config.contamination = 0.2;
        config.save(&path).unwrap();

        let loaded = DetectorConfig::load(&path).unwrap();
        assert_eq!(loaded.contamination, 0.2);
    }
}
