//! Model persistence
//!
//! Saves and loads the two artifacts of a trained model: the serialized
//! scoring backend and the serialized scaler it was fit with, plus a JSON
//! metadata sidecar. Missing artifacts are the normal "not yet trained"
//! state, not an error.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::model::{ModelKind, ModelVariant};
use crate::scaler::ScalerState;

/// Metadata stored next to the model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Storage format version.
    pub version: u32,
    /// When the artifacts were saved.
    pub saved_at: DateTime<Utc>,
    /// Which scoring backend is persisted.
    pub kind: ModelKind,
    /// Samples used to fit the model.
    pub sample_count: u64,
    /// Threshold in effect when saved.
    pub threshold: f32,
}

impl ModelMetadata {
    pub fn new(kind: ModelKind, sample_count: u64, threshold: f32) -> Self {
        Self {
            version: 1,
            saved_at: Utc::now(),
            kind,
            sample_count,
            threshold,
        }
    }
}

/// Storage manager for trained-model artifacts.
#[derive(Debug, Clone)]
pub struct ModelStore {
    config: StorageConfig,
}

impl ModelStore {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn model_path(&self) -> &Path {
        &self.config.model_path
    }

    pub fn scaler_path(&self) -> &Path {
        &self.config.scaler_path
    }

    fn metadata_path(&self) -> PathBuf {
        self.config.model_path.with_extension("json")
    }

    /// Create parent directories for the artifact paths.
    pub fn init(&self) -> std::io::Result<()> {
        for path in [&self.config.model_path, &self.config.scaler_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }

    /// Both artifacts present on disk.
    pub fn has_model(&self) -> bool {
        self.config.model_path.exists() && self.config.scaler_path.exists()
    }

    /// Persist model, scaler and metadata. Directories are created first.
    pub fn save(
        &self,
        variant: &ModelVariant,
        scaler: &ScalerState,
        metadata: &ModelMetadata,
    ) -> anyhow::Result<()> {
        self.init()?;

        let file = File::create(&self.config.model_path)?;
        bincode::serialize_into(BufWriter::new(file), variant)?;

        let file = File::create(&self.config.scaler_path)?;
        bincode::serialize_into(BufWriter::new(file), scaler)?;

        let content = serde_json::to_string_pretty(metadata)?;
        fs::write(self.metadata_path(), content)?;

        info!(
            "saved {} model ({} samples) to {:?}",
            metadata.kind.as_str(),
            metadata.sample_count,
            self.config.model_path
        );
        Ok(())
    }

    /// Load the persisted model and scaler. Returns `Ok(None)` when
    /// either artifact is absent; both must be present and consistent.
    pub fn load(&self) -> anyhow::Result<Option<(ModelVariant, ScalerState, ModelMetadata)>> {
        if !self.has_model() {
            debug!("no persisted model at {:?}", self.config.model_path);
            return Ok(None);
        }

        let file = File::open(&self.config.model_path)?;
        let variant: ModelVariant = bincode::deserialize_from(BufReader::new(file))?;

        let file = File::open(&self.config.scaler_path)?;
        let scaler: ScalerState = bincode::deserialize_from(BufReader::new(file))?;

        let metadata = match fs::read_to_string(self.metadata_path()) {
            Ok(content) => serde_json::from_str(&content)?,
            // Sidecar is best-effort; reconstruct the essentials.
            Err(_) => ModelMetadata::new(variant.kind(), 0, 0.0),
        };

        if metadata.kind != variant.kind() {
            anyhow::bail!(
                "metadata kind {} does not match persisted model {}",
                metadata.kind.as_str(),
                variant.kind().as_str()
            );
        }

        info!(
            "loaded {} model from {:?}",
            variant.kind().as_str(),
            self.config.model_path
        );
        Ok(Some((variant, scaler, metadata)))
    }
}
