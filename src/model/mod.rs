//! Scoring model backends
//!
//! Two paradigms behind one capability interface: a density-based
//! outlier model trained on independent samples, and a sequence
//! reconstruction model trained on windows. The variant is selected at
//! construction and tagged explicitly.

pub mod isolation_forest;
pub mod reconstruction;

pub use isolation_forest::{ForestConfig, IsolationForest};
pub use reconstruction::{
    ReconstructionConfig, ReconstructionModel, SeqAutoencoder, TrainedAutoencoder,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Model paradigm tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Density-based outlier scoring over independent samples.
    Outlier,
    /// Sequence autoencoder scoring by reconstruction error.
    Reconstruction,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Outlier => "isolation_forest",
            ModelKind::Reconstruction => "reconstruction",
        }
    }
}

/// Capability shared by both scoring backends.
pub trait AnomalyModel {
    /// Score a sample (higher = more anomalous). Fails when not trained.
    fn score(&self, sample: &[f32]) -> Result<f32>;

    /// Native anomaly decision for a sample.
    fn predict(&self, sample: &[f32]) -> Result<bool>;

    /// Model name tag.
    fn name(&self) -> &'static str;

    /// Whether fit has completed (or trained state was loaded).
    fn is_trained(&self) -> bool;
}

impl AnomalyModel for IsolationForest {
    fn score(&self, sample: &[f32]) -> Result<f32> {
        if !self.is_trained() {
            return Err(crate::error::DetectError::NotTrained);
        }
        Ok(self.score_sample(sample))
    }

    fn predict(&self, sample: &[f32]) -> Result<bool> {
        if !self.is_trained() {
            return Err(crate::error::DetectError::NotTrained);
        }
        Ok(self.is_anomaly(sample))
    }

    fn name(&self) -> &'static str {
        ModelKind::Outlier.as_str()
    }

    fn is_trained(&self) -> bool {
        IsolationForest::is_trained(self)
    }
}

impl AnomalyModel for ReconstructionModel {
    fn score(&self, sample: &[f32]) -> Result<f32> {
        self.score_window(sample)
    }

    fn predict(&self, sample: &[f32]) -> Result<bool> {
        self.is_anomalous(sample)
    }

    fn name(&self) -> &'static str {
        ModelKind::Reconstruction.as_str()
    }

    fn is_trained(&self) -> bool {
        ReconstructionModel::is_trained(self)
    }
}

/// Tagged scoring backend, persisted as the primary model artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelVariant {
    Outlier(IsolationForest),
    Reconstruction(ReconstructionModel),
}

impl ModelVariant {
    pub fn kind(&self) -> ModelKind {
        match self {
            ModelVariant::Outlier(_) => ModelKind::Outlier,
            ModelVariant::Reconstruction(_) => ModelKind::Reconstruction,
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            ModelVariant::Outlier(m) => m.is_trained(),
            ModelVariant::Reconstruction(m) => m.is_trained(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectError;

    #[test]
    fn test_kind_tags() {
        assert_eq!(ModelKind::Outlier.as_str(), "isolation_forest");
        assert_eq!(ModelKind::Reconstruction.as_str(), "reconstruction");
    }

    #[test]
    fn test_untrained_capability_guard() {
        let forest = IsolationForest::default();
        assert!(matches!(
            AnomalyModel::score(&forest, &[1.0]),
            Err(DetectError::NotTrained)
        ));

        let recon = ReconstructionModel::new(ReconstructionConfig::default());
        assert!(matches!(
            AnomalyModel::score(&recon, &vec![0.0; 30]),
            Err(DetectError::NotTrained)
        ));
    }

    #[test]
    fn test_variant_kind() {
        let v = ModelVariant::Outlier(IsolationForest::default());
        assert_eq!(v.kind(), ModelKind::Outlier);
        assert!(!v.is_trained());
    }
}
