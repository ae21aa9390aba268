//! Model lifecycle manager
//!
//! Owns the active detector behind an atomically swapped `Arc`: readers
//! always score against a fully trained, immutable instance, and
//! retraining publishes a fresh detector instead of mutating the one in
//! flight. A process-wide singleton is available through `global()`;
//! tests and embedders can run their own instances.

use std::path::Path;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::dataset::{self, Table};
use crate::detector::{
    AnomalyResult, BatchReport, Detector, ModelInfo, ReportStatus, TrainingReport,
};
use crate::error::{DetectError, Result};
use crate::model::ModelKind;

static GLOBAL: OnceLock<ModelManager> = OnceLock::new();

/// Process-wide manager, lazily constructed with default configuration
/// on first access.
pub fn global() -> &'static ModelManager {
    GLOBAL.get_or_init(|| ModelManager::new(DetectorConfig::default()))
}

/// Facade over the active detector: train, predict, persist, replace.
pub struct ModelManager {
    config: DetectorConfig,
    slot: RwLock<Arc<Detector>>,
}

impl ModelManager {
    /// Start with an untrained outlier detector. `load_persisted` or the
    /// first successful training replaces it.
    pub fn new(config: DetectorConfig) -> Self {
        let detector = Detector::new(ModelKind::Outlier, config.clone());
        Self {
            config,
            slot: RwLock::new(Arc::new(detector)),
        }
    }

    /// Snapshot of the currently active detector.
    pub fn active(&self) -> Arc<Detector> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, detector: Detector) -> Arc<Detector> {
        let detector = Arc::new(detector);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = detector.clone();
        detector
    }

    /// Restore the persisted detector, if any. Absent artifacts leave
    /// the active detector unchanged; only I/O and decode problems are
    /// errors.
    pub fn load_persisted(&self) -> anyhow::Result<Arc<Detector>> {
        match Detector::from_persisted(self.config.clone())? {
            Some(detector) => Ok(self.publish(detector)),
            None => Ok(self.active()),
        }
    }

    /// Train a fresh detector of the active kind on a raw series and
    /// publish it when training succeeds. The report is returned either
    /// way; a failed fit leaves the previous detector active.
    pub fn train(&self, series: &[f32], contamination: f32) -> Result<TrainingReport> {
        let mut detector = Detector::new(self.active().kind(), self.config.clone());
        let report = detector.fit(series, contamination)?;
        if report.status == ReportStatus::Success {
            self.publish(detector);
        }
        Ok(report)
    }

    /// Predict against the active detector, attempting a one-shot load
    /// of persisted state when it has never been trained.
    pub fn predict(&self, series: &[f32]) -> Result<Vec<AnomalyResult>> {
        self.trained_detector()?.predict(series)
    }

    /// Per-series batch prediction with the same lazy-load behavior.
    pub fn predict_batch(&self, batch: &[Vec<f32>]) -> Result<BatchReport> {
        Ok(self.trained_detector()?.predict_batch(batch))
    }

    fn trained_detector(&self) -> Result<Arc<Detector>> {
        let active = self.active();
        if active.is_trained() {
            return Ok(active);
        }

        match self.load_persisted() {
            Ok(loaded) if loaded.is_trained() => Ok(loaded),
            Ok(_) => Err(DetectError::NotTrained),
            Err(err) => {
                warn!("failed to load persisted model: {err:#}");
                Err(DetectError::NotTrained)
            }
        }
    }

    /// Update the anomaly threshold, publishing an adjusted copy of the
    /// active detector. Validation happens before any swap.
    pub fn set_threshold(&self, threshold: f32) -> Result<()> {
        let mut detector = (*self.active()).clone();
        detector.set_threshold(threshold)?;
        self.publish(detector);
        Ok(())
    }

    pub fn info(&self) -> ModelInfo {
        self.active().info()
    }

    /// Full training pipeline from a CSV file: prepare windows, train a
    /// reconstruction detector with the configured contamination, publish
    /// it. Deliberately fail-soft: any failure, including an out-of-range
    /// configured contamination, is logged and reported as `false`, never
    /// raised, so a hosting service survives bad training data.
    pub fn train_from_dataset<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        match self.train_from_dataset_inner(path) {
            Ok(report) if report.status == ReportStatus::Success => {
                info!(?path, samples = report.samples_trained, "dataset training complete");
                true
            }
            Ok(report) => {
                warn!(
                    ?path,
                    message = report.message.as_deref().unwrap_or("unknown"),
                    "dataset training failed"
                );
                false
            }
            Err(err) => {
                warn!(?path, "dataset training failed: {err}");
                false
            }
        }
    }

    fn train_from_dataset_inner(&self, path: &Path) -> Result<TrainingReport> {
        let table = Table::from_csv_path(path)?;
        let length = self.config.reconstruction.seq_length;
        let prepared = dataset::prepare(&table, length, None)?;
        if prepared.windows.is_empty() {
            return Err(DetectError::DataFormat(format!(
                "dataset has {} rows, need at least {} for one window",
                table.len(),
                length
            )));
        }

        let mut detector = Detector::new(ModelKind::Reconstruction, self.config.clone());
        let report = detector.fit_prepared(&prepared, self.config.contamination)?;
        if report.status == ReportStatus::Success {
            self.publish(detector);
        }
        Ok(report)
    }
}
