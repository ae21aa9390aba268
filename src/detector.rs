//! Anomaly detector facade
//!
//! Binds a scoring backend to the scaler it was fit with and exposes the
//! train/score/predict surface. Training is fail-soft: input-validation
//! errors propagate as typed failures, anything that goes wrong inside
//! the fit itself is folded into a status=error report so a hosting
//! service never crashes on bad training data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::DetectorConfig;
use crate::dataset::{self, NormalizationParams, Prepared};
use crate::error::{DetectError, Result};
use crate::model::{
    IsolationForest, ModelKind, ModelVariant, ReconstructionModel,
};
use crate::scaler::{ScalerState, StandardScaler};
use crate::storage::{ModelMetadata, ModelStore};
use crate::trainer::Trainer;

/// Outcome tag for training and batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    /// Some batch entries failed, the rest completed.
    Partial,
    Error,
}

/// Result of a training run. Produced even when training fails, with
/// `status` set to `Error` and the cause in `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub status: ReportStatus,
    pub message: Option<String>,
    pub samples_trained: usize,
    pub mean_score: f32,
    pub min_score: f32,
    pub max_score: f32,
    pub timestamp: DateTime<Utc>,
}

impl TrainingReport {
    fn success(samples: usize, scores: &[f32]) -> Self {
        let (mean, min, max) = score_stats(scores);
        Self {
            status: ReportStatus::Success,
            message: None,
            samples_trained: samples,
            mean_score: mean,
            min_score: min,
            max_score: max,
            timestamp: Utc::now(),
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: ReportStatus::Error,
            message: Some(message),
            samples_trained: 0,
            mean_score: 0.0,
            min_score: 0.0,
            max_score: 0.0,
            timestamp: Utc::now(),
        }
    }
}

fn score_stats(scores: &[f32]) -> (f32, f32, f32) {
    if scores.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mean = scores.iter().sum::<f32>() / scores.len() as f32;
    (mean, min, max)
}

/// Score and native anomaly decision for one sample or window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub score: f32,
    /// 1 when the model's native decision marks the sample anomalous.
    pub label: u8,
}

/// Per-series outcome inside a batch report. A failed series carries its
/// error message and empty scores; other series are unaffected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesResult {
    pub status: ReportStatus,
    pub message: Option<String>,
    pub scores: Vec<f32>,
    pub labels: Vec<u8>,
    pub is_anomalous: bool,
}

/// Result of `predict_batch`: one entry per input series, in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub status: ReportStatus,
    pub series: Vec<SeriesResult>,
    pub timestamp: DateTime<Utc>,
}

/// Model metadata snapshot. Pure, no side effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub kind: ModelKind,
    pub trained: bool,
    pub threshold: f32,
    pub model_path: PathBuf,
    pub scaler_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// A scoring backend plus the scaler fit alongside it.
///
/// Immutable once trained and published: callers score through `&self`,
/// and retraining builds a fresh detector rather than mutating one that
/// is already visible to readers.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    variant: ModelVariant,
    scaler: ScalerState,
    store: ModelStore,
    threshold: f32,
    sample_count: u64,
}

impl Detector {
    /// Construct an untrained detector of the given kind.
    pub fn new(kind: ModelKind, config: DetectorConfig) -> Self {
        let variant = match kind {
            ModelKind::Outlier => ModelVariant::Outlier(IsolationForest::new(config.forest.clone())),
            ModelKind::Reconstruction => {
                ModelVariant::Reconstruction(ReconstructionModel::new(config.reconstruction.clone()))
            }
        };
        let scaler = match kind {
            ModelKind::Outlier => ScalerState::Standard(StandardScaler::new()),
            ModelKind::Reconstruction => {
                ScalerState::MinMax(NormalizationParams { min: 0.0, max: 0.0 })
            }
        };
        let threshold = config.reconstruction.error_threshold;
        let store = ModelStore::new(config.storage.clone());
        Self {
            config,
            variant,
            scaler,
            store,
            threshold,
            sample_count: 0,
        }
    }

    /// Restore a detector from persisted artifacts. `Ok(None)` when no
    /// artifacts exist, which is the normal not-yet-trained state.
    pub fn from_persisted(config: DetectorConfig) -> anyhow::Result<Option<Self>> {
        let store = ModelStore::new(config.storage.clone());
        let Some((variant, scaler, metadata)) = store.load()? else {
            return Ok(None);
        };
        Ok(Some(Self {
            config,
            variant,
            scaler,
            store,
            threshold: metadata.threshold,
            sample_count: metadata.sample_count,
        }))
    }

    pub fn kind(&self) -> ModelKind {
        self.variant.kind()
    }

    pub fn is_trained(&self) -> bool {
        self.variant.is_trained()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Fit the backend on a raw series and persist the trained state.
    ///
    /// `contamination` is the expected fraction of anomalous samples; it
    /// calibrates the outlier-decision boundary and is advisory for the
    /// reconstruction backend. Out-of-range contamination propagates as a
    /// typed range error; failures inside the fit itself come back as a
    /// status=error report.
    pub fn fit(&mut self, series: &[f32], contamination: f32) -> Result<TrainingReport> {
        DetectError::check_range("contamination", contamination, 0.0, 0.5)?;

        match self.fit_inner(series, contamination) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!("training failed: {err:#}");
                Ok(TrainingReport::error(err.to_string()))
            }
        }
    }

    fn fit_inner(&mut self, series: &[f32], contamination: f32) -> anyhow::Result<TrainingReport> {
        if matches!(self.variant, ModelVariant::Reconstruction(_)) {
            let (normalized, params) = dataset::normalize(series);
            let length = self.config.reconstruction.seq_length;
            let windows = dataset::windows(&normalized, length);
            return self.fit_windows_inner(&Prepared { windows, params });
        }

        let samples = to_samples(series);
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&samples)?;

        let ModelVariant::Outlier(forest) = &mut self.variant else {
            unreachable!("reconstruction handled above");
        };
        let scores = forest.fit(&scaled, contamination)?;
        self.scaler = ScalerState::Standard(scaler);
        self.sample_count = samples.len() as u64;
        let report = TrainingReport::success(samples.len(), &scores);

        self.persist()?;
        info!(
            samples = report.samples_trained,
            kind = self.kind().as_str(),
            "model trained"
        );
        Ok(report)
    }

    /// Fit the reconstruction backend on already-prepared windows.
    /// `contamination` is validated like in `fit` and advisory beyond
    /// that. Fails on a detector constructed for the outlier backend.
    pub fn fit_prepared(&mut self, prepared: &Prepared, contamination: f32) -> Result<TrainingReport> {
        DetectError::check_range("contamination", contamination, 0.0, 0.5)?;
        if !matches!(self.variant, ModelVariant::Reconstruction(_)) {
            return Err(DetectError::DataFormat(
                "prepared windows require a reconstruction model".to_string(),
            ));
        }
        match self.fit_windows_inner(prepared) {
            Ok(report) => Ok(report),
            Err(err) => {
                warn!("training failed: {err:#}");
                Ok(TrainingReport::error(err.to_string()))
            }
        }
    }

    fn fit_windows_inner(&mut self, prepared: &Prepared) -> anyhow::Result<TrainingReport> {
        if prepared.windows.is_empty() {
            anyhow::bail!("not enough data for one window");
        }

        let mut trainer = Trainer::new(
            self.config.reconstruction.clone(),
            self.config.training.clone(),
        );
        let trained = trainer.train(&prepared.windows)?;
        let scores: Vec<f32> = prepared.windows.iter().map(|w| trained.score(w)).collect();
        let count = prepared.windows.len();

        match &mut self.variant {
            ModelVariant::Reconstruction(model) => model.set_trained(trained),
            ModelVariant::Outlier(_) => unreachable!("checked by callers"),
        }
        self.scaler = ScalerState::MinMax(prepared.params);
        self.sample_count = count as u64;

        self.persist()?;
        info!(
            windows = count,
            kind = self.kind().as_str(),
            "model trained"
        );
        Ok(TrainingReport::success(count, &scores))
    }

    fn persist(&self) -> anyhow::Result<()> {
        let metadata = ModelMetadata::new(self.kind(), self.sample_count, self.threshold);
        self.store.save(&self.variant, &self.scaler, &metadata)
    }

    /// Anomaly scores for a raw series: one per sample for the outlier
    /// backend, one per window for the reconstruction backend.
    pub fn score(&self, series: &[f32]) -> Result<Vec<f32>> {
        if !self.is_trained() {
            return Err(DetectError::NotTrained);
        }

        match (&self.variant, &self.scaler) {
            (ModelVariant::Outlier(forest), ScalerState::Standard(scaler)) => {
                let scaled = scaler.transform(&to_samples(series))?;
                Ok(scaled.iter().map(|s| forest.score_sample(s)).collect())
            }
            (ModelVariant::Reconstruction(model), ScalerState::MinMax(params)) => {
                let windows = self.windows_of(series, params)?;
                windows.iter().map(|w| model.score_window(w)).collect()
            }
            _ => Err(DetectError::DataFormat(
                "persisted scaler does not match model kind".to_string(),
            )),
        }
    }

    /// Scores plus the model's native anomaly decision for each entry.
    pub fn predict(&self, series: &[f32]) -> Result<Vec<AnomalyResult>> {
        if !self.is_trained() {
            return Err(DetectError::NotTrained);
        }

        match (&self.variant, &self.scaler) {
            (ModelVariant::Outlier(forest), ScalerState::Standard(scaler)) => {
                let scaled = scaler.transform(&to_samples(series))?;
                Ok(scaled
                    .iter()
                    .map(|s| AnomalyResult {
                        score: forest.score_sample(s),
                        label: forest.is_anomaly(s) as u8,
                    })
                    .collect())
            }
            (ModelVariant::Reconstruction(model), ScalerState::MinMax(params)) => {
                let windows = self.windows_of(series, params)?;
                windows
                    .iter()
                    .map(|w| {
                        let score = model.score_window(w)?;
                        Ok(AnomalyResult {
                            score,
                            label: (score > self.threshold) as u8,
                        })
                    })
                    .collect()
            }
            _ => Err(DetectError::DataFormat(
                "persisted scaler does not match model kind".to_string(),
            )),
        }
    }

    fn windows_of(&self, series: &[f32], params: &NormalizationParams) -> Result<Vec<Vec<f32>>> {
        let normalized = params.apply_all(series);
        let windows = dataset::windows(&normalized, self.config.reconstruction.seq_length);
        if windows.is_empty() {
            return Err(DetectError::DataFormat(format!(
                "series of length {} is shorter than one window ({})",
                series.len(),
                self.config.reconstruction.seq_length
            )));
        }
        Ok(windows)
    }

    /// Predict each series independently. A failing series is isolated:
    /// its entry carries status=error and the message, the other series
    /// still complete, and the overall status downgrades to `Partial`
    /// (or `Error` when every series failed).
    pub fn predict_batch(&self, batch: &[Vec<f32>]) -> BatchReport {
        let mut series = Vec::with_capacity(batch.len());
        let mut failures = 0usize;

        for input in batch {
            match self.predict(input) {
                Ok(results) => {
                    let scores = results.iter().map(|r| r.score).collect();
                    let labels: Vec<u8> = results.iter().map(|r| r.label).collect();
                    let is_anomalous = labels.iter().any(|&l| l == 1);
                    series.push(SeriesResult {
                        status: ReportStatus::Success,
                        message: None,
                        scores,
                        labels,
                        is_anomalous,
                    });
                }
                Err(err) => {
                    warn!("batch series failed: {err}");
                    failures += 1;
                    series.push(SeriesResult {
                        status: ReportStatus::Error,
                        message: Some(err.to_string()),
                        scores: Vec::new(),
                        labels: Vec::new(),
                        is_anomalous: false,
                    });
                }
            }
        }

        let status = if failures == 0 {
            ReportStatus::Success
        } else if failures == batch.len() && !batch.is_empty() {
            ReportStatus::Error
        } else {
            ReportStatus::Partial
        };

        BatchReport {
            status,
            series,
            timestamp: Utc::now(),
        }
    }

    /// Set the anomaly threshold governing label derivation for the
    /// reconstruction backend. Rejected outside [0, 1], both ends
    /// inclusive, before any state changes.
    pub fn set_threshold(&mut self, threshold: f32) -> Result<()> {
        DetectError::check_range("threshold", threshold, 0.0, 1.0)?;
        self.threshold = threshold;
        if let ModelVariant::Reconstruction(model) = &mut self.variant {
            model.set_threshold(threshold);
        }
        Ok(())
    }

    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            kind: self.kind(),
            trained: self.is_trained(),
            threshold: self.threshold,
            model_path: self.store.model_path().to_path_buf(),
            scaler_path: self.store.scaler_path().to_path_buf(),
            timestamp: Utc::now(),
        }
    }
}

/// Single-feature series as independent one-dimensional samples.
fn to_samples(series: &[f32]) -> Vec<Vec<f32>> {
    series.iter().map(|&v| vec![v]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> DetectorConfig {
        DetectorConfig {
            storage: StorageConfig {
                model_path: dir.path().join("model.bin"),
                scaler_path: dir.path().join("scaler.bin"),
            },
            ..Default::default()
        }
    }

    fn ramp(n: usize) -> Vec<f32> {
        (1..=n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_fit_ramp_reports_success() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));

        let report = detector.fit(&ramp(100), 0.1).unwrap();
        assert_eq!(report.status, ReportStatus::Success);
        assert_eq!(report.samples_trained, 100);
        assert!(report.min_score <= report.mean_score);
        assert!(report.mean_score <= report.max_score);
        assert!(detector.is_trained());
    }

    #[test]
    fn test_contamination_out_of_range_propagates() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));

        let err = detector.fit(&ramp(100), 0.9).unwrap_err();
        assert!(matches!(err, DetectError::Range { name: "contamination", .. }));
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_empty_series_is_fail_soft() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));

        let report = detector.fit(&[], 0.1).unwrap();
        assert_eq!(report.status, ReportStatus::Error);
        assert!(report.message.is_some());
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let dir = TempDir::new().unwrap();
        let detector = Detector::new(ModelKind::Outlier, config_in(&dir));
        assert!(matches!(
            detector.predict(&ramp(10)),
            Err(DetectError::NotTrained)
        ));
        assert!(matches!(
            detector.score(&ramp(10)),
            Err(DetectError::NotTrained)
        ));
    }

    #[test]
    fn test_outlier_labels() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));
        detector.fit(&ramp(100), 0.1).unwrap();

        let mut series = ramp(100);
        series[60] = 1000.0;
        let results = detector.predict(&series).unwrap();

        assert_eq!(results[60].label, 1, "injected outlier should be flagged");
        assert_eq!(results[49].label, 0, "mid-range value should pass");
    }

    #[test]
    fn test_scoring_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));
        detector.fit(&ramp(100), 0.1).unwrap();

        let series = ramp(50);
        let a = detector.score(&series).unwrap();
        let b = detector.score(&series).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_threshold_validation() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Reconstruction, config_in(&dir));

        assert!(detector.set_threshold(-0.1).is_err());
        assert!(detector.set_threshold(1.5).is_err());
        assert!(detector.set_threshold(0.0).is_ok());
        assert!(detector.set_threshold(1.0).is_ok());
        assert_eq!(detector.threshold(), 1.0);
    }

    #[test]
    fn test_fit_prepared_validates_contamination() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Reconstruction, config_in(&dir));
        let prepared = Prepared {
            windows: vec![vec![0.0; 30]],
            params: NormalizationParams { min: 0.0, max: 1.0 },
        };

        let err = detector.fit_prepared(&prepared, 123.0).unwrap_err();
        assert!(matches!(err, DetectError::Range { name: "contamination", .. }));
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Reconstruction, config_in(&dir));
        let series = ramp(120);
        let (normalized, params) = dataset::normalize(&series);
        let prepared = Prepared {
            windows: dataset::windows(&normalized, 30),
            params,
        };
        let report = detector.fit_prepared(&prepared, 0.1).unwrap();
        assert_eq!(report.status, ReportStatus::Success);

        // Second entry is too short to window and must fail alone.
        let batch = vec![ramp(120), ramp(5)];
        let report = detector.predict_batch(&batch);
        assert_eq!(report.status, ReportStatus::Partial);
        assert_eq!(report.series[0].status, ReportStatus::Success);
        assert_eq!(report.series[1].status, ReportStatus::Error);
        assert!(report.series[1].message.is_some());
    }

    #[test]
    fn test_batch_all_succeed() {
        let dir = TempDir::new().unwrap();
        let mut detector = Detector::new(ModelKind::Outlier, config_in(&dir));
        detector.fit(&ramp(100), 0.1).unwrap();

        let mut spiked = ramp(100);
        spiked[50] = 1000.0;
        let report = detector.predict_batch(&[ramp(100), spiked]);

        assert_eq!(report.status, ReportStatus::Success);
        assert!(!report.series[0].is_anomalous);
        assert!(report.series[1].is_anomalous);
    }

    #[test]
    fn test_persisted_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let mut detector = Detector::new(ModelKind::Outlier, config.clone());
        detector.fit(&ramp(100), 0.1).unwrap();
        let before = detector.score(&ramp(50)).unwrap();

        let restored = Detector::from_persisted(config).unwrap().unwrap();
        assert!(restored.is_trained());
        assert_eq!(restored.kind(), ModelKind::Outlier);
        assert_eq!(restored.score(&ramp(50)).unwrap(), before);
    }

    #[test]
    fn test_from_persisted_absent_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Detector::from_persisted(config_in(&dir)).unwrap().is_none());
    }

    #[test]
    fn test_info_snapshot() {
        let dir = TempDir::new().unwrap();
        let detector = Detector::new(ModelKind::Reconstruction, config_in(&dir));

        let info = detector.info();
        assert_eq!(info.kind, ModelKind::Reconstruction);
        assert!(!info.trained);
        assert_eq!(info.threshold, 0.02);
        assert_eq!(info.model_path, dir.path().join("model.bin"));
    }
}
