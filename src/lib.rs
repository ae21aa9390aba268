//! Time-series anomaly detection for single-feature data.
//!
//! The pipeline loads a tabular dataset, min-max normalizes one column
//! and slices it into fixed-length overlapping windows, then fits one of
//! two scoring backends: an isolation forest over independent samples or
//! a recurrent autoencoder scoring windows by reconstruction error. A
//! lifecycle manager persists trained state and publishes new detectors
//! by atomic pointer swap, so scoring always runs against an immutable,
//! fully trained instance.

pub mod config;
pub mod dataset;
pub mod detector;
pub mod error;
pub mod manager;
pub mod model;
pub mod scaler;
pub mod storage;
pub mod trainer;

pub use config::DetectorConfig;
pub use dataset::{prepare, Prepared, Table};
pub use detector::{
    AnomalyResult, BatchReport, Detector, ModelInfo, ReportStatus, TrainingReport,
};
pub use error::{DetectError, Result};
pub use manager::{global, ModelManager};
pub use model::{AnomalyModel, ModelKind, ModelVariant};
