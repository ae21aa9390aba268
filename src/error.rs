//! Error taxonomy for the detection pipeline.
//!
//! Data and numeric failures are caught at the nearest orchestration
//! boundary (`Detector::fit`, `ModelManager::train_from_dataset`) and
//! converted into structured reports. Only input-validation errors
//! (`Range`, `NotTrained`) propagate to the immediate caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("model is not trained; call fit() or load a persisted model first")]
    NotTrained,

    #[error("data format error: {0}")]
    DataFormat(String),

    #[error("{name} must be within [{min}, {max}], got {value}")]
    Range {
        name: &'static str,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("training failed: {0}")]
    Training(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// Range check helper used at API boundaries before any mutation.
    pub fn check_range(name: &'static str, value: f32, min: f32, max: f32) -> Result<f32> {
        if value.is_nan() || value < min || value > max {
            return Err(DetectError::Range {
                name,
                value,
                min,
                max,
            });
        }
        Ok(value)
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
