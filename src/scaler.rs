//! Feature standardization
//!
//! Per-feature mean/std scaling, fit exactly once during training. The
//! scoring-time transform must be identical to the training-time
//! transform, so `transform` never refits.

use serde::{Deserialize, Serialize};

use crate::dataset::NormalizationParams;
use crate::error::{DetectError, Result};

/// Standard (z-score) scaler over fixed-width samples.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f32>,
    std: Vec<f32>,
    fitted: bool,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Fit per-feature mean and standard deviation.
    /// All samples must share the same width.
    pub fn fit(&mut self, data: &[Vec<f32>]) -> Result<()> {
        if data.is_empty() {
            return Err(DetectError::DataFormat(
                "cannot fit scaler on empty data".to_string(),
            ));
        }

        let width = data[0].len();
        if width == 0 || data.iter().any(|s| s.len() != width) {
            return Err(DetectError::DataFormat(
                "samples must share a non-zero feature width".to_string(),
            ));
        }

        let n = data.len() as f64;
        let mut mean = vec![0.0f64; width];
        for sample in data {
            for (m, &v) in mean.iter_mut().zip(sample) {
                *m += v as f64;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0f64; width];
        for sample in data {
            for ((v, &x), m) in var.iter_mut().zip(sample).zip(&mean) {
                let d = x as f64 - m;
                *v += d * d;
            }
        }

        self.mean = mean.iter().map(|&m| m as f32).collect();
        self.std = var
            .iter()
            .map(|&v| {
                let s = (v / n).sqrt() as f32;
                // Constant features scale to zero rather than dividing by zero.
                if s > 0.0 {
                    s
                } else {
                    1.0
                }
            })
            .collect();
        self.fitted = true;

        Ok(())
    }

    /// Apply the fitted transform. Fails when never fitted or when the
    /// sample width differs from the training width.
    pub fn transform(&self, data: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        if !self.fitted {
            return Err(DetectError::NotTrained);
        }

        data.iter()
            .map(|sample| {
                if sample.len() != self.mean.len() {
                    return Err(DetectError::DataFormat(format!(
                        "sample width {} does not match fitted width {}",
                        sample.len(),
                        self.mean.len()
                    )));
                }
                Ok(sample
                    .iter()
                    .zip(self.mean.iter().zip(&self.std))
                    .map(|(&v, (&m, &s))| (v - m) / s)
                    .collect())
            })
            .collect()
    }

    /// Fit then transform in one pass over the training data.
    pub fn fit_transform(&mut self, data: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        self.fit(data)?;
        self.transform(data)
    }
}

/// Persisted scaling state: one of the two preprocessing transforms a
/// trained model depends on. Saved as the second model artifact so
/// loading restores the exact training-time feature space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalerState {
    /// Z-score standardization (outlier model).
    Standard(StandardScaler),
    /// Min-max normalization (reconstruction model).
    MinMax(NormalizationParams),
}
