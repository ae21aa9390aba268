//! Reconstruction model training
//!
//! Training loop for the sequence autoencoder: shuffled mini-batches,
//! a held-out validation split for monitoring, loss history with an
//! early-stop check, and threshold-based anomaly flagging of windows.

use std::collections::VecDeque;

use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DetectError, Result};
use crate::model::reconstruction::{ReconstructionConfig, SeqAutoencoder, TrainedAutoencoder};

/// Training loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of passes over the training windows.
    pub epochs: usize,
    /// Windows per gradient step.
    pub batch_size: usize,
    /// Fraction of windows held out for validation monitoring.
    pub validation_split: f32,
    /// Epochs without improvement before stopping early.
    pub patience: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            validation_split: 0.2,
            patience: 10,
        }
    }
}

/// Trainer for the sequence autoencoder.
#[derive(Debug)]
pub struct Trainer {
    recon: ReconstructionConfig,
    training: TrainingConfig,
    /// Per-epoch loss history for monitoring.
    loss_history: VecDeque<f32>,
    max_history: usize,
}

impl Trainer {
    pub fn new(recon: ReconstructionConfig, training: TrainingConfig) -> Self {
        Self {
            recon,
            training,
            loss_history: VecDeque::with_capacity(256),
            max_history: 256,
        }
    }

    /// Build an untrained network for the configured architecture.
    pub fn build(&self) -> SeqAutoencoder {
        SeqAutoencoder::build(&self.recon)
    }

    fn record_loss(&mut self, loss: f32) {
        if self.loss_history.len() >= self.max_history {
            self.loss_history.pop_front();
        }
        self.loss_history.push_back(loss);
    }

    /// Mean of the recorded epoch losses.
    pub fn average_loss(&self) -> f32 {
        if self.loss_history.is_empty() {
            return 0.0;
        }
        self.loss_history.iter().sum::<f32>() / self.loss_history.len() as f32
    }

    /// True when the best loss of the last `patience` epochs is no better
    /// than the best of the `patience` epochs before them.
    pub fn should_stop_early(&self) -> bool {
        let patience = self.training.patience;
        if patience == 0 || self.loss_history.len() < patience * 2 {
            return false;
        }

        let recent: Vec<f32> = self.loss_history.iter().rev().take(patience).copied().collect();
        let older: Vec<f32> = self
            .loss_history
            .iter()
            .rev()
            .skip(patience)
            .take(patience)
            .copied()
            .collect();

        let recent_min = recent.iter().cloned().fold(f32::MAX, f32::min);
        let older_min = older.iter().cloned().fold(f32::MAX, f32::min);

        recent_min >= older_min
    }

    /// Train on fixed-length windows, minimizing mean-squared
    /// reconstruction error. A 20% validation split (when enough windows
    /// exist) is scored each epoch for monitoring only.
    pub fn train(&mut self, windows: &[Vec<f32>]) -> Result<TrainedAutoencoder> {
        if windows.is_empty() {
            return Err(DetectError::DataFormat(
                "no windows to train on".to_string(),
            ));
        }

        let expected = self.recon.seq_length * self.recon.feature_count;
        if windows.iter().any(|w| w.len() != expected) {
            return Err(DetectError::DataFormat(format!(
                "all windows must have length {}",
                expected
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.recon.seed);
        let mut indices: Vec<usize> = (0..windows.len()).collect();
        indices.shuffle(&mut rng);

        // Hold out validation windows only when there are enough to spare.
        let val_count = if windows.len() >= 5 {
            ((windows.len() as f32 * self.training.validation_split) as usize)
                .min(windows.len() - 1)
        } else {
            0
        };
        let (val_idx, train_idx) = indices.split_at(val_count);

        let mut net = self.build();
        let lr = self.recon.learning_rate;
        let mut epoch_loss = 0.0;
        let mut epochs_run = 0;
        let mut train_order: Vec<usize> = train_idx.to_vec();

        for epoch in 0..self.training.epochs {
            train_order.shuffle(&mut rng);

            let mut total_loss = 0.0;
            for batch in train_order.chunks(self.training.batch_size.max(1)) {
                let mut grads = net.zero_gradients();
                for &idx in batch {
                    let window = &windows[idx];
                    let cache = net.forward(window, Some(&mut rng));
                    total_loss += net.mse(window, &cache);
                    net.backward(window, &cache, &mut grads);
                }
                net.apply_gradients(&grads, lr, batch.len());
            }

            epoch_loss = total_loss / train_order.len().max(1) as f32;
            if !epoch_loss.is_finite() {
                return Err(DetectError::Training(format!(
                    "loss diverged to a non-finite value at epoch {}",
                    epoch
                )));
            }
            self.record_loss(epoch_loss);
            epochs_run = epoch + 1;

            let val_loss = mean_error(&net, windows, val_idx);
            debug!(epoch, epoch_loss, ?val_loss, "reconstruction training epoch");

            if self.should_stop_early() {
                debug!(epoch, "reconstruction loss plateaued, stopping early");
                break;
            }
        }

        let validation_loss = mean_error(&net, windows, val_idx);

        Ok(TrainedAutoencoder {
            net,
            final_loss: epoch_loss,
            validation_loss,
            epochs_trained: epochs_run,
        })
    }
}

fn mean_error(net: &SeqAutoencoder, windows: &[Vec<f32>], idx: &[usize]) -> Option<f32> {
    if idx.is_empty() {
        return None;
    }
    let total: f32 = idx
        .iter()
        .map(|&i| {
            let cache = net.forward(&windows[i], None);
            net.mse(&windows[i], &cache)
        })
        .sum();
    Some(total / idx.len() as f32)
}

/// Flag windows whose mean absolute reconstruction error exceeds
/// `threshold`. Returns the flags alongside the per-window errors.
pub fn detect_anomalies(
    model: &TrainedAutoencoder,
    windows: &[Vec<f32>],
    threshold: f32,
) -> (Vec<bool>, Vec<f32>) {
    let errors: Vec<f32> = windows.iter().map(|w| model.score(w)).collect();
    let flags = errors.iter().map(|&e| e > threshold).collect();
    (flags, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset;

    fn test_configs() -> (ReconstructionConfig, TrainingConfig) {
        let recon = ReconstructionConfig {
            seq_length: 10,
            hidden1: 16,
            hidden2: 8,
            dense_dim: 8,
            dropout: 0.0,
            learning_rate: 0.05,
            ..Default::default()
        };
        let training = TrainingConfig {
            epochs: 30,
            batch_size: 16,
            patience: 0,
            ..Default::default()
        };
        (recon, training)
    }

    fn ramp_windows(len: usize, window: usize) -> Vec<Vec<f32>> {
        let series: Vec<f32> = (0..len).map(|v| v as f32).collect();
        let (normalized, _) = dataset::normalize(&series);
        dataset::windows(&normalized, window)
    }

    #[test]
    fn test_train_empty_windows_fails() {
        let (recon, training) = test_configs();
        let mut trainer = Trainer::new(recon, training);
        assert!(matches!(
            trainer.train(&[]),
            Err(DetectError::DataFormat(_))
        ));
    }

    #[test]
    fn test_train_wrong_window_length_fails() {
        let (recon, training) = test_configs();
        let mut trainer = Trainer::new(recon, training);
        assert!(trainer.train(&[vec![0.0; 7]]).is_err());
    }

    #[test]
    fn test_non_finite_input_is_a_training_failure() {
        let (recon, training) = test_configs();
        let mut trainer = Trainer::new(recon, training);

        let windows = vec![vec![f32::NAN; 10]; 8];
        assert!(matches!(
            trainer.train(&windows),
            Err(DetectError::Training(_))
        ));
    }

    #[test]
    fn test_training_reduces_loss() {
        let (recon, training) = test_configs();
        let windows = ramp_windows(80, 10);

        let mut trainer = Trainer::new(recon, training);
        let trained = trainer.train(&windows).unwrap();

        let first = trainer.loss_history.front().copied().unwrap();
        assert!(
            trained.final_loss < first,
            "final loss {} should be below first-epoch loss {}",
            trained.final_loss,
            first
        );
        assert!(trained.epochs_trained > 0);
        assert!(trained.validation_loss.is_some());
    }

    #[test]
    fn test_outlier_window_scores_higher() {
        let (recon, training) = test_configs();
        let windows = ramp_windows(80, 10);

        let mut trainer = Trainer::new(recon, training);
        let trained = trainer.train(&windows).unwrap();

        // A window with an injected spike reconstructs worse than a
        // normal window from the same series.
        let normal = windows[30].clone();
        let mut spiked = normal.clone();
        spiked[5] = 15.0;

        let normal_err = trained.score(&normal);
        let spiked_err = trained.score(&spiked);
        assert!(
            spiked_err > normal_err,
            "spiked error {} should exceed normal error {}",
            spiked_err,
            normal_err
        );
    }

    #[test]
    fn test_detect_anomalies_flags_by_threshold() {
        let (recon, training) = test_configs();
        let windows = ramp_windows(60, 10);

        let mut trainer = Trainer::new(recon, training);
        let trained = trainer.train(&windows).unwrap();

        let (flags, errors) = detect_anomalies(&trained, &windows, f32::MAX);
        assert_eq!(flags.len(), windows.len());
        assert_eq!(errors.len(), windows.len());
        assert!(flags.iter().all(|&f| !f));

        let (all_flagged, _) = detect_anomalies(&trained, &windows, -1.0);
        assert!(all_flagged.iter().all(|&f| f));
    }

    #[test]
    fn test_early_stop_on_plateau() {
        let (recon, mut training) = test_configs();
        training.patience = 3;
        let mut trainer = Trainer::new(recon, training);

        // Strictly decreasing losses never trigger the stop.
        for i in 0..10 {
            trainer.record_loss(1.0 - i as f32 * 0.05);
        }
        assert!(!trainer.should_stop_early());

        // A flat plateau does.
        for _ in 0..6 {
            trainer.record_loss(0.5);
        }
        assert!(trainer.should_stop_early());
    }
}
