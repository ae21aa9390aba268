//! Sequence reconstruction model
//!
//! A recurrent autoencoder that learns to reproduce its input window.
//! Two stacked recurrent layers with intermediate dropout encode the
//! window into a final hidden state; dense layers project that state back
//! to the full window. Per-window reconstruction error is the anomaly
//! signal: normal windows reconstruct well, anomalous ones do not.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Reconstruction model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionConfig {
    /// Window length the model reconstructs.
    pub seq_length: usize,
    /// Features per timestep (univariate series: 1).
    pub feature_count: usize,
    /// Hidden size of the first recurrent layer.
    pub hidden1: usize,
    /// Hidden size of the second recurrent layer.
    pub hidden2: usize,
    /// Dense projection size between encoder state and output.
    pub dense_dim: usize,
    /// Dropout rate between the recurrent layers (training only).
    pub dropout: f32,
    /// Gradient descent step size.
    pub learning_rate: f32,
    /// Reconstruction-error threshold for the native anomaly decision.
    pub error_threshold: f32,
    /// Seed for weight init, shuffling and dropout masks.
    pub seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            seq_length: 30,
            feature_count: 1,
            hidden1: 64,
            hidden2: 32,
            dense_dim: 16,
            dropout: 0.2,
            learning_rate: 0.01,
            error_threshold: 0.02,
            seed: 42,
        }
    }
}

type Matrix = Vec<Vec<f32>>;

fn zeros(rows: usize, cols: usize) -> Matrix {
    vec![vec![0.0; cols]; rows]
}

fn init_matrix<R: Rng>(rows: usize, cols: usize, fan_in: usize, rng: &mut R) -> Matrix {
    let limit = (1.0 / fan_in as f32).sqrt();
    (0..rows)
        .map(|_| (0..cols).map(|_| rng.random_range(-limit..limit)).collect())
        .collect()
}

/// w * x
fn matvec(w: &Matrix, x: &[f32]) -> Vec<f32> {
    w.iter()
        .map(|row| row.iter().zip(x).map(|(&a, &b)| a * b).sum())
        .collect()
}

/// w^T * x (x has len = rows, result has len = cols)
fn matvec_t(w: &Matrix, x: &[f32]) -> Vec<f32> {
    let cols = w.first().map(|r| r.len()).unwrap_or(0);
    let mut out = vec![0.0; cols];
    for (row, &xi) in w.iter().zip(x) {
        for (o, &wij) in out.iter_mut().zip(row) {
            *o += wij * xi;
        }
    }
    out
}

/// g += dy ⊗ x
fn acc_outer(g: &mut Matrix, dy: &[f32], x: &[f32]) {
    for (row, &d) in g.iter_mut().zip(dy) {
        for (cell, &xi) in row.iter_mut().zip(x) {
            *cell += d * xi;
        }
    }
}

fn acc_vec(g: &mut [f32], d: &[f32]) {
    for (gi, &di) in g.iter_mut().zip(d) {
        *gi += di;
    }
}

/// Recurrent autoencoder: two stacked Elman layers, dense head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeqAutoencoder {
    seq_length: usize,
    feature_count: usize,
    dropout: f32,
    // Recurrent layer 1: h1_t = tanh(w1 x_t + u1 h1_{t-1} + b1)
    w1: Matrix,
    u1: Matrix,
    b1: Vec<f32>,
    // Recurrent layer 2: h2_t = tanh(w2 d1_t + u2 h2_{t-1} + b2)
    w2: Matrix,
    u2: Matrix,
    b2: Vec<f32>,
    // Dense head: y = w4 relu(w3 h2_L + b3) + b4
    w3: Matrix,
    b3: Vec<f32>,
    w4: Matrix,
    b4: Vec<f32>,
}

/// Per-window activations kept for backpropagation through time.
pub(crate) struct ForwardCache {
    x: Vec<Vec<f32>>,
    h1: Vec<Vec<f32>>,
    d1: Vec<Vec<f32>>,
    masks: Vec<Vec<f32>>,
    h2: Vec<Vec<f32>>,
    z_pre: Vec<f32>,
    z: Vec<f32>,
    pub y: Vec<f32>,
}

/// Gradient accumulator matching the network shape.
pub(crate) struct Gradients {
    w1: Matrix,
    u1: Matrix,
    b1: Vec<f32>,
    w2: Matrix,
    u2: Matrix,
    b2: Vec<f32>,
    w3: Matrix,
    b3: Vec<f32>,
    w4: Matrix,
    b4: Vec<f32>,
}

impl SeqAutoencoder {
    /// Build an untrained network with seeded weight initialization.
    pub fn build(config: &ReconstructionConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let f = config.feature_count;
        let (h1, h2, d) = (config.hidden1, config.hidden2, config.dense_dim);
        let out = config.seq_length * f;

        Self {
            seq_length: config.seq_length,
            feature_count: f,
            dropout: config.dropout,
            w1: init_matrix(h1, f, f, &mut rng),
            u1: init_matrix(h1, h1, h1, &mut rng),
            b1: vec![0.0; h1],
            w2: init_matrix(h2, h1, h1, &mut rng),
            u2: init_matrix(h2, h2, h2, &mut rng),
            b2: vec![0.0; h2],
            w3: init_matrix(d, h2, h2, &mut rng),
            b3: vec![0.0; d],
            w4: init_matrix(out, d, d, &mut rng),
            b4: vec![0.0; out],
        }
    }

    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    pub fn output_len(&self) -> usize {
        self.seq_length * self.feature_count
    }

    pub(crate) fn zero_gradients(&self) -> Gradients {
        Gradients {
            w1: zeros(self.w1.len(), self.w1[0].len()),
            u1: zeros(self.u1.len(), self.u1[0].len()),
            b1: vec![0.0; self.b1.len()],
            w2: zeros(self.w2.len(), self.w2[0].len()),
            u2: zeros(self.u2.len(), self.u2[0].len()),
            b2: vec![0.0; self.b2.len()],
            w3: zeros(self.w3.len(), self.w3[0].len()),
            b3: vec![0.0; self.b3.len()],
            w4: zeros(self.w4.len(), self.w4[0].len()),
            b4: vec![0.0; self.b4.len()],
        }
    }

    /// Forward pass. `dropout_rng` enables inverted dropout between the
    /// recurrent layers; inference passes `None` for an identity mask.
    pub(crate) fn forward(&self, window: &[f32], mut dropout_rng: Option<&mut StdRng>) -> ForwardCache {
        let f = self.feature_count;
        let steps = self.seq_length;
        let keep = 1.0 - self.dropout;

        let mut x = Vec::with_capacity(steps);
        let mut h1_seq = Vec::with_capacity(steps);
        let mut d1_seq = Vec::with_capacity(steps);
        let mut masks = Vec::with_capacity(steps);
        let mut h2_seq = Vec::with_capacity(steps);

        let mut h1_prev = vec![0.0; self.b1.len()];
        let mut h2_prev = vec![0.0; self.b2.len()];

        for t in 0..steps {
            let x_t = window[t * f..(t + 1) * f].to_vec();

            let mut a1 = matvec(&self.w1, &x_t);
            acc_vec(&mut a1, &matvec(&self.u1, &h1_prev));
            acc_vec(&mut a1, &self.b1);
            let h1_t: Vec<f32> = a1.iter().map(|v| v.tanh()).collect();

            let mask: Vec<f32> = match dropout_rng.as_mut() {
                Some(rng) if self.dropout > 0.0 => h1_t
                    .iter()
                    .map(|_| {
                        if rng.random::<f32>() < keep {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    })
                    .collect(),
                _ => vec![1.0; h1_t.len()],
            };
            let d1_t: Vec<f32> = h1_t.iter().zip(&mask).map(|(&h, &m)| h * m).collect();

            let mut a2 = matvec(&self.w2, &d1_t);
            acc_vec(&mut a2, &matvec(&self.u2, &h2_prev));
            acc_vec(&mut a2, &self.b2);
            let h2_t: Vec<f32> = a2.iter().map(|v| v.tanh()).collect();

            h1_prev = h1_t.clone();
            h2_prev = h2_t.clone();

            x.push(x_t);
            h1_seq.push(h1_t);
            d1_seq.push(d1_t);
            masks.push(mask);
            h2_seq.push(h2_t);
        }

        let mut z_pre = matvec(&self.w3, &h2_prev);
        acc_vec(&mut z_pre, &self.b3);
        let z: Vec<f32> = z_pre.iter().map(|&v| v.max(0.0)).collect();

        let mut y = matvec(&self.w4, &z);
        acc_vec(&mut y, &self.b4);

        ForwardCache {
            x,
            h1: h1_seq,
            d1: d1_seq,
            masks,
            h2: h2_seq,
            z_pre,
            z,
            y,
        }
    }

    /// Mean squared reconstruction error of a cached forward pass.
    pub(crate) fn mse(&self, window: &[f32], cache: &ForwardCache) -> f32 {
        let n = self.output_len() as f32;
        cache
            .y
            .iter()
            .zip(window)
            .map(|(&y, &x)| (y - x) * (y - x))
            .sum::<f32>()
            / n
    }

    /// Backpropagation through time; accumulates into `grads`.
    pub(crate) fn backward(&self, window: &[f32], cache: &ForwardCache, grads: &mut Gradients) {
        let steps = self.seq_length;
        let out_dim = self.output_len() as f32;

        // Output layer
        let dy: Vec<f32> = cache
            .y
            .iter()
            .zip(window)
            .map(|(&y, &x)| 2.0 * (y - x) / out_dim)
            .collect();
        acc_vec(&mut grads.b4, &dy);
        acc_outer(&mut grads.w4, &dy, &cache.z);

        // Dense layer (relu)
        let dz = matvec_t(&self.w4, &dy);
        let dz_pre: Vec<f32> = dz
            .iter()
            .zip(&cache.z_pre)
            .map(|(&d, &p)| if p > 0.0 { d } else { 0.0 })
            .collect();
        acc_vec(&mut grads.b3, &dz_pre);
        acc_outer(&mut grads.w3, &dz_pre, &cache.h2[steps - 1]);

        // BPTT: gradient enters layer 2 only at the final state and flows
        // backward through both recurrences.
        let mut dh2 = matvec_t(&self.w3, &dz_pre);
        let mut dh1_carry = vec![0.0; self.b1.len()];
        let zeros_h1 = vec![0.0; self.b1.len()];
        let zeros_h2 = vec![0.0; self.b2.len()];

        for t in (0..steps).rev() {
            let h2_prev = if t > 0 { &cache.h2[t - 1] } else { &zeros_h2 };
            let h1_prev = if t > 0 { &cache.h1[t - 1] } else { &zeros_h1 };

            let da2: Vec<f32> = dh2
                .iter()
                .zip(&cache.h2[t])
                .map(|(&d, &h)| d * (1.0 - h * h))
                .collect();
            acc_vec(&mut grads.b2, &da2);
            acc_outer(&mut grads.w2, &da2, &cache.d1[t]);
            acc_outer(&mut grads.u2, &da2, h2_prev);

            let dd1 = matvec_t(&self.w2, &da2);
            let dh1_t: Vec<f32> = dd1
                .iter()
                .zip(&cache.masks[t])
                .zip(&dh1_carry)
                .map(|((&d, &m), &c)| d * m + c)
                .collect();

            let da1: Vec<f32> = dh1_t
                .iter()
                .zip(&cache.h1[t])
                .map(|(&d, &h)| d * (1.0 - h * h))
                .collect();
            acc_vec(&mut grads.b1, &da1);
            acc_outer(&mut grads.w1, &da1, &cache.x[t]);
            acc_outer(&mut grads.u1, &da1, h1_prev);

            dh1_carry = matvec_t(&self.u1, &da1);
            dh2 = matvec_t(&self.u2, &da2);
        }
    }

    /// Apply averaged gradients with the given step size.
    pub(crate) fn apply_gradients(&mut self, grads: &Gradients, lr: f32, batch_size: usize) {
        let scale = lr / batch_size.max(1) as f32;

        fn step_matrix(w: &mut Matrix, g: &Matrix, scale: f32) {
            for (row, grow) in w.iter_mut().zip(g) {
                for (cell, &gv) in row.iter_mut().zip(grow) {
                    *cell -= scale * gv;
                }
            }
        }
        fn step_vec(v: &mut [f32], g: &[f32], scale: f32) {
            for (cell, &gv) in v.iter_mut().zip(g) {
                *cell -= scale * gv;
            }
        }

        step_matrix(&mut self.w1, &grads.w1, scale);
        step_matrix(&mut self.u1, &grads.u1, scale);
        step_vec(&mut self.b1, &grads.b1, scale);
        step_matrix(&mut self.w2, &grads.w2, scale);
        step_matrix(&mut self.u2, &grads.u2, scale);
        step_vec(&mut self.b2, &grads.b2, scale);
        step_matrix(&mut self.w3, &grads.w3, scale);
        step_vec(&mut self.b3, &grads.b3, scale);
        step_matrix(&mut self.w4, &grads.w4, scale);
        step_vec(&mut self.b4, &grads.b4, scale);
    }

    /// Per-window mean absolute reconstruction error, averaged over the
    /// time and feature axes (one scalar per window). Inference only.
    pub fn reconstruction_error(&self, window: &[f32]) -> f32 {
        let cache = self.forward(window, None);
        let n = self.output_len() as f32;
        cache
            .y
            .iter()
            .zip(window)
            .map(|(&y, &x)| (y - x).abs())
            .sum::<f32>()
            / n
    }
}

/// A trained reconstruction model with its training summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedAutoencoder {
    pub net: SeqAutoencoder,
    /// Final mean training loss (MSE).
    pub final_loss: f32,
    /// Validation loss after the last epoch, when a split was held out.
    pub validation_loss: Option<f32>,
    pub epochs_trained: usize,
}

impl TrainedAutoencoder {
    /// Anomaly score for one window.
    pub fn score(&self, window: &[f32]) -> f32 {
        self.net.reconstruction_error(window)
    }
}

/// Reconstruction variant of the scoring model: wraps the trained
/// autoencoder behind the fit/score capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionModel {
    config: ReconstructionConfig,
    /// Error threshold governing label derivation; adjustable after
    /// construction via the detector's set_threshold.
    threshold: f32,
    trained: Option<TrainedAutoencoder>,
}

impl ReconstructionModel {
    pub fn new(config: ReconstructionConfig) -> Self {
        let threshold = config.error_threshold;
        Self {
            config,
            threshold,
            trained: None,
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub(crate) fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    pub(crate) fn set_trained(&mut self, trained: TrainedAutoencoder) {
        self.trained = Some(trained);
    }

    /// Reconstruction error for one window; fails when never trained.
    pub fn score_window(&self, window: &[f32]) -> Result<f32> {
        match &self.trained {
            Some(t) => {
                if window.len() != t.net.output_len() {
                    return Err(DetectError::DataFormat(format!(
                        "window length {} does not match model sequence length {}",
                        window.len(),
                        t.net.output_len()
                    )));
                }
                Ok(t.score(window))
            }
            None => Err(DetectError::NotTrained),
        }
    }

    /// Native anomaly decision: error above the current threshold.
    pub fn is_anomalous(&self, window: &[f32]) -> Result<bool> {
        Ok(self.score_window(window)? > self.threshold)
    }
}
