//! Isolation Forest outlier model
//!
//! Anomalies are easier to isolate and thus have shorter path lengths in
//! randomly built trees. The anomaly-decision boundary is calibrated from
//! the contamination parameter: the expected fraction of outliers in the
//! training data.

use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{DetectError, Result};

/// Isolation forest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    /// Number of isolation trees.
    pub num_trees: usize,
    /// Sub-sample size for each tree.
    pub sample_size: usize,
    /// Random seed for reproducible fits.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            sample_size: 256,
            seed: 42,
        }
    }
}

/// Isolation Forest model for outlier scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    config: ForestConfig,
    /// c(n) normalization factor for the configured sample size.
    avg_path_length: f32,
    /// Decision boundary calibrated at fit time from contamination.
    boundary: f32,
    trained: bool,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(ForestConfig::default())
    }
}

impl IsolationForest {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            trees: Vec::new(),
            config,
            avg_path_length: 0.0,
            boundary: 0.5,
            trained: false,
        }
    }

    /// Average path length of unsuccessful BST search, c(n).
    fn average_path_length(n: usize) -> f32 {
        if n <= 1 {
            return 0.0;
        }
        let n = n as f32;
        2.0 * (n.ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
    }

    /// Fit the forest and calibrate the decision boundary so that roughly
    /// a `contamination` fraction of the training samples scores above it.
    /// Returns the anomaly scores of the training samples.
    pub fn fit(&mut self, data: &[Vec<f32>], contamination: f32) -> Result<Vec<f32>> {
        if data.is_empty() {
            return Err(DetectError::DataFormat(
                "cannot fit on empty data".to_string(),
            ));
        }

        let n_features = data[0].len();
        if n_features == 0 || data.iter().any(|s| s.len() != n_features) {
            return Err(DetectError::DataFormat(
                "samples must share a non-zero feature width".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let sample_size = self.config.sample_size.min(data.len());

        self.trees.clear();
        self.avg_path_length = Self::average_path_length(sample_size);

        for _ in 0..self.config.num_trees {
            // Sample with replacement
            let sample: Vec<Vec<f32>> = (0..sample_size)
                .map(|_| data[rng.random_range(0..data.len())].clone())
                .collect();

            let max_depth = (sample_size as f32).log2().ceil() as usize;
            let tree = IsolationTree::build(&sample, n_features, max_depth, &mut rng);
            self.trees.push(tree);
        }

        let scores: Vec<f32> = data.iter().map(|s| self.score_sample(s)).collect();
        self.boundary = Self::calibrate_boundary(&scores, contamination);
        self.trained = true;

        Ok(scores)
    }

    /// Boundary = (1 - contamination) quantile of training scores.
    /// Samples scoring strictly above it are labeled anomalous.
    fn calibrate_boundary(scores: &[f32], contamination: f32) -> f32 {
        let mut sorted = scores.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let q = (1.0 - contamination).clamp(0.0, 1.0);
        let idx = ((sorted.len() - 1) as f32 * q).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Anomaly score in (0, 1): 2^(-E[h(x)] / c(n)).
    pub fn score_sample(&self, sample: &[f32]) -> f32 {
        if self.trees.is_empty() || self.avg_path_length == 0.0 {
            return 0.5;
        }

        let total_path_length: f32 = self
            .trees
            .iter()
            .map(|tree| tree.path_length(sample, 0))
            .sum();

        let avg_path = total_path_length / self.trees.len() as f32;
        2.0_f32.powf(-avg_path / self.avg_path_length)
    }

    /// Native anomaly decision against the calibrated boundary.
    pub fn is_anomaly(&self, sample: &[f32]) -> bool {
        self.score_sample(sample) > self.boundary
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn boundary(&self) -> f32 {
        self.boundary
    }
}

/// A single isolation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    fn build<R: Rng>(
        samples: &[Vec<f32>],
        n_features: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Self {
        let root = Self::build_node(samples, n_features, 0, max_depth, rng);
        Self { root }
    }

    fn build_node<R: Rng>(
        samples: &[Vec<f32>],
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> Option<Box<IsolationNode>> {
        if samples.is_empty() {
            return None;
        }

        if depth >= max_depth || samples.len() <= 1 {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        let feature_idx = rng.random_range(0..n_features);

        let mut min_val = f32::MAX;
        let mut max_val = f32::MIN;
        for sample in samples {
            let val = sample[feature_idx];
            if val < min_val {
                min_val = val;
            }
            if val > max_val {
                max_val = val;
            }
        }

        // All values equal: nothing left to isolate on this feature.
        if (max_val - min_val).abs() < f32::EPSILON {
            return Some(Box::new(IsolationNode::Leaf {
                size: samples.len(),
            }));
        }

        let split_value = rng.random_range(min_val..max_val);

        let (left_samples, right_samples): (Vec<Vec<f32>>, Vec<Vec<f32>>) = samples
            .iter()
            .cloned()
            .partition(|s| s[feature_idx] < split_value);

        let left = Self::build_node(&left_samples, n_features, depth + 1, max_depth, rng);
        let right = Self::build_node(&right_samples, n_features, depth + 1, max_depth, rng);

        Some(Box::new(IsolationNode::Internal {
            feature_idx,
            split_value,
            left,
            right,
        }))
    }

    fn path_length(&self, sample: &[f32], current_depth: usize) -> f32 {
        match &self.root {
            None => current_depth as f32,
            Some(node) => Self::node_path_length(node, sample, current_depth),
        }
    }

    fn node_path_length(node: &IsolationNode, sample: &[f32], depth: usize) -> f32 {
        match node {
            IsolationNode::Leaf { size } => {
                // Leaves holding several samples get the expected extra depth.
                depth as f32 + IsolationForest::average_path_length(*size)
            }
            IsolationNode::Internal {
                feature_idx,
                split_value,
                left,
                right,
            } => {
                let val = sample.get(*feature_idx).copied().unwrap_or(0.0);
                let next_node = if val < *split_value { left } else { right };

                match next_node {
                    Some(n) => Self::node_path_length(n, sample, depth + 1),
                    None => depth as f32 + 1.0,
                }
            }
        }
    }
}

/// Node in an isolation tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature_idx: usize,
        split_value: f32,
        left: Option<Box<IsolationNode>>,
        right: Option<Box<IsolationNode>>,
    },
    Leaf {
        size: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_samples(n: usize) -> Vec<Vec<f32>> {
        (1..=n).map(|i| vec![i as f32]).collect()
    }

    #[test]
    fn test_forest_creation() {
        let forest = IsolationForest::default();
        assert!(!forest.is_trained());
    }

    #[test]
    fn test_forest_training() {
        let mut forest = IsolationForest::default();
        let scores = forest.fit(&ramp_samples(100), 0.1).unwrap();

        assert!(forest.is_trained());
        assert_eq!(scores.len(), 100);
        assert_eq!(forest.trees.len(), 100);
    }

    #[test]
    fn test_fit_empty_fails() {
        let mut forest = IsolationForest::default();
        assert!(forest.fit(&[], 0.1).is_err());
    }

    #[test]
    fn test_scores_in_unit_interval() {
        let mut forest = IsolationForest::default();
        forest.fit(&ramp_samples(200), 0.1).unwrap();

        for sample in [vec![1.0], vec![100.0], vec![5000.0]] {
            let score = forest.score_sample(&sample);
            assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
        }
    }

    #[test]
    fn test_outlier_scores_higher() {
        let mut forest = IsolationForest::default();
        forest.fit(&ramp_samples(100), 0.1).unwrap();

        let normal = forest.score_sample(&[50.0]);
        let outlier = forest.score_sample(&[1000.0]);
        assert!(
            outlier > normal,
            "outlier score {} should exceed normal score {}",
            outlier,
            normal
        );
    }

    #[test]
    fn test_boundary_calibration() {
        let scores: Vec<f32> = (0..100).map(|i| i as f32 / 100.0).collect();
        let boundary = IsolationForest::calibrate_boundary(&scores, 0.1);

        // Roughly 10% of scores should lie above the boundary.
        let above = scores.iter().filter(|&&s| s > boundary).count();
        assert!((5..=15).contains(&above), "{} scores above boundary", above);
    }

    #[test]
    fn test_deterministic_fit() {
        let data = ramp_samples(100);

        let mut a = IsolationForest::default();
        let mut b = IsolationForest::default();
        a.fit(&data, 0.1).unwrap();
        b.fit(&data, 0.1).unwrap();

        // Same seed, same data: identical scores.
        for sample in [vec![3.0], vec![42.0], vec![250.0]] {
            assert_eq!(a.score_sample(&sample), b.score_sample(&sample));
        }
    }

    #[test]
    fn test_native_decision() {
        let mut forest = IsolationForest::default();
        forest.fit(&ramp_samples(100), 0.1).unwrap();

        assert!(forest.is_anomaly(&[10_000.0]));
        assert!(!forest.is_anomaly(&[50.0]));
    }
}
