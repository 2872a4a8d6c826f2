//! Synthetic few-shot task generators.
//!
//! The sinusoid family is the classic meta-learning regression benchmark:
//! every task is a sine curve with its own amplitude and phase, standing in
//! for a market regime with its own response curve. The cluster family
//! produces small N-way classification problems from freshly sampled
//! Gaussian blobs.

use std::f64::consts::PI;

use ndarray::Array2;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::meta::task::Task;

/// Configuration for sinusoid regression tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinusoidConfig {
    /// Amplitude sampling range
    pub amplitude_range: (f64, f64),
    /// Phase sampling range
    pub phase_range: (f64, f64),
    /// Input sampling range
    pub input_range: (f64, f64),
    /// Training split size per task
    pub train_size: usize,
    /// Query split size per task
    pub query_size: usize,
}

impl Default for SinusoidConfig {
    fn default() -> Self {
        Self {
            amplitude_range: (0.1, 5.0),
            phase_range: (0.0, PI),
            input_range: (-5.0, 5.0),
            train_size: 10,
            query_size: 10,
        }
    }
}

/// Generates sinusoid regression tasks
#[derive(Debug, Clone)]
pub struct SinusoidTaskGenerator {
    config: SinusoidConfig,
}

impl SinusoidTaskGenerator {
    pub fn new(config: SinusoidConfig) -> Self {
        Self { config }
    }

    /// Sample one task: a fresh (amplitude, phase) pair with independently
    /// drawn train and query inputs
    pub fn sample_task(&self) -> Task {
        let mut rng = rand::thread_rng();
        let (a_lo, a_hi) = self.config.amplitude_range;
        let (p_lo, p_hi) = self.config.phase_range;
        let amplitude = rng.gen_range(a_lo..a_hi);
        let phase = rng.gen_range(p_lo..p_hi);

        let mut sample_split = |size: usize| {
            let (x_lo, x_hi) = self.config.input_range;
            let mut inputs = Array2::zeros((size, 1));
            let mut labels = Array2::zeros((size, 1));
            for i in 0..size {
                let x = rng.gen_range(x_lo..x_hi);
                inputs[[i, 0]] = x;
                labels[[i, 0]] = amplitude * (x + phase).sin();
            }
            (inputs, labels)
        };

        let (train_inputs, train_labels) = sample_split(self.config.train_size);
        let (query_inputs, query_labels) = sample_split(self.config.query_size);
        Task {
            train_inputs,
            train_labels,
            query_inputs,
            query_labels,
        }
    }

    /// Sample a full meta-batch
    pub fn sample_batch(&self, meta_batch_size: usize) -> Vec<Task> {
        (0..meta_batch_size).map(|_| self.sample_task()).collect()
    }
}

/// Configuration for Gaussian-cluster classification tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Number of classes per task (N-way)
    pub num_classes: usize,
    /// Input feature dimension
    pub input_dim: usize,
    /// Training examples per class (K-shot)
    pub train_per_class: usize,
    /// Query examples per class
    pub query_per_class: usize,
    /// Range the cluster centers are drawn from
    pub center_range: (f64, f64),
    /// Standard deviation of each cluster
    pub spread: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_classes: 3,
            input_dim: 4,
            train_per_class: 5,
            query_per_class: 5,
            center_range: (-2.0, 2.0),
            spread: 0.5,
        }
    }
}

/// Generates N-way classification tasks from per-task Gaussian clusters
#[derive(Debug, Clone)]
pub struct ClusterTaskGenerator {
    config: ClusterConfig,
}

impl ClusterTaskGenerator {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    /// Sample one task with freshly drawn cluster centers and one-hot labels
    pub fn sample_task(&self) -> Task {
        let mut rng = rand::thread_rng();
        let cfg = &self.config;
        let (c_lo, c_hi) = cfg.center_range;

        let centers: Vec<Vec<f64>> = (0..cfg.num_classes)
            .map(|_| (0..cfg.input_dim).map(|_| rng.gen_range(c_lo..c_hi)).collect())
            .collect();
        let noise = Normal::new(0.0, cfg.spread).expect("positive spread");

        let mut sample_split = |per_class: usize| {
            let rows = cfg.num_classes * per_class;
            let mut inputs = Array2::zeros((rows, cfg.input_dim));
            let mut labels = Array2::zeros((rows, cfg.num_classes));
            for class in 0..cfg.num_classes {
                for i in 0..per_class {
                    let row = class * per_class + i;
                    for d in 0..cfg.input_dim {
                        inputs[[row, d]] = centers[class][d] + noise.sample(&mut rng);
                    }
                    labels[[row, class]] = 1.0;
                }
            }
            (inputs, labels)
        };

        let (train_inputs, train_labels) = sample_split(cfg.train_per_class);
        let (query_inputs, query_labels) = sample_split(cfg.query_per_class);
        Task {
            train_inputs,
            train_labels,
            query_inputs,
            query_labels,
        }
    }

    /// Sample a full meta-batch
    pub fn sample_batch(&self, meta_batch_size: usize) -> Vec<Task> {
        (0..meta_batch_size).map(|_| self.sample_task()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sinusoid_task_shapes() {
        let generator = SinusoidTaskGenerator::new(SinusoidConfig::default());
        let task = generator.sample_task();
        assert_eq!(task.train_inputs.dim(), (10, 1));
        assert_eq!(task.query_labels.dim(), (10, 1));
    }

    #[test]
    fn test_sinusoid_amplitude_bound() {
        let generator = SinusoidTaskGenerator::new(SinusoidConfig::default());
        for _ in 0..10 {
            let task = generator.sample_task();
            for &y in task.train_labels.iter() {
                assert!(y.abs() <= 5.0);
            }
        }
    }

    #[test]
    fn test_cluster_task_labels_are_one_hot() {
        let generator = ClusterTaskGenerator::new(ClusterConfig::default());
        let task = generator.sample_task();
        assert_eq!(task.train_inputs.dim(), (15, 4));
        assert_eq!(task.train_labels.dim(), (15, 3));
        for row in task.train_labels.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_batch_size() {
        let generator = SinusoidTaskGenerator::new(SinusoidConfig::default());
        assert_eq!(generator.sample_batch(7).len(), 7);
    }
}
