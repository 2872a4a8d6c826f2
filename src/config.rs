//! Configuration for mixture-of-experts meta-training.

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, Result};

/// How gate scores are turned into expert mixing weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateMode {
    /// Temperature-scaled softmax over the learned gate's scores
    Learned,
    /// Ignore the gate entirely and weight all experts 1/N
    Uniform,
    /// Collapse the mixture onto expert 0 (ablation/debugging)
    OneHot,
}

impl Default for GateMode {
    fn default() -> Self {
        Self::Learned
    }
}

/// Which scalar the outer optimizer descends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossCombination {
    /// Loss of the gated mixture prediction (default)
    Mixed,
    /// Sum of per-expert final-step query losses, gate excluded
    Uniform,
    /// Mixture loss plus a small weighted sum of per-expert losses
    Total,
}

impl Default for LossCombination {
    fn default() -> Self {
        Self::Mixed
    }
}

/// Forward network variant, chosen once at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Fully-connected stack with ReLU hidden layers
    Fc,
    /// 1-D convolutional stack over (channels x window) inputs
    Conv,
}

impl Default for ModelKind {
    fn default() -> Self {
        Self::Fc
    }
}

/// Task family, which fixes the loss function and available metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    /// Real-valued targets, mean squared error
    Regression,
    /// One-hot targets, softmax cross-entropy
    Classification,
}

impl Default for TaskKind {
    fn default() -> Self {
        Self::Regression
    }
}

/// Configuration for the meta-training loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Number of expert networks in the mixture
    pub num_experts: usize,

    /// Number of gradient steps per task in the inner loop
    pub inner_steps: usize,

    /// Inner-loop learning rate, shared by all steps and all experts
    pub inner_lr: f64,

    /// Meta learning rate for the outer Adam update
    pub meta_lr: f64,

    /// Stop gradients at the inner steps (first-order approximation).
    /// When false, the outer gradient differentiates through the whole
    /// unrolled adaptation.
    pub first_order: bool,

    /// Gating strategy
    pub gate_mode: GateMode,

    /// Gate softmax temperature; scores are divided by (temperature + 1)
    pub gate_temperature: f64,

    /// Outer objective selection
    pub loss_combination: LossCombination,

    /// Weight on the per-expert loss sum under `LossCombination::Total`
    pub total_loss_weight: f64,

    /// Elementwise gradient clipping range, applied before the update.
    /// The convolutional variant is prone to exploding meta-gradients and
    /// is usually run with `(-10.0, 10.0)`.
    pub grad_clip: Option<(f64, f64)>,

    /// Step size for finite-difference meta-gradients (second-order path)
    pub gradient_epsilon: f64,

    /// Task family (fixes the loss function)
    pub task_kind: TaskKind,

    /// Track argmax accuracy alongside losses (classification only)
    pub track_accuracy: bool,

    /// Forward network variant
    pub model: ModelKind,

    /// Input feature width
    pub input_dim: usize,

    /// Output width (targets for experts; the gate always emits one score
    /// per expert)
    pub output_dim: usize,

    /// Hidden layer sizes for the fully-connected variant
    pub hidden_dims: Vec<usize>,

    /// Input channels for the convolutional variant
    pub conv_channels: usize,

    /// Window length (time steps) for the convolutional variant
    pub conv_window: usize,

    /// Filters per convolutional block
    pub conv_filters: usize,

    /// Convolution kernel size
    pub conv_kernel: usize,

    /// Process the meta-batch in parallel (results are identical either way)
    pub parallel_tasks: bool,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            num_experts: 3,
            inner_steps: 5,
            inner_lr: 0.01,
            meta_lr: 0.001,
            first_order: false,
            gate_mode: GateMode::Learned,
            gate_temperature: 1.0,
            loss_combination: LossCombination::Mixed,
            total_loss_weight: 0.05,
            grad_clip: None,
            gradient_epsilon: 1e-4,
            task_kind: TaskKind::Regression,
            track_accuracy: false,
            model: ModelKind::Fc,
            input_dim: 1,
            output_dim: 1,
            hidden_dims: vec![40, 40],
            conv_channels: 1,
            conv_window: 16,
            conv_filters: 8,
            conv_kernel: 3,
            parallel_tasks: true,
        }
    }
}

impl MetaConfig {
    /// Create a config with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: number of experts
    pub fn with_num_experts(mut self, n: usize) -> Self {
        self.num_experts = n;
        self
    }

    /// Builder: inner-loop steps
    pub fn with_inner_steps(mut self, steps: usize) -> Self {
        self.inner_steps = steps;
        self
    }

    /// Builder: inner-loop learning rate
    pub fn with_inner_lr(mut self, lr: f64) -> Self {
        self.inner_lr = lr;
        self
    }

    /// Builder: meta learning rate
    pub fn with_meta_lr(mut self, lr: f64) -> Self {
        self.meta_lr = lr;
        self
    }

    /// Builder: first-order approximation on/off
    pub fn with_first_order(mut self, first_order: bool) -> Self {
        self.first_order = first_order;
        self
    }

    /// Builder: gating strategy
    pub fn with_gate_mode(mut self, mode: GateMode) -> Self {
        self.gate_mode = mode;
        self
    }

    /// Builder: gate temperature
    pub fn with_gate_temperature(mut self, temperature: f64) -> Self {
        self.gate_temperature = temperature;
        self
    }

    /// Builder: outer objective selection
    pub fn with_loss_combination(mut self, policy: LossCombination) -> Self {
        self.loss_combination = policy;
        self
    }

    /// Builder: gradient clipping range
    pub fn with_grad_clip(mut self, lo: f64, hi: f64) -> Self {
        self.grad_clip = Some((lo, hi));
        self
    }

    /// Builder: task family
    pub fn with_task_kind(mut self, kind: TaskKind) -> Self {
        self.task_kind = kind;
        self
    }

    /// Builder: accuracy tracking
    pub fn with_track_accuracy(mut self, track: bool) -> Self {
        self.track_accuracy = track;
        self
    }

    /// Builder: forward network variant
    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    /// Builder: input/output dimensions
    pub fn with_dims(mut self, input_dim: usize, output_dim: usize) -> Self {
        self.input_dim = input_dim;
        self.output_dim = output_dim;
        self
    }

    /// Builder: hidden layer sizes (fully-connected variant)
    pub fn with_hidden_dims(mut self, dims: Vec<usize>) -> Self {
        self.hidden_dims = dims;
        self
    }

    /// Number of convolutional blocks in the conv variant
    pub const CONV_BLOCKS: usize = 4;

    /// Check every precondition before any computation runs.
    ///
    /// Violations here are fatal; nothing is silently coerced.
    pub fn validate(&self) -> Result<()> {
        if self.num_experts == 0 {
            return Err(MetaError::InvalidConfig(
                "num_experts must be at least 1".into(),
            ));
        }
        if self.inner_steps == 0 {
            return Err(MetaError::InvalidConfig(
                "inner_steps must be at least 1".into(),
            ));
        }
        if !(self.inner_lr > 0.0) {
            return Err(MetaError::InvalidConfig(
                "inner_lr must be positive".into(),
            ));
        }
        if !(self.meta_lr > 0.0) {
            return Err(MetaError::InvalidConfig("meta_lr must be positive".into()));
        }
        if !(self.gate_temperature >= 0.0) || !self.gate_temperature.is_finite() {
            return Err(MetaError::InvalidConfig(
                "gate_temperature must be finite and non-negative".into(),
            ));
        }
        if !(self.gradient_epsilon > 0.0) {
            return Err(MetaError::InvalidConfig(
                "gradient_epsilon must be positive".into(),
            ));
        }
        if let Some((lo, hi)) = self.grad_clip {
            if !(lo < hi) {
                return Err(MetaError::InvalidConfig(format!(
                    "grad_clip range [{lo}, {hi}] is empty"
                )));
            }
        }
        if self.input_dim == 0 || self.output_dim == 0 {
            return Err(MetaError::InvalidConfig(
                "input_dim and output_dim must be at least 1".into(),
            ));
        }
        if self.track_accuracy && self.task_kind == TaskKind::Regression {
            return Err(MetaError::InvalidConfig(
                "accuracy tracking requires a classification task family".into(),
            ));
        }
        if self.task_kind == TaskKind::Classification && self.output_dim < 2 {
            return Err(MetaError::InvalidConfig(
                "classification requires output_dim >= 2".into(),
            ));
        }
        if self.model == ModelKind::Conv {
            if self.conv_channels == 0 || self.conv_filters == 0 || self.conv_kernel == 0 {
                return Err(MetaError::InvalidConfig(
                    "conv_channels, conv_filters and conv_kernel must be at least 1".into(),
                ));
            }
            if self.input_dim != self.conv_channels * self.conv_window {
                return Err(MetaError::InvalidConfig(format!(
                    "input_dim {} does not equal conv_channels * conv_window = {}",
                    self.input_dim,
                    self.conv_channels * self.conv_window
                )));
            }
            let shrink = Self::CONV_BLOCKS * (self.conv_kernel - 1);
            if self.conv_window <= shrink {
                return Err(MetaError::InvalidConfig(format!(
                    "conv_window {} too small for {} blocks of kernel {}",
                    self.conv_window,
                    Self::CONV_BLOCKS,
                    self.conv_kernel
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MetaConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = MetaConfig::new()
            .with_num_experts(5)
            .with_inner_steps(3)
            .with_gate_mode(GateMode::Uniform)
            .with_loss_combination(LossCombination::Total);

        assert_eq!(config.num_experts, 5);
        assert_eq!(config.inner_steps, 3);
        assert_eq!(config.gate_mode, GateMode::Uniform);
        assert_eq!(config.loss_combination, LossCombination::Total);
    }

    #[test]
    fn test_zero_experts_rejected() {
        let config = MetaConfig::new().with_num_experts(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_inner_steps_rejected() {
        let config = MetaConfig::new().with_inner_steps(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_accuracy_on_regression_rejected() {
        let config = MetaConfig::new()
            .with_task_kind(TaskKind::Regression)
            .with_track_accuracy(true);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_clip_range_rejected() {
        let config = MetaConfig::new().with_grad_clip(1.0, -1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conv_window_too_small_rejected() {
        let mut config = MetaConfig::new().with_model(ModelKind::Conv);
        config.conv_window = 8;
        config.conv_kernel = 3;
        config.input_dim = config.conv_channels * config.conv_window;
        assert!(config.validate().is_err());
    }
}
