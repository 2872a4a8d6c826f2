//! Forward network variants.
//!
//! The meta-learning machinery only needs one capability from a network:
//! given a named weight set and an input batch, produce an output batch,
//! with an analytic backward pass for the gradients. Both variants here are
//! stateless: forward and backward are pure functions of (weights, inputs),
//! so a single model value can be shared read-only across concurrently
//! processed tasks.

mod conv;
mod fc;

use std::sync::Arc;

use ndarray::Array2;

pub use conv::ConvModel;
pub use fc::FcModel;

use crate::config::{MetaConfig, ModelKind};
use crate::error::Result;
use crate::weights::WeightSet;

/// A differentiable forward network over named weight sets.
///
/// `head_dim` at initialization selects the output width, so the same
/// backbone shape serves both the gate (one score per expert) and the
/// experts (one value per output class).
pub trait ForwardModel: Send + Sync {
    /// Expected input width (columns of the input batch)
    fn input_dim(&self) -> usize;

    /// Freshly initialized weights with the given head width
    fn init_weights(&self, head_dim: usize) -> WeightSet;

    /// Pure forward pass: (batch, input_dim) -> (batch, head_dim)
    fn forward(&self, weights: &WeightSet, inputs: &Array2<f64>) -> Array2<f64>;

    /// Analytic gradients of a scalar loss with respect to every weight,
    /// given the upstream gradient dL/d(output). Activations are recomputed
    /// internally; neither the weights nor the model are mutated.
    fn backward(
        &self,
        weights: &WeightSet,
        inputs: &Array2<f64>,
        upstream: &Array2<f64>,
    ) -> WeightSet;
}

/// Build the configured forward variant. The choice is fixed for the run.
pub fn build_model(config: &MetaConfig) -> Result<Arc<dyn ForwardModel>> {
    config.validate()?;
    let model: Arc<dyn ForwardModel> = match config.model {
        ModelKind::Fc => Arc::new(FcModel::new(config.input_dim, config.hidden_dims.clone())),
        ModelKind::Conv => Arc::new(ConvModel::new(
            config.conv_channels,
            config.conv_window,
            config.conv_filters,
            config.conv_kernel,
        )),
    };
    Ok(model)
}
