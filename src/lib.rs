//! # Mixture-of-Experts MAML for Market Prediction
//!
//! This library meta-trains a family of expert predictors together with a
//! learned gating network, so that a handful of gradient steps on a few
//! examples of a new task (a new asset, a new regime) yields a model that
//! generalizes to held-out examples of the same task.
//!
//! ## How it works
//!
//! Every meta-step processes a batch of few-shot tasks:
//!
//! 1. Each expert starts from its own base weights and adapts to the
//!    task's training split with a few gradient steps ("fast weights").
//! 2. The gate scores the task's query examples with its base weights; it
//!    is never adapted, only meta-learned.
//! 3. A temperature-scaled softmax over the gate scores mixes the experts'
//!    query predictions into a single output per example.
//! 4. The outer Adam step updates all base weights through the chosen
//!    objective, either with the first-order approximation or by
//!    differentiating through the whole unrolled adaptation.
//!
//! Tasks never share state during a meta-batch, so the batch is processed
//! as a parallel map.
//!
//! ## Example
//!
//! ```rust,ignore
//! use moe_maml_trading::prelude::*;
//!
//! let config = MetaConfig::new()
//!     .with_num_experts(3)
//!     .with_inner_steps(5)
//!     .with_first_order(true)
//!     .with_dims(1, 1);
//!
//! let mut trainer = MetaTrainer::new(config)?;
//! let generator = SinusoidTaskGenerator::new(SinusoidConfig::default());
//!
//! for _ in 0..1000 {
//!     let tasks = generator.sample_batch(4);
//!     let stats = trainer.meta_train_step(&tasks)?;
//!     println!("mixed loss: {:.4}", stats.mixed_loss);
//! }
//! ```
//!
//! ## Modules
//!
//! - `config` - run configuration and ablation switches
//! - `weights` - weight sets, roles and the weight store
//! - `model` - forward network variants (fully-connected, convolutional)
//! - `meta` - adaptation, gating, meta-batch execution, outer optimization
//! - `data` - synthetic task generators

pub mod config;
pub mod data;
pub mod error;
pub mod meta;
pub mod model;
pub mod weights;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        GateMode, LossCombination, MetaConfig, ModelKind, TaskKind,
    };
    pub use crate::data::{
        ClusterConfig, ClusterTaskGenerator, SinusoidConfig, SinusoidTaskGenerator,
    };
    pub use crate::error::{MetaError, Result};
    pub use crate::meta::{
        AdamOptimizer, MetaBatchAggregate, MetaTrainer, StepStats, Task, TaskOutcome,
    };
    pub use crate::model::{ConvModel, FcModel, ForwardModel};
    pub use crate::weights::{Role, Tensor, WeightSet, WeightStore};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
