//! Meta-learning core: inner-loop adaptation, mixture gating, meta-batch
//! execution and the outer optimization step.

pub mod adapter;
pub mod executor;
pub mod mixture;
pub mod objective;
pub mod optimizer;
pub mod processor;
pub mod task;
pub mod trainer;

pub use adapter::adapt;
pub use executor::run_meta_batch;
pub use mixture::combine;
pub use objective::{aggregate, objective_value, MetaBatchAggregate};
pub use optimizer::AdamOptimizer;
pub use processor::{TaskOutcome, TaskProcessor};
pub use task::Task;
pub use trainer::{MetaTrainer, StepStats};
