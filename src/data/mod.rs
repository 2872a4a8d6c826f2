//! Task generation.
//!
//! The trainer itself only consumes already-split [`Task`](crate::meta::Task)
//! batches; these generators exist so the crate can be exercised end to end
//! without an external data pipeline.

mod synthetic;

pub use synthetic::{
    ClusterConfig, ClusterTaskGenerator, SinusoidConfig, SinusoidTaskGenerator,
};
