//! Meta-batch execution.
//!
//! Tasks share no mutable state: the weight store is read-only for the
//! duration of the map, and every fast-weight trajectory is task-local.
//! Parallelism is therefore purely an optimization; both paths must produce
//! identical results and a test holds them to that.

use rayon::prelude::*;

use crate::error::{MetaError, Result};
use crate::meta::processor::{TaskOutcome, TaskProcessor};
use crate::meta::task::Task;

/// Apply the task processor to every task in the batch.
pub fn run_meta_batch(
    processor: &TaskProcessor<'_>,
    tasks: &[Task],
    parallel: bool,
) -> Result<Vec<TaskOutcome>> {
    if tasks.is_empty() {
        return Err(MetaError::EmptyMetaBatch);
    }
    if parallel {
        tasks.par_iter().map(|t| processor.process(t)).collect()
    } else {
        tasks.iter().map(|t| processor.process(t)).collect()
    }
}
