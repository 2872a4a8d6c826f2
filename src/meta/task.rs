//! Few-shot task data.

use ndarray::Array2;

use crate::error::{MetaError, Result};

/// One few-shot problem instance, already split into a training set (used
/// for inner-loop adaptation) and a query set (used for the meta-objective).
///
/// Tasks are immutable and live for a single meta-step.
#[derive(Debug, Clone)]
pub struct Task {
    /// Training split features for adaptation
    pub train_inputs: Array2<f64>,
    /// Training split targets
    pub train_labels: Array2<f64>,
    /// Query split features for evaluation
    pub query_inputs: Array2<f64>,
    /// Query split targets
    pub query_labels: Array2<f64>,
}

impl Task {
    /// Create a task, rejecting inconsistent splits up front
    pub fn new(
        train_inputs: Array2<f64>,
        train_labels: Array2<f64>,
        query_inputs: Array2<f64>,
        query_labels: Array2<f64>,
    ) -> Result<Self> {
        if train_inputs.nrows() != train_labels.nrows() {
            return Err(MetaError::BatchSizeMismatch {
                inputs: train_inputs.nrows(),
                labels: train_labels.nrows(),
            });
        }
        if query_inputs.nrows() != query_labels.nrows() {
            return Err(MetaError::BatchSizeMismatch {
                inputs: query_inputs.nrows(),
                labels: query_labels.nrows(),
            });
        }
        if train_inputs.ncols() != query_inputs.ncols() {
            return Err(MetaError::DimensionMismatch {
                what: "query feature",
                expected: train_inputs.ncols(),
                actual: query_inputs.ncols(),
            });
        }
        if train_labels.ncols() != query_labels.ncols() {
            return Err(MetaError::DimensionMismatch {
                what: "query label",
                expected: train_labels.ncols(),
                actual: query_labels.ncols(),
            });
        }
        Ok(Self {
            train_inputs,
            train_labels,
            query_inputs,
            query_labels,
        })
    }

    /// Number of training examples
    pub fn train_size(&self) -> usize {
        self.train_inputs.nrows()
    }

    /// Number of query examples
    pub fn query_size(&self) -> usize {
        self.query_inputs.nrows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_task() {
        let task = Task::new(
            Array2::zeros((10, 4)),
            Array2::zeros((10, 1)),
            Array2::zeros((5, 4)),
            Array2::zeros((5, 1)),
        );
        assert!(task.is_ok());
        let task = task.unwrap();
        assert_eq!(task.train_size(), 10);
        assert_eq!(task.query_size(), 5);
    }

    #[test]
    fn test_mismatched_train_split_rejected() {
        let task = Task::new(
            Array2::zeros((10, 4)),
            Array2::zeros((9, 1)),
            Array2::zeros((5, 4)),
            Array2::zeros((5, 1)),
        );
        assert!(matches!(
            task,
            Err(MetaError::BatchSizeMismatch {
                inputs: 10,
                labels: 9
            })
        ));
    }

    #[test]
    fn test_mismatched_label_width_rejected() {
        let task = Task::new(
            Array2::zeros((10, 4)),
            Array2::zeros((10, 2)),
            Array2::zeros((5, 4)),
            Array2::zeros((5, 1)),
        );
        assert!(task.is_err());
    }
}
