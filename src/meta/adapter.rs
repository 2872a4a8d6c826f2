//! Inner-loop adaptation.
//!
//! Runs a fixed number of gradient-descent steps on a task's training
//! split, producing a trajectory of derived ("fast") weight sets. The base
//! set is never mutated; every snapshot is a new value. Whether the outer
//! gradient later differentiates through these steps is decided by the
//! meta-gradient computation, not here.

use ndarray::Array2;

use crate::config::TaskKind;
use crate::error::{MetaError, Result};
use crate::meta::objective::loss_grad;
use crate::model::ForwardModel;
use crate::weights::WeightSet;

/// Adapt `base` to the given training split with `steps` gradient steps.
///
/// Returns the full trajectory: index 0 is the base set, index k the
/// weights after k steps (`steps + 1` snapshots in total). Every snapshot
/// carries exactly the base set's parameter names.
pub fn adapt(
    model: &dyn ForwardModel,
    base: &WeightSet,
    train_inputs: &Array2<f64>,
    train_labels: &Array2<f64>,
    steps: usize,
    inner_lr: f64,
    task_kind: TaskKind,
) -> Result<Vec<WeightSet>> {
    if steps == 0 {
        return Err(MetaError::InvalidConfig(
            "at least one inner step is required".into(),
        ));
    }
    if train_inputs.nrows() != train_labels.nrows() {
        return Err(MetaError::BatchSizeMismatch {
            inputs: train_inputs.nrows(),
            labels: train_labels.nrows(),
        });
    }
    if train_inputs.ncols() != model.input_dim() {
        return Err(MetaError::DimensionMismatch {
            what: "input feature",
            expected: model.input_dim(),
            actual: train_inputs.ncols(),
        });
    }

    let mut trajectory = Vec::with_capacity(steps + 1);
    trajectory.push(base.clone());
    for _ in 0..steps {
        let next = {
            let current = &trajectory[trajectory.len() - 1];
            let predictions = model.forward(current, train_inputs);
            let upstream = loss_grad(task_kind, &predictions, train_labels);
            let grads = model.backward(current, train_inputs, &upstream);
            current.gradient_step(&grads, inner_lr)
        };
        trajectory.push(next);
    }
    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::objective::mse;
    use crate::model::FcModel;
    use ndarray::Array;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn training_split() -> (Array2<f64>, Array2<f64>) {
        let inputs = Array::random((12, 2), Uniform::new(-1.0, 1.0));
        let labels = inputs.map_axis(ndarray::Axis(1), |r| r[0] - 0.5 * r[1]);
        let labels = labels.insert_axis(ndarray::Axis(1));
        (inputs, labels)
    }

    #[test]
    fn test_trajectory_length_and_names() {
        let model = FcModel::new(2, vec![6]);
        let base = model.init_weights(1);
        let (inputs, labels) = training_split();

        let traj = adapt(&model, &base, &inputs, &labels, 3, 0.01, TaskKind::Regression).unwrap();
        assert_eq!(traj.len(), 4);
        for snapshot in &traj {
            assert!(snapshot.same_names(&base));
        }
        assert_eq!(traj[0], base);
    }

    #[test]
    fn test_zero_steps_rejected() {
        let model = FcModel::new(2, vec![6]);
        let base = model.init_weights(1);
        let (inputs, labels) = training_split();
        assert!(adapt(&model, &base, &inputs, &labels, 0, 0.01, TaskKind::Regression).is_err());
    }

    #[test]
    fn test_batch_mismatch_rejected() {
        let model = FcModel::new(2, vec![6]);
        let base = model.init_weights(1);
        let inputs = Array2::zeros((8, 2));
        let labels = Array2::zeros((7, 1));
        assert!(matches!(
            adapt(&model, &base, &inputs, &labels, 1, 0.01, TaskKind::Regression),
            Err(MetaError::BatchSizeMismatch { inputs: 8, labels: 7 })
        ));
    }

    #[test]
    fn test_adaptation_is_deterministic() {
        let model = FcModel::new(2, vec![6]);
        let base = model.init_weights(1);
        let (inputs, labels) = training_split();

        let a = adapt(&model, &base, &inputs, &labels, 4, 0.05, TaskKind::Regression).unwrap();
        let b = adapt(&model, &base, &inputs, &labels, 4, 0.05, TaskKind::Regression).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_inner_steps_descend_on_convex_task() {
        // Linear model + MSE is convex; a small step size must not increase
        // the training loss.
        let model = FcModel::new(2, vec![]);
        let base = model.init_weights(1);
        let (inputs, labels) = training_split();

        let traj = adapt(&model, &base, &inputs, &labels, 5, 0.05, TaskKind::Regression).unwrap();
        let first = mse(&model.forward(&traj[0], &inputs), &labels);
        let last = mse(&model.forward(traj.last().unwrap(), &inputs), &labels);
        assert!(last <= first, "inner loop did not descend: {first} -> {last}");
    }

    #[test]
    fn test_base_weights_untouched() {
        let model = FcModel::new(2, vec![6]);
        let base = model.init_weights(1);
        let reference = base.clone();
        let (inputs, labels) = training_split();

        let _ = adapt(&model, &base, &inputs, &labels, 3, 0.1, TaskKind::Regression).unwrap();
        assert_eq!(base, reference);
    }
}
