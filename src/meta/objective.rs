//! Loss functions, metrics and meta-batch aggregation.

use ndarray::{Array1, Array2, Axis};

use crate::config::{LossCombination, MetaConfig, TaskKind};
use crate::meta::mixture::combine;
use crate::meta::processor::TaskOutcome;
use crate::meta::task::Task;

/// Mean squared error over all elements
pub fn mse(predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    assert_eq!(predictions.dim(), targets.dim(), "prediction/target mismatch");
    let n = predictions.len() as f64;
    (predictions - targets).mapv(|d| d * d).sum() / n
}

/// Gradient of [`mse`] with respect to the predictions
pub fn mse_grad(predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
    let n = predictions.len() as f64;
    (predictions - targets).mapv(|d| 2.0 * d / n)
}

/// Row-wise numerically stable softmax
pub(crate) fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Softmax cross-entropy against one-hot targets, averaged over the batch
pub fn cross_entropy(logits: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    assert_eq!(logits.dim(), targets.dim(), "logit/target mismatch");
    let probs = softmax_rows(logits);
    let mut total = 0.0;
    for (p_row, t_row) in probs.rows().into_iter().zip(targets.rows()) {
        for (&p, &t) in p_row.iter().zip(t_row.iter()) {
            if t > 0.0 {
                total -= t * p.max(1e-12).ln();
            }
        }
    }
    total / logits.nrows() as f64
}

/// Gradient of [`cross_entropy`] with respect to the logits
pub fn cross_entropy_grad(logits: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
    let n = logits.nrows() as f64;
    (softmax_rows(logits) - targets).mapv(|v| v / n)
}

/// Fraction of rows whose argmax matches the target argmax
pub fn accuracy(logits: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    assert_eq!(logits.dim(), targets.dim(), "logit/target mismatch");
    let correct = logits
        .rows()
        .into_iter()
        .zip(targets.rows())
        .filter(|(p, t)| argmax(p) == argmax(t))
        .count();
    correct as f64 / logits.nrows() as f64
}

fn argmax(row: &ndarray::ArrayView1<f64>) -> usize {
    let mut best = 0;
    let mut best_val = f64::NEG_INFINITY;
    for (i, &v) in row.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Task-family dispatch for the loss value
pub fn loss_value(kind: TaskKind, predictions: &Array2<f64>, targets: &Array2<f64>) -> f64 {
    match kind {
        TaskKind::Regression => mse(predictions, targets),
        TaskKind::Classification => cross_entropy(predictions, targets),
    }
}

/// Task-family dispatch for the loss gradient
pub fn loss_grad(kind: TaskKind, predictions: &Array2<f64>, targets: &Array2<f64>) -> Array2<f64> {
    match kind {
        TaskKind::Regression => mse_grad(predictions, targets),
        TaskKind::Classification => cross_entropy_grad(predictions, targets),
    }
}

/// Scalar summaries of one meta-batch, recomputed every meta-step
#[derive(Debug, Clone)]
pub struct MetaBatchAggregate {
    /// Loss of the gated mixture prediction, averaged over tasks
    pub mixed_loss: f64,
    /// Argmax accuracy of the mixture (classification with tracking only)
    pub mixed_accuracy: Option<f64>,
    /// Per-expert, per-inner-step query losses, averaged over tasks;
    /// shape (num_experts, inner_steps)
    pub expert_step_losses: Array2<f64>,
    /// Per-expert, per-inner-step accuracies, when tracked
    pub expert_step_accuracies: Option<Array2<f64>>,
    /// Mean softmaxed gate weight per expert, a routing diagnostic
    pub mean_gate_weights: Array1<f64>,
}

/// Average per-task results into one [`MetaBatchAggregate`].
///
/// `outcomes` and `tasks` must line up index-for-index.
pub fn aggregate(
    outcomes: &[TaskOutcome],
    tasks: &[Task],
    config: &MetaConfig,
) -> MetaBatchAggregate {
    assert_eq!(outcomes.len(), tasks.len(), "outcome/task mismatch");
    let num_tasks = tasks.len() as f64;
    let n = config.num_experts;
    let k = config.inner_steps;
    let track = config.track_accuracy && config.task_kind == TaskKind::Classification;

    let mut mixed_loss = 0.0;
    let mut mixed_accuracy = 0.0;
    let mut step_losses = Array2::zeros((n, k));
    let mut step_accuracies = Array2::zeros((n, k));
    let mut gate_weight_sum = Array1::zeros(n);

    for (outcome, task) in outcomes.iter().zip(tasks.iter()) {
        let (mixed, gate_weights) = combine(
            &outcome.expert_outputs,
            &outcome.gate_scores,
            config.gate_mode,
            config.gate_temperature,
        );
        mixed_loss += loss_value(config.task_kind, &mixed, &task.query_labels);
        if track {
            mixed_accuracy += accuracy(&mixed, &task.query_labels);
        }
        gate_weight_sum += &(gate_weights.sum_axis(Axis(0)) / gate_weights.nrows() as f64);

        for e in 0..n {
            for s in 0..k {
                step_losses[[e, s]] += outcome.step_losses[e][s];
                if let Some(acc) = &outcome.step_accuracies {
                    step_accuracies[[e, s]] += acc[e][s];
                }
            }
        }
    }

    MetaBatchAggregate {
        mixed_loss: mixed_loss / num_tasks,
        mixed_accuracy: track.then(|| mixed_accuracy / num_tasks),
        expert_step_losses: step_losses / num_tasks,
        expert_step_accuracies: track.then(|| step_accuracies / num_tasks),
        mean_gate_weights: gate_weight_sum / num_tasks,
    }
}

/// The scalar the outer optimizer descends on, per the configured policy.
///
/// Only final-step expert losses enter any objective; earlier steps are
/// diagnostics.
pub fn objective_value(aggregate: &MetaBatchAggregate, config: &MetaConfig) -> f64 {
    let final_step = config.inner_steps - 1;
    let expert_sum: f64 = aggregate.expert_step_losses.column(final_step).sum();
    match config.loss_combination {
        LossCombination::Mixed => aggregate.mixed_loss,
        LossCombination::Uniform => expert_sum,
        LossCombination::Total => aggregate.mixed_loss + config.total_loss_weight * expert_sum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_mse_and_grad() {
        let pred = array![[1.0], [3.0]];
        let target = array![[0.0], [1.0]];
        assert!((mse(&pred, &target) - 2.5).abs() < 1e-12);
        let grad = mse_grad(&pred, &target);
        assert!((grad[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((grad[[1, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_cross_entropy_perfect_prediction() {
        let logits = array![[100.0, 0.0], [0.0, 100.0]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];
        assert!(cross_entropy(&logits, &targets) < 1e-6);
    }

    #[test]
    fn test_cross_entropy_grad_sums_to_zero_per_row() {
        let logits = array![[0.3, -0.2, 1.0], [2.0, 0.0, -1.0]];
        let targets = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
        let grad = cross_entropy_grad(&logits, &targets);
        for row in grad.rows() {
            assert!(row.sum().abs() < 1e-12);
        }
    }

    #[test]
    fn test_accuracy() {
        let logits = array![[2.0, 1.0], [0.0, 3.0], [5.0, 0.0]];
        let targets = array![[1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
        assert!((accuracy(&logits, &targets) - 2.0 / 3.0).abs() < 1e-12);
    }
}
