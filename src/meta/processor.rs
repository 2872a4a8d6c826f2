//! Per-task processing: gate pass plus independent expert adaptation.

use ndarray::Array2;

use crate::config::{MetaConfig, TaskKind};
use crate::error::{MetaError, Result};
use crate::meta::adapter::adapt;
use crate::meta::objective::{accuracy, loss_value};
use crate::meta::task::Task;
use crate::model::ForwardModel;
use crate::weights::{WeightSet, WeightStore};

/// Everything one task contributes to the meta-step.
///
/// Fast weights are task-scoped: they are kept here only long enough for
/// the meta-gradient computation and are discarded with the outcome.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Raw gate scores on the query split, one column per expert
    pub gate_scores: Array2<f64>,
    /// Final-step query predictions, one entry per expert
    pub expert_outputs: Vec<Array2<f64>>,
    /// Final fast weights, one entry per expert
    pub expert_fast_weights: Vec<WeightSet>,
    /// Query losses per expert per inner step, `[expert][step]`
    pub step_losses: Vec<Vec<f64>>,
    /// Query accuracies per expert per inner step, when tracked
    pub step_accuracies: Option<Vec<Vec<f64>>>,
}

/// Runs one task through the gate and every expert.
///
/// Holds only shared references; a single processor is used concurrently
/// across the whole meta-batch.
pub struct TaskProcessor<'a> {
    model: &'a dyn ForwardModel,
    store: &'a WeightStore,
    config: &'a MetaConfig,
}

impl<'a> TaskProcessor<'a> {
    pub fn new(model: &'a dyn ForwardModel, store: &'a WeightStore, config: &'a MetaConfig) -> Self {
        Self {
            model,
            store,
            config,
        }
    }

    /// Process a single task.
    ///
    /// The gate is evaluated with its base weights and is never adapted;
    /// each expert starts from its own base weights and adapts in
    /// isolation, so no information crosses experts within a task.
    pub fn process(&self, task: &Task) -> Result<TaskOutcome> {
        if task.query_inputs.ncols() != self.model.input_dim() {
            return Err(MetaError::DimensionMismatch {
                what: "query feature",
                expected: self.model.input_dim(),
                actual: task.query_inputs.ncols(),
            });
        }
        if task.query_labels.ncols() != self.config.output_dim {
            return Err(MetaError::DimensionMismatch {
                what: "query label",
                expected: self.config.output_dim,
                actual: task.query_labels.ncols(),
            });
        }

        let gate_scores = self.model.forward(self.store.gate(), &task.query_inputs);

        let track = self.config.track_accuracy && self.config.task_kind == TaskKind::Classification;
        let num_experts = self.config.num_experts;
        let mut expert_outputs = Vec::with_capacity(num_experts);
        let mut expert_fast_weights = Vec::with_capacity(num_experts);
        let mut step_losses = Vec::with_capacity(num_experts);
        let mut step_accuracies = track.then(Vec::new);

        for e in 0..num_experts {
            let trajectory = adapt(
                self.model,
                self.store.expert(e),
                &task.train_inputs,
                &task.train_labels,
                self.config.inner_steps,
                self.config.inner_lr,
                self.config.task_kind,
            )?;

            let mut losses = Vec::with_capacity(self.config.inner_steps);
            let mut accuracies = Vec::with_capacity(self.config.inner_steps);
            let mut final_output = None;
            for snapshot in trajectory.iter().skip(1) {
                let output = self.model.forward(snapshot, &task.query_inputs);
                losses.push(loss_value(
                    self.config.task_kind,
                    &output,
                    &task.query_labels,
                ));
                if track {
                    accuracies.push(accuracy(&output, &task.query_labels));
                }
                final_output = Some(output);
            }

            expert_outputs.push(final_output.expect("inner_steps >= 1"));
            expert_fast_weights.push(trajectory.into_iter().last().expect("non-empty trajectory"));
            step_losses.push(losses);
            if let Some(acc) = &mut step_accuracies {
                acc.push(accuracies);
            }
        }

        Ok(TaskOutcome {
            gate_scores,
            expert_outputs,
            expert_fast_weights,
            step_losses,
            step_accuracies,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_model;
    use ndarray::Array;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;

    fn setup(config: &MetaConfig) -> (std::sync::Arc<dyn ForwardModel>, WeightStore) {
        let model = build_model(config).unwrap();
        let gate = model.init_weights(config.num_experts);
        let experts = (0..config.num_experts)
            .map(|_| model.init_weights(config.output_dim))
            .collect();
        (model, WeightStore::new(gate, experts))
    }

    fn regression_task(input_dim: usize) -> Task {
        Task::new(
            Array::random((8, input_dim), Uniform::new(-1.0, 1.0)),
            Array::random((8, 1), Uniform::new(-1.0, 1.0)),
            Array::random((6, input_dim), Uniform::new(-1.0, 1.0)),
            Array::random((6, 1), Uniform::new(-1.0, 1.0)),
        )
        .unwrap()
    }

    #[test]
    fn test_outcome_shapes() {
        let config = MetaConfig::new()
            .with_num_experts(3)
            .with_inner_steps(2)
            .with_dims(4, 1)
            .with_hidden_dims(vec![8]);
        let (model, store) = setup(&config);
        let processor = TaskProcessor::new(model.as_ref(), &store, &config);

        let outcome = processor.process(&regression_task(4)).unwrap();
        assert_eq!(outcome.gate_scores.dim(), (6, 3));
        assert_eq!(outcome.expert_outputs.len(), 3);
        assert_eq!(outcome.expert_outputs[0].dim(), (6, 1));
        assert_eq!(outcome.expert_fast_weights.len(), 3);
        assert_eq!(outcome.step_losses.len(), 3);
        assert_eq!(outcome.step_losses[0].len(), 2);
        assert!(outcome.step_accuracies.is_none());
    }

    #[test]
    fn test_experts_adapt_independently() {
        let config = MetaConfig::new()
            .with_num_experts(2)
            .with_inner_steps(1)
            .with_dims(4, 1)
            .with_hidden_dims(vec![8]);
        let (model, store) = setup(&config);
        let processor = TaskProcessor::new(model.as_ref(), &store, &config);
        let task = regression_task(4);

        let outcome = processor.process(&task).unwrap();
        // Independently initialized experts must not share fast weights
        assert!(outcome.expert_fast_weights[0] != outcome.expert_fast_weights[1]);
    }

    #[test]
    fn test_wrong_input_width_rejected() {
        let config = MetaConfig::new().with_dims(4, 1).with_hidden_dims(vec![8]);
        let (model, store) = setup(&config);
        let processor = TaskProcessor::new(model.as_ref(), &store, &config);

        let task = regression_task(3);
        assert!(processor.process(&task).is_err());
    }
}
