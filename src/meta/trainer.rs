//! Meta-training orchestration.
//!
//! One meta-step: map every task through the gate and the experts, combine
//! the expert predictions, reduce to the configured objective, build the
//! outer gradient, clip, and apply a single Adam update to the base weight
//! sets. The store is written exactly once per step, strictly after every
//! task has finished.

use std::sync::Arc;

use ndarray::Array2;

use crate::config::{GateMode, LossCombination, MetaConfig};
use crate::error::{MetaError, Result};
use crate::meta::adapter::adapt;
use crate::meta::executor::run_meta_batch;
use crate::meta::mixture::combine;
use crate::meta::objective::{aggregate, loss_grad, objective_value, MetaBatchAggregate};
use crate::meta::optimizer::AdamOptimizer;
use crate::meta::processor::{TaskOutcome, TaskProcessor};
use crate::meta::task::Task;
use crate::model::{build_model, ForwardModel};
use crate::weights::{Role, StoreGrads, WeightSet, WeightStore};

/// Per-step training record
#[derive(Debug, Clone)]
pub struct StepStats {
    pub step: usize,
    pub mixed_loss: f64,
    pub mixed_accuracy: Option<f64>,
}

/// Trainer owning the model, the base weight store and the outer optimizer.
pub struct MetaTrainer {
    model: Arc<dyn ForwardModel>,
    store: WeightStore,
    config: MetaConfig,
    optimizer: AdamOptimizer,
    history: Vec<StepStats>,
    step: usize,
}

impl MetaTrainer {
    /// Validate the configuration and initialize one gate and N expert
    /// weight sets. All setup preconditions are checked here, before any
    /// task is processed.
    pub fn new(config: MetaConfig) -> Result<Self> {
        let model = build_model(&config)?;
        let gate = model.init_weights(config.num_experts);
        let experts = (0..config.num_experts)
            .map(|_| model.init_weights(config.output_dim))
            .collect();
        let optimizer = AdamOptimizer::new(config.meta_lr);
        Ok(Self {
            model,
            store: WeightStore::new(gate, experts),
            config,
            optimizer,
            history: Vec::new(),
            step: 0,
        })
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    /// The base weight sets (snapshot this for persistence)
    pub fn store(&self) -> &WeightStore {
        &self.store
    }

    pub fn history(&self) -> &[StepStats] {
        &self.history
    }

    /// Replace the base weights from a snapshot with matching layout
    pub fn restore(&mut self, store: WeightStore) -> Result<()> {
        if store.num_experts() != self.config.num_experts {
            return Err(MetaError::StoreMismatch(format!(
                "snapshot has {} experts, config wants {}",
                store.num_experts(),
                self.config.num_experts
            )));
        }
        for role in self.store.roles() {
            if !self.store.role(role).same_names(store.role(role)) {
                return Err(MetaError::StoreMismatch(format!(
                    "parameter names for {role} do not match"
                )));
            }
        }
        self.store = store;
        self.optimizer.reset();
        Ok(())
    }

    /// Change the meta learning rate between steps
    pub fn set_meta_lr(&mut self, lr: f64) {
        self.optimizer.set_learning_rate(lr);
    }

    /// Evaluate a meta-batch without touching the weights
    pub fn evaluate(&self, tasks: &[Task]) -> Result<MetaBatchAggregate> {
        let outcomes = self.run_tasks(tasks)?;
        Ok(aggregate(&outcomes, tasks, &self.config))
    }

    /// One full meta-step: evaluate, differentiate, update.
    pub fn meta_train_step(&mut self, tasks: &[Task]) -> Result<MetaBatchAggregate> {
        let outcomes = self.run_tasks(tasks)?;
        let stats = aggregate(&outcomes, tasks, &self.config);

        let grads = if self.config.first_order {
            self.first_order_gradients(tasks, &outcomes)
        } else {
            self.unrolled_gradients(tasks)?
        };
        self.optimizer
            .step(&mut self.store, &grads, self.config.grad_clip);

        self.step += 1;
        match stats.mixed_accuracy {
            Some(acc) => tracing::info!(
                "meta-step {}: mixed_loss={:.6}, mixed_accuracy={:.4}",
                self.step,
                stats.mixed_loss,
                acc
            ),
            None => tracing::info!("meta-step {}: mixed_loss={:.6}", self.step, stats.mixed_loss),
        }
        let final_step = self.config.inner_steps - 1;
        for e in 0..self.config.num_experts {
            tracing::debug!(
                "meta-step {}: expert {} final-step loss={:.6}",
                self.step,
                e,
                stats.expert_step_losses[[e, final_step]]
            );
        }
        self.history.push(StepStats {
            step: self.step,
            mixed_loss: stats.mixed_loss,
            mixed_accuracy: stats.mixed_accuracy,
        });
        Ok(stats)
    }

    /// Adapt every expert to a new task's training data and return the
    /// final fast weights, one set per expert (deployment-time use).
    pub fn adapt_to_task(
        &self,
        inputs: &Array2<f64>,
        labels: &Array2<f64>,
        steps: Option<usize>,
    ) -> Result<Vec<WeightSet>> {
        let steps = steps.unwrap_or(self.config.inner_steps);
        let mut adapted = Vec::with_capacity(self.config.num_experts);
        for e in 0..self.config.num_experts {
            let mut trajectory = adapt(
                self.model.as_ref(),
                self.store.expert(e),
                inputs,
                labels,
                steps,
                self.config.inner_lr,
                self.config.task_kind,
            )?;
            adapted.push(trajectory.pop().expect("non-empty trajectory"));
        }
        Ok(adapted)
    }

    fn run_tasks(&self, tasks: &[Task]) -> Result<Vec<TaskOutcome>> {
        let processor = TaskProcessor::new(self.model.as_ref(), &self.store, &self.config);
        run_meta_batch(&processor, tasks, self.config.parallel_tasks)
    }

    /// Whether the gate has any gradient path into the configured objective
    fn gate_participates(&self) -> bool {
        self.config.gate_mode == GateMode::Learned
            && self.config.loss_combination != LossCombination::Uniform
    }

    /// First-order meta-gradients: backpropagate the objective through each
    /// expert's final fast weights (treating the inner steps as constant)
    /// and through the gate's base weights.
    fn first_order_gradients(&self, tasks: &[Task], outcomes: &[TaskOutcome]) -> StoreGrads {
        let n = self.config.num_experts;
        let kind = self.config.task_kind;
        let mut grads = StoreGrads::empty(n);

        for (outcome, task) in outcomes.iter().zip(tasks.iter()) {
            let (mixed, gate_weights) = combine(
                &outcome.expert_outputs,
                &outcome.gate_scores,
                self.config.gate_mode,
                self.config.gate_temperature,
            );
            let mixed_grad = loss_grad(kind, &mixed, &task.query_labels);
            let queries = mixed_grad.nrows();

            for e in 0..n {
                let mut upstream = match self.config.loss_combination {
                    LossCombination::Uniform => Array2::zeros(mixed_grad.dim()),
                    _ => {
                        let mut weighted = mixed_grad.clone();
                        for q in 0..queries {
                            let w = gate_weights[[q, e]];
                            weighted.row_mut(q).mapv_inplace(|v| v * w);
                        }
                        weighted
                    }
                };
                if self.config.loss_combination != LossCombination::Mixed {
                    let own = loss_grad(kind, &outcome.expert_outputs[e], &task.query_labels);
                    let weight = match self.config.loss_combination {
                        LossCombination::Uniform => 1.0,
                        LossCombination::Total => self.config.total_loss_weight,
                        LossCombination::Mixed => unreachable!(),
                    };
                    upstream.zip_mut_with(&own, |u, o| *u += weight * o);
                }
                grads.add_expert(
                    e,
                    self.model
                        .backward(&outcome.expert_fast_weights[e], &task.query_inputs, &upstream),
                );
            }

            if self.gate_participates() {
                // dL/d(gate weight) per example, then back through the
                // temperature-scaled softmax to the raw scores
                let mut weight_grad = Array2::zeros((queries, n));
                for e in 0..n {
                    for q in 0..queries {
                        weight_grad[[q, e]] =
                            mixed_grad.row(q).dot(&outcome.expert_outputs[e].row(q));
                    }
                }
                let scale = 1.0 / (self.config.gate_temperature + 1.0);
                let mut score_grad = Array2::zeros((queries, n));
                for q in 0..queries {
                    let dot: f64 = (0..n).map(|k| weight_grad[[q, k]] * gate_weights[[q, k]]).sum();
                    for j in 0..n {
                        score_grad[[q, j]] =
                            scale * gate_weights[[q, j]] * (weight_grad[[q, j]] - dot);
                    }
                }
                grads.add_gate(
                    self.model
                        .backward(self.store.gate(), &task.query_inputs, &score_grad),
                );
            }
        }

        grads.scale(1.0 / tasks.len() as f64);
        grads
    }

    /// Full meta-gradients through the unrolled inner loop, by central
    /// finite differences of the adapt-then-evaluate objective with respect
    /// to every base parameter.
    fn unrolled_gradients(&self, tasks: &[Task]) -> Result<StoreGrads> {
        let eps = self.config.gradient_epsilon;
        let mut work = self.store.clone();
        let mut grads = StoreGrads::empty(self.config.num_experts);

        for role in self.store.roles() {
            if role == Role::Gate && !self.gate_participates() {
                continue;
            }
            let names: Vec<String> = work.role(role).names().map(String::from).collect();
            let mut role_grads = WeightSet::new();
            for (name, tensor) in self.store.role(role).iter() {
                role_grads.insert(name, tensor.zeros_like());
            }

            for name in &names {
                let len = work.role(role).get(name).expect("known name").len();
                for idx in 0..len {
                    let original = work.role(role).get(name).expect("known name").get(idx);

                    self.perturb(&mut work, role, name, idx, original + eps);
                    let plus = self.objective_with(&work, tasks)?;
                    self.perturb(&mut work, role, name, idx, original - eps);
                    let minus = self.objective_with(&work, tasks)?;
                    self.perturb(&mut work, role, name, idx, original);

                    role_grads
                        .get_mut(name)
                        .expect("known name")
                        .set(idx, (plus - minus) / (2.0 * eps));
                }
            }

            match role {
                Role::Gate => grads.add_gate(role_grads),
                Role::Expert(i) => grads.add_expert(i, role_grads),
            }
        }
        Ok(grads)
    }

    fn perturb(&self, store: &mut WeightStore, role: Role, name: &str, idx: usize, value: f64) {
        store
            .role_mut(role)
            .get_mut(name)
            .expect("known name")
            .set(idx, value);
    }

    /// Objective value of a candidate store over the batch
    fn objective_with(&self, store: &WeightStore, tasks: &[Task]) -> Result<f64> {
        let processor = TaskProcessor::new(self.model.as_ref(), store, &self.config);
        let outcomes = run_meta_batch(&processor, tasks, self.config.parallel_tasks)?;
        Ok(objective_value(
            &aggregate(&outcomes, tasks, &self.config),
            &self.config,
        ))
    }
}
