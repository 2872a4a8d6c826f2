//! Outer-loop Adam optimizer over the weight store.

use std::collections::HashMap;

use crate::weights::{StoreGrads, Tensor, WeightStore};

/// Adam (Adaptive Moment Estimation) over every role's weight set.
///
/// Keeps one pair of moment tensors per named parameter. Parameters whose
/// gradient is undefined for a step receive no update at all; their values
/// and moments are left exactly as they were, which is not the same thing
/// as applying a zero gradient.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: usize,
    m: HashMap<String, Tensor>,
    v: HashMap<String, Tensor>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            m: HashMap::new(),
            v: HashMap::new(),
        }
    }

    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Change the meta learning rate between steps (external annealing)
    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }

    /// Apply one outer update to the store.
    ///
    /// Gradients are clipped elementwise to `clip` (when given) before the
    /// moment updates, so the clip range bounds what Adam ever sees.
    pub fn step(&mut self, store: &mut WeightStore, grads: &StoreGrads, clip: Option<(f64, f64)>) {
        self.t += 1;
        let (beta1, beta2) = (self.beta1, self.beta2);
        let (lr, eps) = (self.learning_rate, self.epsilon);
        let bias1 = 1.0 - beta1.powi(self.t as i32);
        let bias2 = 1.0 - beta2.powi(self.t as i32);

        for role in store.roles() {
            let Some(role_grads) = grads.role(role) else {
                continue;
            };
            let names: Vec<String> = role_grads.names().map(String::from).collect();
            for name in names {
                let grad = role_grads.get(&name).expect("name from this set");
                let grad = match clip {
                    Some((lo, hi)) => grad.map(|g| g.clamp(lo, hi)),
                    None => grad.clone(),
                };

                let key = format!("{role}/{name}");
                let m = self
                    .m
                    .entry(key.clone())
                    .or_insert_with(|| grad.zeros_like());
                *m = m.zip_with(&grad, |m, g| m * beta1 + g * (1.0 - beta1));
                let m = m.clone();

                let v = self.v.entry(key).or_insert_with(|| grad.zeros_like());
                *v = v.zip_with(&grad, |v, g| v * beta2 + g * g * (1.0 - beta2));
                let v = v.clone();

                let update =
                    m.zip_with(&v, |m, v| lr * (m / bias1) / ((v / bias2).sqrt() + eps));
                let params = store.role_mut(role);
                if let Some(current) = params.get_mut(&name) {
                    *current = current.zip_with(&update, |p, u| p - u);
                }
            }
        }
    }

    /// Drop all moment state (for a fresh training run)
    pub fn reset(&mut self) {
        self.t = 0;
        self.m.clear();
        self.v.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::WeightSet;
    use ndarray::array;

    fn store_with(value: f64) -> WeightStore {
        let mut gate = WeightSet::new();
        gate.insert("w1", Tensor::Matrix(array![[value, value]]));
        let mut expert = WeightSet::new();
        expert.insert("w1", Tensor::Matrix(array![[value, value]]));
        WeightStore::new(gate, vec![expert])
    }

    fn unit_grads() -> WeightSet {
        let mut set = WeightSet::new();
        set.insert("w1", Tensor::Matrix(array![[1.0, -1.0]]));
        set
    }

    #[test]
    fn test_adam_moves_against_gradient() {
        let mut store = store_with(1.0);
        let mut opt = AdamOptimizer::new(0.1);
        let mut grads = StoreGrads::empty(1);
        grads.add_expert(0, unit_grads());

        opt.step(&mut store, &grads, None);

        let w = store.expert(0).matrix("w1");
        assert!(w[[0, 0]] < 1.0);
        assert!(w[[0, 1]] > 1.0);
    }

    #[test]
    fn test_undefined_gradient_leaves_parameters_bit_identical() {
        let mut store = store_with(0.75);
        let before = store.gate().clone();
        let mut opt = AdamOptimizer::new(0.1);
        let mut grads = StoreGrads::empty(1);
        grads.add_expert(0, unit_grads());

        opt.step(&mut store, &grads, None);

        assert_eq!(store.gate(), &before);
    }

    #[test]
    fn test_clipping_bounds_what_adam_sees() {
        // With a huge gradient clipped to [-1, 1], the first Adam update is
        // exactly lr * clip / (clip + eps), identical to a unit gradient.
        let mut clipped_store = store_with(0.0);
        let mut unit_store = store_with(0.0);
        let mut opt_a = AdamOptimizer::new(0.1);
        let mut opt_b = AdamOptimizer::new(0.1);

        let mut huge = WeightSet::new();
        huge.insert("w1", Tensor::Matrix(array![[1e6, -1e6]]));
        let mut grads_a = StoreGrads::empty(1);
        grads_a.add_expert(0, huge);

        let mut grads_b = StoreGrads::empty(1);
        grads_b.add_expert(0, unit_grads());

        opt_a.step(&mut clipped_store, &grads_a, Some((-1.0, 1.0)));
        opt_b.step(&mut unit_store, &grads_b, None);

        assert_eq!(
            clipped_store.expert(0).matrix("w1"),
            unit_store.expert(0).matrix("w1")
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let mut store = store_with(1.0);
        let mut opt = AdamOptimizer::new(0.1);
        let mut grads = StoreGrads::empty(1);
        grads.add_expert(0, unit_grads());
        opt.step(&mut store, &grads, None);

        opt.reset();
        assert_eq!(opt.t, 0);
        assert!(opt.m.is_empty());
    }
}
