//! Gated combination of expert predictions.

use ndarray::Array2;

use crate::config::GateMode;
use crate::meta::objective::softmax_rows;

/// Logit forced onto expert 0 in one-hot mode; softmax over [100, 1, ...]
/// collapses to expert 0 at f64 precision.
const ONEHOT_HIGH: f64 = 100.0;
const ONEHOT_LOW: f64 = 1.0;

/// Combine per-expert query outputs into a single mixed prediction.
///
/// Returns `(mixed_prediction, gate_weights)` where `gate_weights` has one
/// row per query example and one column per expert, each row summing to 1.
pub fn combine(
    expert_outputs: &[Array2<f64>],
    gate_scores: &Array2<f64>,
    mode: GateMode,
    temperature: f64,
) -> (Array2<f64>, Array2<f64>) {
    let num_experts = expert_outputs.len();
    assert!(num_experts > 0, "at least one expert output required");
    assert_eq!(
        gate_scores.ncols(),
        num_experts,
        "gate emits one score per expert"
    );
    let (queries, classes) = expert_outputs[0].dim();
    for out in expert_outputs {
        assert_eq!(out.dim(), (queries, classes), "expert output shape mismatch");
    }
    assert_eq!(gate_scores.nrows(), queries, "gate score batch mismatch");

    let logits = match mode {
        GateMode::Learned => gate_scores.mapv(|s| s / (temperature + 1.0)),
        GateMode::Uniform => Array2::zeros((queries, num_experts)),
        GateMode::OneHot => {
            let mut forced = Array2::from_elem((queries, num_experts), ONEHOT_LOW);
            forced.column_mut(0).fill(ONEHOT_HIGH);
            forced
        }
    };
    let gate_weights = softmax_rows(&logits);

    let mut mixed = Array2::zeros((queries, classes));
    for (e, out) in expert_outputs.iter().enumerate() {
        for q in 0..queries {
            let w = gate_weights[[q, e]];
            mixed.row_mut(q).scaled_add(w, &out.row(q));
        }
    }

    (mixed, gate_weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};
    use ndarray_rand::rand_distr::Uniform as RandUniform;
    use ndarray_rand::RandomExt;

    fn random_outputs(n: usize, q: usize, c: usize) -> Vec<Array2<f64>> {
        (0..n)
            .map(|_| Array::random((q, c), RandUniform::new(-2.0, 2.0)))
            .collect()
    }

    #[test]
    fn test_uniform_mode_ignores_scores() {
        let outputs = random_outputs(4, 6, 3);
        let scores = Array::random((6, 4), RandUniform::new(-10.0, 10.0));
        let (_, weights) = combine(&outputs, &scores, GateMode::Uniform, 0.7);
        for w in weights.iter() {
            assert!((w - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_onehot_mode_selects_expert_zero() {
        let outputs = random_outputs(3, 5, 2);
        let scores = Array::random((5, 3), RandUniform::new(-10.0, 10.0));
        let (mixed, weights) = combine(&outputs, &scores, GateMode::OneHot, 0.0);
        for q in 0..5 {
            assert!(weights[[q, 0]] > 1.0 - 1e-12);
            assert!(weights[[q, 1]] < 1e-12);
            assert!(weights[[q, 2]] < 1e-12);
        }
        for q in 0..5 {
            for c in 0..2 {
                assert!((mixed[[q, c]] - outputs[0][[q, c]]).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn test_learned_weights_sum_to_one() {
        let outputs = random_outputs(5, 7, 2);
        let scores = Array::random((7, 5), RandUniform::new(-3.0, 3.0));
        let (_, weights) = combine(&outputs, &scores, GateMode::Learned, 0.5);
        for row in weights.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-10);
        }
    }

    #[test]
    fn test_high_temperature_approaches_uniform() {
        let outputs = random_outputs(4, 6, 2);
        let scores = Array::random((6, 4), RandUniform::new(-3.0, 3.0));
        let (_, learned) = combine(&outputs, &scores, GateMode::Learned, 1e9);
        let (_, uniform) = combine(&outputs, &scores, GateMode::Uniform, 0.0);
        for (a, b) in learned.iter().zip(uniform.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_expert_mixture_is_identity() {
        let outputs = random_outputs(1, 4, 3);
        let scores = array![[0.3], [0.1], [-2.0], [5.0]];
        let (mixed, weights) = combine(&outputs, &scores, GateMode::Uniform, 0.0);
        assert_eq!(mixed, outputs[0]);
        for w in weights.iter() {
            assert!((w - 1.0).abs() < 1e-12);
        }
    }
}
