//! Fully-connected forward network.
//!
//! ReLU hidden layers and a linear head. Weight names follow the
//! `w1/b1 ... w{L+1}/b{L+1}` convention so sets stay readable when
//! checkpointed.

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::weights::{Tensor, WeightSet};

use super::ForwardModel;

/// Fully-connected stack with configurable hidden sizes.
///
/// An empty `hidden_dims` gives a plain linear model, which is convenient
/// for convex sanity checks.
#[derive(Debug, Clone)]
pub struct FcModel {
    input_dim: usize,
    hidden_dims: Vec<usize>,
}

impl FcModel {
    pub fn new(input_dim: usize, hidden_dims: Vec<usize>) -> Self {
        Self {
            input_dim,
            hidden_dims,
        }
    }

    fn num_layers(&self) -> usize {
        self.hidden_dims.len() + 1
    }

    /// Fan-in/fan-out pairs for every layer given a head width
    fn layer_dims(&self, head_dim: usize) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.num_layers());
        let mut prev = self.input_dim;
        for &h in &self.hidden_dims {
            dims.push((prev, h));
            prev = h;
        }
        dims.push((prev, head_dim));
        dims
    }
}

fn relu(x: f64) -> f64 {
    x.max(0.0)
}

fn relu_prime(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else {
        0.0
    }
}

impl ForwardModel for FcModel {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn init_weights(&self, head_dim: usize) -> WeightSet {
        let mut weights = WeightSet::new();
        for (i, (fan_in, fan_out)) in self.layer_dims(head_dim).into_iter().enumerate() {
            // Xavier/Glorot initialization
            let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
            weights.insert(
                format!("w{}", i + 1),
                Tensor::Matrix(Array2::random((fan_in, fan_out), Uniform::new(-limit, limit))),
            );
            weights.insert(format!("b{}", i + 1), Tensor::Vector(Array1::zeros(fan_out)));
        }
        weights
    }

    fn forward(&self, weights: &WeightSet, inputs: &Array2<f64>) -> Array2<f64> {
        assert_eq!(inputs.ncols(), self.input_dim, "input width mismatch");

        let mut hidden = inputs.clone();
        for i in 1..=self.num_layers() {
            let mut z = hidden.dot(weights.matrix(&format!("w{i}")));
            let bias = weights.vector(&format!("b{i}"));
            for mut row in z.rows_mut() {
                row += bias;
            }
            hidden = if i < self.num_layers() {
                z.mapv(relu)
            } else {
                z
            };
        }
        hidden
    }

    fn backward(
        &self,
        weights: &WeightSet,
        inputs: &Array2<f64>,
        upstream: &Array2<f64>,
    ) -> WeightSet {
        assert_eq!(inputs.ncols(), self.input_dim, "input width mismatch");
        let layers = self.num_layers();

        // Recompute pre-activations and activations
        let mut activations = vec![inputs.clone()];
        let mut pre_activations = Vec::with_capacity(layers);
        for i in 1..=layers {
            let mut z = activations[i - 1].dot(weights.matrix(&format!("w{i}")));
            let bias = weights.vector(&format!("b{i}"));
            for mut row in z.rows_mut() {
                row += bias;
            }
            if i < layers {
                activations.push(z.mapv(relu));
            }
            pre_activations.push(z);
        }

        // Walk the stack backwards; the head is linear so its delta is the
        // upstream gradient itself.
        let mut weight_grads: Vec<(Array2<f64>, Array1<f64>)> = Vec::with_capacity(layers);
        let mut delta = upstream.clone();
        for i in (1..=layers).rev() {
            if i < layers {
                let z = &pre_activations[i - 1];
                delta = &delta * &z.mapv(relu_prime);
            }
            let grad_w = activations[i - 1].t().dot(&delta);
            let grad_b = delta.sum_axis(Axis(0));
            if i > 1 {
                delta = delta.dot(&weights.matrix(&format!("w{i}")).t());
            }
            weight_grads.push((grad_w, grad_b));
        }
        weight_grads.reverse();

        let mut grads = WeightSet::new();
        for (i, (grad_w, grad_b)) in weight_grads.into_iter().enumerate() {
            grads.insert(format!("w{}", i + 1), Tensor::Matrix(grad_w));
            grads.insert(format!("b{}", i + 1), Tensor::Vector(grad_b));
        }
        grads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_init_shapes() {
        let model = FcModel::new(4, vec![8, 6]);
        let weights = model.init_weights(3);
        assert_eq!(weights.matrix("w1").dim(), (4, 8));
        assert_eq!(weights.matrix("w2").dim(), (8, 6));
        assert_eq!(weights.matrix("w3").dim(), (6, 3));
        assert_eq!(weights.vector("b3").len(), 3);
    }

    #[test]
    fn test_forward_shape() {
        let model = FcModel::new(4, vec![8]);
        let weights = model.init_weights(2);
        let inputs = Array2::ones((5, 4));
        let out = model.forward(&weights, &inputs);
        assert_eq!(out.dim(), (5, 2));
    }

    #[test]
    fn test_linear_model_forward() {
        // No hidden layers: output = x . w + b exactly
        let model = FcModel::new(2, vec![]);
        let mut weights = WeightSet::new();
        weights.insert("w1", Tensor::Matrix(array![[1.0], [2.0]]));
        weights.insert("b1", Tensor::Vector(array![0.5]));
        let out = model.forward(&weights, &array![[1.0, 1.0], [2.0, 0.0]]);
        assert_eq!(out, array![[3.5], [2.5]]);
    }

    #[test]
    fn test_backward_matches_finite_differences() {
        let model = FcModel::new(3, vec![5]);
        let weights = model.init_weights(2);
        let inputs = array![[0.3, -0.7, 1.1], [0.9, 0.2, -0.4]];
        let targets = array![[1.0, 0.0], [0.0, 1.0]];

        // Squared-error loss: upstream gradient is 2 (pred - target) / len
        let pred = model.forward(&weights, &inputs);
        let n = pred.len() as f64;
        let upstream = (&pred - &targets).mapv(|d| 2.0 * d / n);
        let grads = model.backward(&weights, &inputs, &upstream);

        let eps = 1e-6;
        for name in ["w1", "b1", "w2", "b2"] {
            let tensor = weights.get(name).unwrap();
            for idx in 0..tensor.len() {
                let mut plus = weights.clone();
                plus.get_mut(name).unwrap().set(idx, tensor.get(idx) + eps);
                let mut minus = weights.clone();
                minus.get_mut(name).unwrap().set(idx, tensor.get(idx) - eps);

                let loss = |w: &WeightSet| {
                    let p = model.forward(w, &inputs);
                    (&p - &targets).mapv(|d| d * d).sum() / n
                };
                let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
                let analytic = grads.get(name).unwrap().get(idx);
                assert!(
                    (numeric - analytic).abs() < 1e-5,
                    "{name}[{idx}]: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }
}
