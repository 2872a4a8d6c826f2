//! 1-D convolutional forward network.
//!
//! Four valid (unpadded) convolution blocks with ReLU, global average
//! pooling over the time axis, and a linear head. Inputs arrive as flat
//! rows of `channels * window` values, one window per example.

use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;

use crate::config::MetaConfig;
use crate::weights::{Tensor, WeightSet};

use super::ForwardModel;

/// Convolutional stack over (channels x window) inputs
#[derive(Debug, Clone)]
pub struct ConvModel {
    channels: usize,
    window: usize,
    filters: usize,
    kernel: usize,
}

impl ConvModel {
    pub fn new(channels: usize, window: usize, filters: usize, kernel: usize) -> Self {
        assert!(kernel >= 1, "kernel must be at least 1");
        assert!(
            window > MetaConfig::CONV_BLOCKS * (kernel - 1),
            "window too small for the convolution stack"
        );
        Self {
            channels,
            window,
            filters,
            kernel,
        }
    }

    /// Input channel count of a given block (1-based)
    fn block_in_channels(&self, block: usize) -> usize {
        if block == 1 {
            self.channels
        } else {
            self.filters
        }
    }

    /// Reshape one flat input row into (channels, window)
    fn to_channels(&self, row: ndarray::ArrayView1<f64>) -> Array2<f64> {
        Array2::from_shape_fn((self.channels, self.window), |(c, t)| {
            row[c * self.window + t]
        })
    }
}

/// Pre-activation of a valid 1-D convolution.
///
/// `kernels` has one row per output filter, laid out as (in_channel, tap)
/// pairs flattened to `in_channels * kernel` columns.
fn conv_pre_activation(
    kernels: &Array2<f64>,
    bias: &Array1<f64>,
    input: &Array2<f64>,
    kernel: usize,
) -> Array2<f64> {
    let (in_channels, t_in) = input.dim();
    let t_out = t_in - kernel + 1;
    let filters = kernels.nrows();

    let mut z = Array2::zeros((filters, t_out));
    for o in 0..filters {
        for t in 0..t_out {
            let mut sum = bias[o];
            for c in 0..in_channels {
                for j in 0..kernel {
                    sum += kernels[[o, c * kernel + j]] * input[[c, t + j]];
                }
            }
            z[[o, t]] = sum;
        }
    }
    z
}

impl ForwardModel for ConvModel {
    fn input_dim(&self) -> usize {
        self.channels * self.window
    }

    fn init_weights(&self, head_dim: usize) -> WeightSet {
        let mut weights = WeightSet::new();
        for block in 1..=MetaConfig::CONV_BLOCKS {
            let in_channels = self.block_in_channels(block);
            let limit = (2.0 / (in_channels * self.kernel) as f64).sqrt();
            weights.insert(
                format!("conv{block}"),
                Tensor::Matrix(Array2::random(
                    (self.filters, in_channels * self.kernel),
                    Uniform::new(-limit, limit),
                )),
            );
            weights.insert(format!("b{block}"), Tensor::Vector(Array1::zeros(self.filters)));
        }
        let limit = (6.0 / (self.filters + head_dim) as f64).sqrt();
        weights.insert(
            "w5",
            Tensor::Matrix(Array2::random(
                (self.filters, head_dim),
                Uniform::new(-limit, limit),
            )),
        );
        weights.insert("b5", Tensor::Vector(Array1::zeros(head_dim)));
        weights
    }

    fn forward(&self, weights: &WeightSet, inputs: &Array2<f64>) -> Array2<f64> {
        assert_eq!(inputs.ncols(), self.input_dim(), "input width mismatch");
        let head = weights.matrix("w5");
        let head_bias = weights.vector("b5");
        let head_dim = head.ncols();

        let mut outputs = Array2::zeros((inputs.nrows(), head_dim));
        for (b, row) in inputs.rows().into_iter().enumerate() {
            let mut x = self.to_channels(row);
            for block in 1..=MetaConfig::CONV_BLOCKS {
                let z = conv_pre_activation(
                    weights.matrix(&format!("conv{block}")),
                    weights.vector(&format!("b{block}")),
                    &x,
                    self.kernel,
                );
                x = z.mapv(|v| v.max(0.0));
            }
            let time = x.ncols() as f64;
            let pooled = x.sum_axis(Axis(1)) / time;
            let logits = pooled.dot(head) + head_bias;
            outputs.row_mut(b).assign(&logits);
        }
        outputs
    }

    fn backward(
        &self,
        weights: &WeightSet,
        inputs: &Array2<f64>,
        upstream: &Array2<f64>,
    ) -> WeightSet {
        assert_eq!(inputs.ncols(), self.input_dim(), "input width mismatch");
        assert_eq!(inputs.nrows(), upstream.nrows(), "upstream batch mismatch");
        let head = weights.matrix("w5");
        let kernel = self.kernel;

        let mut conv_grads: Vec<Array2<f64>> = (1..=MetaConfig::CONV_BLOCKS)
            .map(|block| Array2::zeros(weights.matrix(&format!("conv{block}")).dim()))
            .collect();
        let mut bias_grads: Vec<Array1<f64>> = (0..MetaConfig::CONV_BLOCKS)
            .map(|_| Array1::zeros(self.filters))
            .collect();
        let mut head_grad = Array2::zeros(head.dim());
        let mut head_bias_grad = Array1::zeros(head.ncols());

        for (b, row) in inputs.rows().into_iter().enumerate() {
            // Recompute per-block inputs and pre-activations
            let mut block_inputs = vec![self.to_channels(row)];
            let mut pre_activations = Vec::with_capacity(MetaConfig::CONV_BLOCKS);
            for block in 1..=MetaConfig::CONV_BLOCKS {
                let z = conv_pre_activation(
                    weights.matrix(&format!("conv{block}")),
                    weights.vector(&format!("b{block}")),
                    &block_inputs[block - 1],
                    kernel,
                );
                block_inputs.push(z.mapv(|v| v.max(0.0)));
                pre_activations.push(z);
            }
            let last = &block_inputs[MetaConfig::CONV_BLOCKS];
            let time = last.ncols();
            let pooled = last.sum_axis(Axis(1)) / time as f64;

            let u = upstream.row(b);
            for i in 0..pooled.len() {
                for j in 0..u.len() {
                    head_grad[[i, j]] += pooled[i] * u[j];
                }
            }
            head_bias_grad += &u;

            // Mean pooling spreads the gradient evenly over time
            let pooled_grad = head.dot(&u);
            let mut dy = Array2::zeros((self.filters, time));
            for o in 0..self.filters {
                for t in 0..time {
                    dy[[o, t]] = pooled_grad[o] / time as f64;
                }
            }

            for block in (1..=MetaConfig::CONV_BLOCKS).rev() {
                let z = &pre_activations[block - 1];
                let x = &block_inputs[block - 1];
                let kernels = weights.matrix(&format!("conv{block}"));
                let (in_channels, t_in) = x.dim();
                let t_out = z.ncols();

                let dz = &dy * &z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
                let mut dx = Array2::zeros((in_channels, t_in));
                for o in 0..self.filters {
                    for t in 0..t_out {
                        let g = dz[[o, t]];
                        if g == 0.0 {
                            continue;
                        }
                        bias_grads[block - 1][o] += g;
                        for c in 0..in_channels {
                            for j in 0..kernel {
                                conv_grads[block - 1][[o, c * kernel + j]] += g * x[[c, t + j]];
                                dx[[c, t + j]] += g * kernels[[o, c * kernel + j]];
                            }
                        }
                    }
                }
                if block > 1 {
                    dy = dx;
                }
            }
        }

        let mut grads = WeightSet::new();
        for (block, (conv_grad, bias_grad)) in conv_grads
            .into_iter()
            .zip(bias_grads.into_iter())
            .enumerate()
        {
            grads.insert(format!("conv{}", block + 1), Tensor::Matrix(conv_grad));
            grads.insert(format!("b{}", block + 1), Tensor::Vector(bias_grad));
        }
        grads.insert("w5", Tensor::Matrix(head_grad));
        grads.insert("b5", Tensor::Vector(head_bias_grad));
        grads
    }
}
