//! Dense Layer (Fully Connected)
//!
//! The classifier head of the network is built from dense layers computing
//! the affine transformation `y = x @ W + b`.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [batch, in_features]
//! Weight: W [in_features, out_features]
//! Bias:   b [out_features]
//! Output: y = x @ W + b [batch, out_features]
//! ```
//!
//! ## Backward Pass
//!
//! Applying the chain rule:
//!
//! ```text
//! grad_W = x^T @ grad_y
//! grad_b = sum(grad_y, axis=0)
//! grad_x = grad_y @ W^T
//! ```
//!
//! The input is cached during the forward pass because `grad_W` needs it.
//! Weights use He initialization (`std = sqrt(2 / in_features)`), the right
//! scale for layers feeding ReLU.

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Draw `size` values from a seeded normal distribution `N(0, std)`.
///
/// Every layer gets its own fixed seed, which makes model assembly
/// reproducible without threading an RNG through the constructors.
pub fn normal_init(size: usize, seed: u64, std: f32) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let dist = Normal::new(0.0, std).expect("valid init distribution");
    (0..size).map(|_| dist.sample(&mut rng)).collect()
}

/// Fully connected layer.
pub struct TrainableDense {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl TrainableDense {
    /// Create a dense layer with He-initialized weights and zero bias.
    pub fn new(in_features: usize, out_features: usize, seed: u64) -> Self {
        assert!(in_features > 0 && out_features > 0);
        let std = (2.0 / in_features as f32).sqrt();
        Self {
            weight: Tensor::new(
                normal_init(in_features * out_features, seed, std),
                vec![in_features, out_features],
            ),
            bias: Tensor::new(vec![0.0; out_features], vec![out_features]),
        }
    }

    /// Compute `y = x @ W + b` and cache `x` for the backward pass.
    pub fn forward(&self, x: &Tensor) -> (Tensor, DenseCache) {
        let y = x.matmul(&self.weight).add(&self.bias);
        (y, DenseCache { x: x.clone() })
    }

    /// Gradients for the weights, bias, and input.
    pub fn backward(&self, grad_out: &Tensor, cache: &DenseCache) -> DenseGradients {
        let grad_weight = cache.x.transpose().matmul(grad_out);

        let out_features = self.bias.len();
        let grad_bias_data: Vec<f32> = (0..out_features)
            .map(|j| {
                let mut sum = 0.0;
                for row in 0..grad_out.shape[0] {
                    sum += grad_out.data[row * out_features + j];
                }
                sum
            })
            .collect();
        let grad_bias = Tensor::new(grad_bias_data, self.bias.shape.clone());

        let grad_x = grad_out.matmul(&self.weight.transpose());

        DenseGradients {
            weight: grad_weight,
            bias: grad_bias,
            x: grad_x,
        }
    }
}

/// Cache for the dense backward pass.
pub struct DenseCache {
    pub x: Tensor,
}

/// Gradients produced by a dense layer.
pub struct DenseGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient handed to the previous layer.
    pub x: Tensor,
}
