//! Convolution Block
//!
//! The repeating unit of the feature extractor:
//!
//! ```text
//! x -> Conv3D -> ReLU -> MaxPool3D [-> Dropout] -> out
//! ```
//!
//! Dropout only appears where the architecture asks for it (after the first
//! block in the default network), so it is optional here. The block owns no
//! logic of its own; it wires the sublayers together and threads a composite
//! cache through so the backward pass can retrace the exact forward path.

use crate::layers::activation::{relu_backward, relu_forward};
use crate::layers::conv3::{Conv3Cache, TrainableConv3};
use crate::layers::dropout::{DropoutCache, TrainableDropout};
use crate::layers::pool3::{MaxPool3, Pool3Cache};
use crate::tensor::Tensor;

/// One conv -> ReLU -> pool unit, optionally followed by dropout.
pub struct ConvBlock {
    pub conv: TrainableConv3,
    pub pool: MaxPool3,
    pub dropout: Option<TrainableDropout>,
}

impl ConvBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        pool: usize,
        dropout_rate: Option<f32>,
        seed: u64,
    ) -> Self {
        Self {
            conv: TrainableConv3::new(in_channels, out_channels, kernel, seed),
            pool: MaxPool3::new(pool),
            dropout: dropout_rate.map(TrainableDropout::new),
        }
    }

    /// Forward through conv, ReLU, pooling, and dropout when present.
    pub fn forward(&self, x: &Tensor) -> (Tensor, BlockCache) {
        let (pre_activation, conv_cache) = self.conv.forward(x);
        let activated = relu_forward(&pre_activation);
        let (pooled, pool_cache) = self.pool.forward(&activated);

        let (out, dropout_cache) = match &self.dropout {
            Some(dropout) => {
                let (dropped, cache) = dropout.forward(&pooled);
                (dropped, Some(cache))
            }
            None => (pooled, None),
        };

        let cache = BlockCache {
            conv: conv_cache,
            pre_activation,
            pool: pool_cache,
            dropout: dropout_cache,
        };
        (out, cache)
    }

    /// Backward in reverse order of the forward pass.
    pub fn backward(&self, grad_out: &Tensor, cache: &BlockCache) -> BlockGradients {
        let grad = match (&self.dropout, &cache.dropout) {
            (Some(dropout), Some(dropout_cache)) => dropout.backward(grad_out, dropout_cache),
            _ => grad_out.clone(),
        };

        let grad = self.pool.backward(&grad, &cache.pool);
        let grad = relu_backward(&grad, &cache.pre_activation);
        let conv_grads = self.conv.backward(&grad, &cache.conv);

        BlockGradients {
            weight: conv_grads.weight,
            bias: conv_grads.bias,
            x: conv_grads.x,
        }
    }
}

/// Cache for the block backward pass.
pub struct BlockCache {
    conv: Conv3Cache,
    /// Convolution output before ReLU, needed for the ReLU derivative.
    pre_activation: Tensor,
    pool: Pool3Cache,
    dropout: Option<DropoutCache>,
}

/// Gradients of a block's trainable parameters (the convolution's).
pub struct BlockGradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient handed to the previous layer.
    pub x: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_shapes_round_trip() {
        let mut block = ConvBlock::new(1, 4, 3, 2, Some(0.5), 17);
        if let Some(d) = block.dropout.as_mut() {
            d.training = false;
        }

        let x = Tensor::zeros(vec![2, 1, 8, 8, 8]);
        let (y, cache) = block.forward(&x);
        // 8 -> conv3 -> 6 -> pool2 -> 3
        assert_eq!(y.shape, vec![2, 4, 3, 3, 3]);

        let grad = Tensor::new(vec![1.0; y.len()], y.shape.clone());
        let grads = block.backward(&grad, &cache);
        assert_eq!(grads.weight.shape, block.conv.weight.shape);
        assert_eq!(grads.bias.shape, block.conv.bias.shape);
        assert_eq!(grads.x.shape, x.shape);
    }

    #[test]
    fn relu_blocks_gradient_for_negative_preactivations() {
        // With weights forced negative and positive input, every
        // pre-activation is negative, so nothing reaches the conv weights.
        let mut block = ConvBlock::new(1, 1, 2, 1, None, 0);
        block.conv.weight = Tensor::new(vec![-1.0; 8], vec![1, 1, 2, 2, 2]);
        block.conv.bias = Tensor::new(vec![0.0], vec![1]);

        let x = Tensor::new(vec![1.0; 27], vec![1, 1, 3, 3, 3]);
        let (y, cache) = block.forward(&x);
        assert!(y.data.iter().all(|&v| v == 0.0));

        let grad = Tensor::new(vec![1.0; y.len()], y.shape.clone());
        let grads = block.backward(&grad, &cache);
        assert!(grads.weight.data.iter().all(|&g| g == 0.0));
        assert!(grads.x.data.iter().all(|&g| g == 0.0));
    }
}
