//! RMSProp Optimizer
//!
//! The training update for every parameter in the network. RMSProp keeps an
//! exponential moving average of squared gradients per parameter and divides
//! each update by its root, so parameters with noisy gradients take smaller
//! steps. That adaptivity is what the pipeline needs: freshly generated
//! batches occasionally lean toward one class, and a plain SGD step would let
//! such a batch yank the classifier around.
//!
//! ## Algorithm
//!
//! For each parameter `p` with gradient `g`:
//!
//! ```text
//! lr_t = lr / (1 + decay * t)          # step-decayed learning rate
//! a    = rho * a + (1 - rho) * g^2     # squared-gradient average
//! s    = g / (sqrt(a) + eps)           # scaled step
//! m    = momentum * m + s              # momentum buffer
//! p    = p - lr_t * m
//! ```
//!
//! With `momentum = 0` the buffer degenerates to `s` and the update is the
//! classic RMSProp step.
//!
//! ## State Layout
//!
//! The optimizer state mirrors [`ShapeNetGradients`] one-for-one: a
//! squared-gradient accumulator and a momentum buffer for every convolution
//! block and both dense layers. Construction from a model guarantees each
//! parameter has matching state.
//!
//! ## Performance
//!
//! Updates on tensors above a size threshold run element-parallel via Rayon;
//! small tensors (biases) update sequentially to skip the scheduling
//! overhead.

use crate::model::{ShapeNet, ShapeNetGradients};
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Accumulator pair for one layer's weight and bias tensors.
pub struct ParamState {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl ParamState {
    fn zeros_like(weight: &Tensor, bias: &Tensor) -> Self {
        Self {
            weight: Tensor::zeros(weight.shape.clone()),
            bias: Tensor::zeros(bias.shape.clone()),
        }
    }
}

/// RMSProp state for every parameter of a [`ShapeNet`].
pub struct RmsPropOptimizer {
    // Squared-gradient running averages, mirroring ShapeNetGradients
    pub acc_blocks: Vec<ParamState>,
    pub acc_dense1: ParamState,
    pub acc_dense2: ParamState,

    // Momentum buffers, same layout
    pub mom_blocks: Vec<ParamState>,
    pub mom_dense1: ParamState,
    pub mom_dense2: ParamState,

    // Hyperparameters
    pub rho: f32,
    pub momentum: f32,
    pub epsilon: f32,
    /// Update count, drives the learning-rate decay
    pub step: usize,
}

impl RmsPropOptimizer {
    /// Create zeroed optimizer state matching the model's parameters.
    ///
    /// Defaults: `rho = 0.9`, `momentum = 0.9`, `epsilon = 1e-6`.
    pub fn new(model: &ShapeNet) -> Self {
        let acc_blocks = model
            .blocks
            .iter()
            .map(|b| ParamState::zeros_like(&b.conv.weight, &b.conv.bias))
            .collect();
        let mom_blocks = model
            .blocks
            .iter()
            .map(|b| ParamState::zeros_like(&b.conv.weight, &b.conv.bias))
            .collect();

        Self {
            acc_blocks,
            acc_dense1: ParamState::zeros_like(&model.dense1.weight, &model.dense1.bias),
            acc_dense2: ParamState::zeros_like(&model.dense2.weight, &model.dense2.bias),
            mom_blocks,
            mom_dense1: ParamState::zeros_like(&model.dense1.weight, &model.dense1.bias),
            mom_dense2: ParamState::zeros_like(&model.dense2.weight, &model.dense2.bias),
            rho: 0.9,
            momentum: 0.9,
            epsilon: 1e-6,
            step: 0,
        }
    }
}

/// One RMSProp update of a single parameter tensor.
fn update_param(
    param: &mut Tensor,
    grad: &Tensor,
    acc: &mut Tensor,
    buf: &mut Tensor,
    lr: f32,
    rho: f32,
    momentum: f32,
    epsilon: f32,
) {
    assert_eq!(param.shape, grad.shape, "gradient shape mismatch");

    let kernel = |((p, &g), (a, m)): ((&mut f32, &f32), (&mut f32, &mut f32))| {
        *a = rho * *a + (1.0 - rho) * g * g;
        let scaled = g / (a.sqrt() + epsilon);
        *m = momentum * *m + scaled;
        *p -= lr * *m;
    };

    // Element-parallel for large tensors, sequential for biases
    if param.len() > 1_000 {
        param
            .data
            .par_iter_mut()
            .zip(grad.data.par_iter())
            .zip(acc.data.par_iter_mut().zip(buf.data.par_iter_mut()))
            .for_each(kernel);
    } else {
        param
            .data
            .iter_mut()
            .zip(grad.data.iter())
            .zip(acc.data.iter_mut().zip(buf.data.iter_mut()))
            .for_each(kernel);
    }
}

/// Apply one RMSProp update to every parameter of the model.
///
/// `lr` is the base learning rate; the effective rate decays per update as
/// `lr / (1 + lr_decay * step)` and is returned so callers can log it.
pub fn rmsprop_update(
    model: &mut ShapeNet,
    grads: &ShapeNetGradients,
    optimizer: &mut RmsPropOptimizer,
    lr: f32,
    lr_decay: f32,
) -> f32 {
    let effective_lr = lr / (1.0 + lr_decay * optimizer.step as f32);
    optimizer.step += 1;

    let rho = optimizer.rho;
    let momentum = optimizer.momentum;
    let epsilon = optimizer.epsilon;

    for (((block, block_grads), acc), buf) in model
        .blocks
        .iter_mut()
        .zip(&grads.block_grads)
        .zip(optimizer.acc_blocks.iter_mut())
        .zip(optimizer.mom_blocks.iter_mut())
    {
        update_param(
            &mut block.conv.weight,
            &block_grads.weight,
            &mut acc.weight,
            &mut buf.weight,
            effective_lr,
            rho,
            momentum,
            epsilon,
        );
        update_param(
            &mut block.conv.bias,
            &block_grads.bias,
            &mut acc.bias,
            &mut buf.bias,
            effective_lr,
            rho,
            momentum,
            epsilon,
        );
    }

    update_param(
        &mut model.dense1.weight,
        &grads.dense1.weight,
        &mut optimizer.acc_dense1.weight,
        &mut optimizer.mom_dense1.weight,
        effective_lr,
        rho,
        momentum,
        epsilon,
    );
    update_param(
        &mut model.dense1.bias,
        &grads.dense1.bias,
        &mut optimizer.acc_dense1.bias,
        &mut optimizer.mom_dense1.bias,
        effective_lr,
        rho,
        momentum,
        epsilon,
    );
    update_param(
        &mut model.dense2.weight,
        &grads.dense2.weight,
        &mut optimizer.acc_dense2.weight,
        &mut optimizer.mom_dense2.weight,
        effective_lr,
        rho,
        momentum,
        epsilon,
    );
    update_param(
        &mut model.dense2.bias,
        &grads.dense2.bias,
        &mut optimizer.acc_dense2.bias,
        &mut optimizer.mom_dense2.bias,
        effective_lr,
        rho,
        momentum,
        epsilon,
    );

    effective_lr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::to_categorical;
    use crate::model::NetworkConfig;

    #[test]
    fn scalar_update_matches_hand_computation() {
        let mut p = Tensor::new(vec![1.0], vec![1]);
        let g = Tensor::new(vec![1.0], vec![1]);
        let mut acc = Tensor::zeros(vec![1]);
        let mut buf = Tensor::zeros(vec![1]);

        update_param(&mut p, &g, &mut acc, &mut buf, 0.1, 0.9, 0.0, 0.0);

        // a = 0.1 * 1, step = 1 / sqrt(0.1), p = 1 - 0.1 * step
        let expected = 1.0 - 0.1 / 0.1f32.sqrt();
        assert!((p.data[0] - expected).abs() < 1e-5);
        assert!((acc.data[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let mut p = Tensor::new(vec![0.0], vec![1]);
        let g = Tensor::new(vec![1.0], vec![1]);
        let mut acc = Tensor::zeros(vec![1]);
        let mut buf = Tensor::zeros(vec![1]);

        update_param(&mut p, &g, &mut acc, &mut buf, 0.1, 0.9, 0.9, 0.0);
        let first_buf = buf.data[0];
        update_param(&mut p, &g, &mut acc, &mut buf, 0.1, 0.9, 0.9, 0.0);

        // Second buffer folds the first one in.
        assert!(buf.data[0] > first_buf);
    }

    #[test]
    fn learning_rate_decays_per_step() {
        let config = NetworkConfig::tiny();
        let mut model = ShapeNet::new(&config);
        model.set_training(false);
        let mut optimizer = RmsPropOptimizer::new(&model);

        let x = Tensor::zeros(vec![1, 1, 8, 8, 8]);
        let targets = to_categorical(&[0], 2);
        let (logits, cache) = model.forward(&x);
        let grads = model.backward(&logits, &targets, &cache);

        let lr0 = rmsprop_update(&mut model, &grads, &mut optimizer, 0.01, 0.5);
        let lr1 = rmsprop_update(&mut model, &grads, &mut optimizer, 0.01, 0.5);
        assert!((lr0 - 0.01).abs() < 1e-8);
        assert!((lr1 - 0.01 / 1.5).abs() < 1e-8);
    }

    #[test]
    fn repeated_updates_reduce_loss_on_fixed_batch() {
        let config = NetworkConfig::tiny();
        let mut model = ShapeNet::new(&config);
        model.set_training(false);
        let mut optimizer = RmsPropOptimizer::new(&model);

        let x = Tensor::new(
            (0..2 * 512).map(|i| ((i * 31 % 97) as f32) / 97.0).collect(),
            vec![2, 1, 8, 8, 8],
        );
        let targets = to_categorical(&[0, 1], 2);

        let (logits, _) = model.forward(&x);
        let initial = model.compute_loss(&logits, &targets);

        for _ in 0..20 {
            let (logits, cache) = model.forward(&x);
            let grads = model.backward(&logits, &targets, &cache);
            rmsprop_update(&mut model, &grads, &mut optimizer, 0.005, 0.0);
        }

        let (logits, _) = model.forward(&x);
        let trained = model.compute_loss(&logits, &targets);
        assert!(
            trained < initial,
            "loss did not improve: {} -> {}",
            initial,
            trained
        );
    }
}
