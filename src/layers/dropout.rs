//! Dropout Layer
//!
//! Dropout regularizes training by zeroing a random subset of activations.
//! This implementation is the "inverted" variant: surviving values are scaled
//! by `1 / (1 - rate)` during training so that inference needs no rescaling
//! at all and simply passes values through.
//!
//! The forward pass stores the mask with the scaling already folded in, so
//! both passes reduce to one element-wise multiply.

use crate::tensor::Tensor;
use rand::Rng;

/// Dropout layer with a training/inference switch.
pub struct TrainableDropout {
    /// Probability of dropping an activation.
    pub rate: f32,
    /// When false the layer is an identity function.
    pub training: bool,
}

impl TrainableDropout {
    /// Create a dropout layer.
    ///
    /// # Panics
    ///
    /// Panics unless `0.0 <= rate < 1.0`; dropping everything would starve
    /// the layers downstream.
    pub fn new(rate: f32) -> Self {
        assert!(
            (0.0..1.0).contains(&rate),
            "Dropout rate must lie in [0, 1), got {}",
            rate
        );
        Self {
            rate,
            training: true,
        }
    }

    /// Apply dropout, caching the scaled mask for the backward pass.
    pub fn forward(&self, x: &Tensor) -> (Tensor, DropoutCache) {
        if !self.training || self.rate == 0.0 {
            return (x.clone(), DropoutCache { mask: None });
        }

        let scale = 1.0 / (1.0 - self.rate);
        let mut rng = rand::thread_rng();
        let mask: Vec<f32> = (0..x.len())
            .map(|_| {
                if rng.gen::<f32>() < self.rate {
                    0.0
                } else {
                    scale
                }
            })
            .collect();

        let data = x.data.iter().zip(&mask).map(|(v, m)| v * m).collect();
        let out = Tensor::new(data, x.shape.clone());
        (out, DropoutCache { mask: Some(mask) })
    }

    /// Route the gradient through the same mask the forward pass used.
    pub fn backward(&self, grad_out: &Tensor, cache: &DropoutCache) -> Tensor {
        match &cache.mask {
            Some(mask) => {
                let data = grad_out.data.iter().zip(mask).map(|(g, m)| g * m).collect();
                Tensor::new(data, grad_out.shape.clone())
            }
            None => grad_out.clone(),
        }
    }
}

/// Cache for the dropout backward pass.
pub struct DropoutCache {
    /// Scaled keep mask (`0.0` dropped, `1/(1-rate)` kept), or `None` when
    /// the layer ran as identity.
    pub mask: Option<Vec<f32>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inference_is_identity() {
        let mut layer = TrainableDropout::new(0.5);
        layer.training = false;
        let x = Tensor::new(vec![1.0, -2.0, 3.0], vec![3]);
        let (y, cache) = layer.forward(&x);
        assert_eq!(y.data, x.data);
        assert!(cache.mask.is_none());
    }

    #[test]
    fn training_drops_and_rescales() {
        let layer = TrainableDropout::new(0.5);
        let x = Tensor::new(vec![1.0; 1000], vec![1000]);
        let (y, cache) = layer.forward(&x);
        let mask = cache.mask.expect("training produces a mask");

        for (out, m) in y.data.iter().zip(&mask) {
            // Kept values are scaled by 2.0, dropped ones are exactly zero.
            assert!(*out == 0.0 || (*out - 2.0).abs() < 1e-6);
            assert_eq!(*out, *m);
        }
        // With 1000 elements at rate 0.5, both outcomes occur.
        assert!(mask.iter().any(|&m| m == 0.0));
        assert!(mask.iter().any(|&m| m > 0.0));
    }

    #[test]
    fn backward_reuses_forward_mask() {
        let layer = TrainableDropout::new(0.3);
        let x = Tensor::new(vec![1.0; 64], vec![64]);
        let (_, cache) = layer.forward(&x);
        let grad = Tensor::new(vec![1.0; 64], vec![64]);
        let gx = layer.backward(&grad, &cache);
        let mask = cache.mask.as_ref().unwrap();
        for (g, m) in gx.data.iter().zip(mask) {
            assert_eq!(*g, *m);
        }
    }
}
