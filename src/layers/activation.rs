//! Activation Functions
//!
//! The convolution stages and the hidden dense layer use ReLU:
//!
//! ```text
//! ReLU(x) = max(0, x)
//! ```
//!
//! Its derivative is 1 where the input was positive and 0 elsewhere, so the
//! backward pass just masks the incoming gradient with the cached
//! pre-activation values. The final softmax is not implemented here; it is
//! fused with the cross-entropy loss in the model, which gives the simple
//! `probabilities - targets` gradient.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// ReLU activation (forward pass), applied element-wise.
pub fn relu_forward(x: &Tensor) -> Tensor {
    let result = x.data.par_iter().map(|&v| v.max(0.0)).collect();
    Tensor::new(result, x.shape.clone())
}

/// ReLU derivative (backward pass).
///
/// `x` is the original input to the activation, cached during the forward
/// pass. The gradient passes through wherever `x > 0` and is zeroed
/// elsewhere.
pub fn relu_backward(grad_out: &Tensor, x: &Tensor) -> Tensor {
    assert_eq!(
        grad_out.shape, x.shape,
        "gradient and activation input shapes differ"
    );
    let result = grad_out
        .data
        .par_iter()
        .zip(&x.data)
        .map(|(&g, &v)| if v > 0.0 { g } else { 0.0 })
        .collect();
    Tensor::new(result, x.shape.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_masks_negatives() {
        let x = Tensor::new(vec![-1.0, 0.0, 2.5, -0.1], vec![2, 2]);
        let y = relu_forward(&x);
        assert_eq!(y.data, vec![0.0, 0.0, 2.5, 0.0]);
    }

    #[test]
    fn relu_gradient_follows_input_sign() {
        let x = Tensor::new(vec![-1.0, 0.5, 0.0, 3.0], vec![4]);
        let grad = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![4]);
        let gx = relu_backward(&grad, &x);
        assert_eq!(gx.data, vec![0.0, 2.0, 0.0, 4.0]);
    }
}
