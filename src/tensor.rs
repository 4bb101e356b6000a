//! Tensor Operations for Volumetric Networks
//!
//! This module provides the minimal tensor type the rest of the crate builds
//! on. Tensors store a flat `Vec<f32>` together with shape and stride
//! information for row-major multi-dimensional indexing.
//!
//! ## Core Concepts
//!
//! - **Data**: Flat `Vec<f32>` storing all elements in row-major order
//! - **Shape**: Dimensions of the tensor (e.g., `[batch, channels, d, h, w]`)
//! - **Strides**: Step sizes per dimension to compute flat indices
//!
//! A batch of volumes is a 5-D tensor `[n, c, d, h, w]`; the classifier head
//! works on 2-D tensors `[n, features]`. The convolution and pooling layers
//! index `data` directly through the strides, so this module only needs the
//! dense-algebra operations: matrix multiplication, broadcast addition,
//! row-wise softmax and argmax, and reshaping.
//!
//! ## Example
//!
//! ```rust
//! use voxnet::Tensor;
//!
//! let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], vec![2, 3]);
//! let b = Tensor::new(vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0], vec![3, 2]);
//! let c = a.matmul(&b);
//! assert_eq!(c.shape, vec![2, 2]);
//! ```
//!
//! ## Performance
//!
//! Matrix multiplication and the elementwise operations parallelize over rows
//! or elements via Rayon once the work is large enough to amortize the
//! scheduling overhead; small tensors take the sequential path.

use rayon::prelude::*;

/// A multi-dimensional array of `f32` values.
///
/// All operations assume row-major (C-style) memory layout. For shape
/// `[2, 3]` the data is stored as
/// `[r0c0, r0c1, r0c2, r1c0, r1c1, r1c2]` and the strides are `[3, 1]`.
#[derive(Clone, Debug)]
pub struct Tensor {
    /// Flat storage of all tensor elements
    pub data: Vec<f32>,
    /// Shape of the tensor (dimensions)
    pub shape: Vec<usize>,
    /// Strides for each dimension (computed from shape)
    pub strides: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor from data and shape.
    ///
    /// # Panics
    ///
    /// Panics if the product of the shape dimensions doesn't equal the data
    /// length.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Self {
        let expected: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected,
            "Data length ({}) doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected
        );
        let strides = Self::compute_strides(&shape);
        Self {
            data,
            shape,
            strides,
        }
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self::new(vec![0.0; size], shape)
    }

    /// Strides for a row-major layout: for `[d0, d1, d2]` they are
    /// `[d1*d2, d2, 1]`.
    fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the tensor holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 2-D matrix multiplication.
    ///
    /// For `A @ B` where `A` is `[m, k]` and `B` is `[k, n]` the result has
    /// shape `[m, n]` with `C[i,j] = sum over l of A[i,l] * B[l,j]`.
    ///
    /// Large products parallelize over output rows; the loop over `k` sits in
    /// the outer position so that `B` is read row by row, keeping the access
    /// pattern sequential and letting LLVM vectorize the innermost
    /// accumulation.
    ///
    /// # Panics
    ///
    /// Panics if either operand is not 2-D or the inner dimensions differ.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert!(
            self.shape.len() == 2 && other.shape.len() == 2,
            "matmul expects 2-D operands, got {:?} @ {:?}",
            self.shape,
            other.shape
        );
        assert_eq!(
            self.shape[1], other.shape[0],
            "Matrix dimensions incompatible: [{}, {}] @ [{}, {}]",
            self.shape[0], self.shape[1], other.shape[0], other.shape[1]
        );

        let m = self.shape[0];
        let k = self.shape[1];
        let n = other.shape[1];

        let mut result = vec![0.0; m * n];

        // Work threshold balancing parallel overhead against the gain
        if m * n * k >= 1_000 {
            result
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, out_row)| {
                    for l in 0..k {
                        let a_val = self.data[i * k + l];
                        let b_row = &other.data[l * n..(l + 1) * n];
                        for (o, &b_val) in out_row.iter_mut().zip(b_row) {
                            *o += a_val * b_val;
                        }
                    }
                });
        } else {
            for i in 0..m {
                for l in 0..k {
                    let a_val = self.data[i * k + l];
                    for j in 0..n {
                        result[i * n + j] += a_val * other.data[l * n + j];
                    }
                }
            }
        }

        Tensor::new(result, vec![m, n])
    }

    /// Element-wise addition with bias broadcasting.
    ///
    /// Supports two patterns:
    ///
    /// 1. **Exact match**: identical shapes
    /// 2. **Broadcast last dim**: `[*, n] + [n]`, used for bias addition
    ///
    /// # Panics
    ///
    /// Panics on any other shape combination.
    pub fn add(&self, other: &Tensor) -> Tensor {
        if self.shape == other.shape {
            let result = self
                .data
                .par_iter()
                .zip(&other.data)
                .map(|(a, b)| a + b)
                .collect();
            return Tensor::new(result, self.shape.clone());
        }

        if self.shape.len() > other.shape.len() {
            let last_dim = *self.shape.last().unwrap();
            if other.data.len() == last_dim {
                let result: Vec<f32> = (0..self.data.len())
                    .into_par_iter()
                    .map(|i| self.data[i] + other.data[i % last_dim])
                    .collect();
                return Tensor::new(result, self.shape.clone());
            }
        }

        panic!(
            "Unsupported broadcast for add: {:?} + {:?}",
            self.shape, other.shape
        );
    }

    /// Multiply all elements by a scalar.
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let result = self.data.par_iter().map(|&x| x * scalar).collect();
        Tensor::new(result, self.shape.clone())
    }

    /// Reshape without changing the element count.
    ///
    /// # Panics
    ///
    /// Panics if the new shape holds a different number of elements.
    pub fn reshape(&self, new_shape: &[usize]) -> Tensor {
        let new_size: usize = new_shape.iter().product();
        assert_eq!(
            self.data.len(),
            new_size,
            "Cannot reshape {:?} into {:?}: element count mismatch",
            self.shape,
            new_shape
        );
        Tensor::new(self.data.clone(), new_shape.to_vec())
    }

    /// Transpose of a 2-D matrix.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2-D.
    pub fn transpose(&self) -> Tensor {
        assert_eq!(
            self.shape.len(),
            2,
            "transpose expects a 2-D tensor, got {:?}",
            self.shape
        );
        let rows = self.shape[0];
        let cols = self.shape[1];
        let mut result = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                result[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::new(result, vec![cols, rows])
    }

    /// Row-wise softmax of a 2-D tensor.
    ///
    /// Uses the numerically stable form `exp(x - max(x)) / sum(...)` so large
    /// logits cannot overflow `exp`.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2-D.
    pub fn softmax_rows(&self) -> Tensor {
        assert_eq!(
            self.shape.len(),
            2,
            "softmax_rows expects a 2-D tensor, got {:?}",
            self.shape
        );
        let rows = self.shape[0];
        let cols = self.shape[1];

        let result: Vec<f32> = (0..rows)
            .into_par_iter()
            .flat_map_iter(|i| {
                let row = &self.data[i * cols..(i + 1) * cols];
                let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                let exp_values: Vec<f32> = row.iter().map(|&x| (x - max).exp()).collect();
                let sum: f32 = exp_values.iter().sum();
                exp_values.into_iter().map(move |v| v / sum)
            })
            .collect();

        Tensor::new(result, self.shape.clone())
    }

    /// Index of the maximum value in each row of a 2-D tensor.
    ///
    /// Ties resolve to the first (lowest) index. This is the decoder for
    /// one-hot encoded labels and for class predictions.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2-D or has zero columns.
    pub fn argmax_rows(&self) -> Vec<usize> {
        assert_eq!(
            self.shape.len(),
            2,
            "argmax_rows expects a 2-D tensor, got {:?}",
            self.shape
        );
        let cols = self.shape[1];
        assert!(cols > 0, "argmax_rows on zero-width tensor");

        self.data
            .chunks(cols)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        let t = Tensor::zeros(vec![2, 3, 4]);
        assert_eq!(t.strides, vec![12, 4, 1]);
    }

    #[test]
    fn matmul_known_values() {
        let a = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![5.0, 6.0, 7.0, 8.0], vec![2, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.data, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn matmul_parallel_path_matches_sequential() {
        // 32x32 crosses the parallel threshold; spot-check one entry against
        // a naive accumulation.
        let a = Tensor::new((0..32 * 32).map(|i| (i % 7) as f32).collect(), vec![32, 32]);
        let b = Tensor::new((0..32 * 32).map(|i| (i % 5) as f32).collect(), vec![32, 32]);
        let c = a.matmul(&b);

        let mut expected = 0.0;
        for l in 0..32 {
            expected += a.data[3 * 32 + l] * b.data[l * 32 + 9];
        }
        assert!((c.data[3 * 32 + 9] - expected).abs() < 1e-4);
    }

    #[test]
    fn add_broadcasts_bias() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], vec![2, 2]);
        let b = Tensor::new(vec![10.0, 20.0], vec![2]);
        let y = x.add(&b);
        assert_eq!(y.data, vec![11.0, 22.0, 13.0, 24.0]);
    }

    #[test]
    fn softmax_rows_sum_to_one() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 1000.0, 1001.0, 999.0], vec![2, 3]);
        let p = t.softmax_rows();
        for row in p.data.chunks(3) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row.iter().all(|&v| v.is_finite()));
        }
    }

    #[test]
    fn argmax_rows_picks_first_on_tie() {
        let t = Tensor::new(vec![0.5, 0.5, 0.0, 0.1, 0.2, 0.7], vec![2, 3]);
        assert_eq!(t.argmax_rows(), vec![0, 2]);
    }
}
