//! Label Encoding and Mini-Batch Iteration
//!
//! Two small pieces of data plumbing sit between the generator and the
//! training loop:
//!
//! - [`to_categorical`] turns integer class ids into one-hot rows, the form
//!   the cross-entropy loss consumes.
//! - [`VolumeBatches`] walks a sample tensor and its one-hot targets in
//!   fixed-size mini-batches, including a final partial batch.
//!
//! ## Example
//!
//! ```rust
//! use voxnet::data::{to_categorical, VolumeBatches};
//! use voxnet::Tensor;
//!
//! let x = Tensor::zeros(vec![5, 1, 4, 4, 4]);
//! let y = to_categorical(&[0, 1, 1, 0, 1], 2);
//!
//! let mut batches = VolumeBatches::new(&x, &y, 2);
//! assert_eq!(batches.num_batches(), 3);
//! while let Some((xb, yb)) = batches.next_batch() {
//!     assert_eq!(xb.shape[0], yb.shape[0]);
//! }
//! ```

use crate::tensor::Tensor;

/// One-hot encode a slice of class ids into an `[n, num_classes]` matrix.
///
/// Each row contains exactly one 1.0, at the label's index. `argmax` over a
/// row ([`Tensor::argmax_rows`]) recovers the original labels.
///
/// # Panics
///
/// Panics if any label is outside `0..num_classes`.
pub fn to_categorical(labels: &[usize], num_classes: usize) -> Tensor {
    assert!(num_classes > 0, "num_classes must be positive");
    let mut data = vec![0.0; labels.len() * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        assert!(
            label < num_classes,
            "label {} out of range for {} classes",
            label,
            num_classes
        );
        data[i * num_classes + label] = 1.0;
    }
    Tensor::new(data, vec![labels.len(), num_classes])
}

/// Mini-batch iterator over a sample tensor and its one-hot targets.
///
/// Samples are the leading dimension of both tensors; batches copy the
/// relevant slices so the layers can consume them as owned tensors. When the
/// sample count is not a multiple of the batch size, the final batch is
/// smaller rather than dropped.
pub struct VolumeBatches<'a> {
    x: &'a Tensor,
    y: &'a Tensor,
    batch_size: usize,
    position: usize,
}

impl<'a> VolumeBatches<'a> {
    /// Create an iterator over `x` (samples-first tensor) and `y`
    /// (`[n, num_classes]` targets).
    ///
    /// # Panics
    ///
    /// Panics if the sample counts disagree or `batch_size` is zero.
    pub fn new(x: &'a Tensor, y: &'a Tensor, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        assert!(!x.shape.is_empty() && !y.shape.is_empty());
        assert_eq!(
            x.shape[0], y.shape[0],
            "sample count mismatch: x has {}, y has {}",
            x.shape[0], y.shape[0]
        );
        Self {
            x,
            y,
            batch_size,
            position: 0,
        }
    }

    /// Next `(samples, targets)` pair, or `None` once the set is exhausted.
    ///
    /// Returning `None` resets the iterator, so the same value can drive the
    /// next epoch.
    pub fn next_batch(&mut self) -> Option<(Tensor, Tensor)> {
        let n = self.x.shape[0];
        if self.position >= n {
            self.position = 0;
            return None;
        }

        let start = self.position;
        let end = (start + self.batch_size).min(n);
        self.position = end;

        let sample_len = self.x.len() / n;
        let target_len = self.y.shape[1];

        let mut x_shape = self.x.shape.clone();
        x_shape[0] = end - start;
        let xb = Tensor::new(
            self.x.data[start * sample_len..end * sample_len].to_vec(),
            x_shape,
        );
        let yb = Tensor::new(
            self.y.data[start * target_len..end * target_len].to_vec(),
            vec![end - start, target_len],
        );
        Some((xb, yb))
    }

    /// Rewind to the first batch.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// Number of batches per epoch, counting a final partial batch.
    pub fn num_batches(&self) -> usize {
        self.x.shape[0].div_ceil(self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_hot_rows_have_single_one() {
        let labels = [1, 0, 1, 1, 0, 1];
        let encoded = to_categorical(&labels, 2);
        assert_eq!(encoded.shape, vec![6, 2]);
        for row in encoded.data.chunks(2) {
            let ones = row.iter().filter(|&&v| v == 1.0).count();
            let zeros = row.iter().filter(|&&v| v == 0.0).count();
            assert_eq!(ones, 1);
            assert_eq!(zeros, 1);
        }
    }

    #[test]
    fn one_hot_argmax_roundtrip() {
        let labels = [0, 1, 1, 0, 1, 0, 0];
        let encoded = to_categorical(&labels, 2);
        assert_eq!(encoded.argmax_rows(), labels.to_vec());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn one_hot_rejects_out_of_range_label() {
        to_categorical(&[0, 2], 2);
    }

    #[test]
    fn batches_cover_all_samples_with_partial_tail() {
        let x = Tensor::new((0..5 * 3).map(|i| i as f32).collect(), vec![5, 3]);
        let y = to_categorical(&[0, 1, 0, 1, 0], 2);
        let mut batches = VolumeBatches::new(&x, &y, 2);
        assert_eq!(batches.num_batches(), 3);

        let mut seen = 0;
        let mut sizes = Vec::new();
        while let Some((xb, yb)) = batches.next_batch() {
            assert_eq!(xb.shape[0], yb.shape[0]);
            // Rows come through in order and unmodified.
            assert_eq!(xb.data[0], (seen * 3) as f32);
            seen += xb.shape[0];
            sizes.push(xb.shape[0]);
        }
        assert_eq!(seen, 5);
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn exhausted_iterator_restarts() {
        let x = Tensor::zeros(vec![3, 2]);
        let y = to_categorical(&[0, 0, 1], 2);
        let mut batches = VolumeBatches::new(&x, &y, 2);
        while batches.next_batch().is_some() {}
        // None reset the position; a new epoch starts from the first batch.
        let (xb, _) = batches.next_batch().unwrap();
        assert_eq!(xb.shape[0], 2);
    }
}
