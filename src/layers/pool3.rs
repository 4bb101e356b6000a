//! 3D Max-Pooling Layer
//!
//! Downsamples a volume by taking the maximum over non-overlapping cubic
//! windows. For a pool size `p` each spatial dimension shrinks to
//! `floor(dim / p)`; trailing voxels that don't fill a window are ignored,
//! which is what lets the 9-voxel stage of the default architecture pool
//! down to 4.
//!
//! Pooling has no parameters. The backward pass routes each output gradient
//! to the single input voxel that won the forward max (first winner on ties),
//! so the cache stores one flat input index per output element.

use crate::tensor::Tensor;
use rayon::prelude::*;

/// Output size of one pooled dimension.
pub const fn pool_out_dim(input: usize, pool: usize) -> usize {
    if pool == 0 {
        0
    } else {
        input / pool
    }
}

/// Max-pooling over non-overlapping `pool^3` windows.
pub struct MaxPool3 {
    pub pool: usize,
}

impl MaxPool3 {
    /// Create a pooling layer.
    ///
    /// # Panics
    ///
    /// Panics if `pool` is zero.
    pub fn new(pool: usize) -> Self {
        assert!(pool > 0, "pool size must be positive");
        Self { pool }
    }

    /// Pool a `[n, c, d, h, w]` batch, caching the winning indices.
    ///
    /// # Panics
    ///
    /// Panics if the input is not 5-D or any pooled dimension collapses to
    /// zero.
    pub fn forward(&self, x: &Tensor) -> (Tensor, Pool3Cache) {
        assert_eq!(x.shape.len(), 5, "pool3 expects [n, c, d, h, w] input");
        let (n, c, d, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3], x.shape[4]);
        let p = self.pool;
        let (od, oh, ow) = (pool_out_dim(d, p), pool_out_dim(h, p), pool_out_dim(w, p));
        assert!(
            od > 0 && oh > 0 && ow > 0,
            "pool size {} does not fit input volume {}x{}x{}",
            p,
            d,
            h,
            w
        );

        let plane = od * oh * ow;
        let mut out = vec![0.0; n * c * plane];
        let mut argmax = vec![0usize; n * c * plane];

        out.par_chunks_mut(plane)
            .zip(argmax.par_chunks_mut(plane))
            .enumerate()
            .for_each(|(bi, (dst, idx))| {
                let base = bi * x.strides[1]; // (sample, channel) plane offset

                for z in 0..od {
                    for y in 0..oh {
                        for xo in 0..ow {
                            let mut best_val = f32::NEG_INFINITY;
                            let mut best_idx = 0;
                            for dz in 0..p {
                                for dy in 0..p {
                                    for dx in 0..p {
                                        let src = base
                                            + (z * p + dz) * h * w
                                            + (y * p + dy) * w
                                            + (xo * p + dx);
                                        let v = x.data[src];
                                        if v > best_val {
                                            best_val = v;
                                            best_idx = src;
                                        }
                                    }
                                }
                            }
                            let o = z * oh * ow + y * ow + xo;
                            dst[o] = best_val;
                            idx[o] = best_idx;
                        }
                    }
                }
            });

        let cache = Pool3Cache {
            argmax,
            input_shape: x.shape.clone(),
        };
        (Tensor::new(out, vec![n, c, od, oh, ow]), cache)
    }

    /// Scatter each output gradient onto the voxel that produced the max.
    pub fn backward(&self, grad_out: &Tensor, cache: &Pool3Cache) -> Tensor {
        assert_eq!(
            grad_out.len(),
            cache.argmax.len(),
            "gradient does not match pooled output"
        );
        let size: usize = cache.input_shape.iter().product();
        let mut grad_x = vec![0.0; size];
        // Windows never overlap, so the argmax indices are distinct and this
        // scatter needs no accumulation discipline.
        for (&src, &g) in cache.argmax.iter().zip(&grad_out.data) {
            grad_x[src] += g;
        }
        Tensor::new(grad_x, cache.input_shape.clone())
    }
}

/// Cache for the pooling backward pass.
pub struct Pool3Cache {
    /// Flat input index of the max for every output element.
    argmax: Vec<usize>,
    input_shape: Vec<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pooled_dim_truncates() {
        assert_eq!(pool_out_dim(9, 2), 4);
        assert_eq!(pool_out_dim(8, 2), 4);
        assert_eq!(pool_out_dim(1, 2), 0);
    }

    #[test]
    fn forward_selects_window_maximum() {
        // 2x2x2 volume pooled by 2 collapses to the single max value.
        let mut data = vec![0.0; 8];
        data[5] = 7.5;
        let x = Tensor::new(data, vec![1, 1, 2, 2, 2]);
        let (y, _) = MaxPool3::new(2).forward(&x);
        assert_eq!(y.shape, vec![1, 1, 1, 1, 1]);
        assert_eq!(y.data, vec![7.5]);
    }

    #[test]
    fn forward_ignores_trailing_voxels() {
        // A 3-wide dimension pooled by 2 keeps one window and drops the rest.
        let data: Vec<f32> = (0..27).map(|i| i as f32).collect();
        let x = Tensor::new(data, vec![1, 1, 3, 3, 3]);
        let (y, _) = MaxPool3::new(2).forward(&x);
        assert_eq!(y.shape, vec![1, 1, 1, 1, 1]);
        // Max over the 2x2x2 corner window of a raster scan is index 13.
        assert_eq!(y.data, vec![13.0]);
    }

    #[test]
    fn backward_routes_gradient_to_winner() {
        let mut data = vec![0.0; 8];
        data[3] = 2.0;
        let x = Tensor::new(data, vec![1, 1, 2, 2, 2]);
        let pool = MaxPool3::new(2);
        let (y, cache) = pool.forward(&x);

        let grad_out = Tensor::new(vec![4.0], y.shape.clone());
        let gx = pool.backward(&grad_out, &cache);
        let mut expected = vec![0.0; 8];
        expected[3] = 4.0;
        assert_eq!(gx.data, expected);
    }
}
