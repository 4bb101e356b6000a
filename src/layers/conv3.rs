//! 3D Convolution Layer
//!
//! The feature extractor of the network: a learned filter bank swept over the
//! three spatial dimensions of a voxel volume.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [batch, in_c, d, h, w]
//! Weight: W [out_c, in_c, k, k, k]
//! Bias:   b [out_c]
//! Output: y [batch, out_c, d-k+1, h-k+1, w-k+1]
//!
//! y[n,co,z,y,x] = b[co]
//!               + sum over ci,kz,ky,kx of
//!                 x[n,ci,z+kz,y+ky,x+kx] * W[co,ci,kz,ky,kx]
//! ```
//!
//! Only "valid" padding with stride 1 is implemented: the filter never leaves
//! the input volume, so each spatial dimension shrinks by `k - 1`.
//!
//! ## Backward Pass
//!
//! Each weight touches every output position, and each input voxel feeds all
//! filter offsets that cover it:
//!
//! ```text
//! grad_b[co]              = sum over n,z,y,x of grad_y[n,co,z,y,x]
//! grad_W[co,ci,kz,ky,kx]  = sum over n,z,y,x of
//!                           grad_y[n,co,z,y,x] * x[n,ci,z+kz,y+ky,x+kx]
//! grad_x[n,ci,iz,iy,ix]  += grad_y[n,co,z,y,x] * W[co,ci,iz-z,iy-y,ix-x]
//! ```
//!
//! The input-gradient formula is implemented as a scatter: every output
//! gradient is distributed back over the `k^3` input voxels it came from.
//!
//! ## Performance
//!
//! All three heavy computations parallelize with Rayon over independent
//! output planes: the forward pass and input gradient over `(batch, channel)`
//! pairs, the weight gradient over output channels. Within a plane the loops
//! are ordered so the innermost runs over contiguous memory.

use crate::layers::dense::normal_init;
use crate::tensor::Tensor;
use rayon::prelude::*;

/// Output size of a valid, stride-1 convolution along one dimension.
///
/// Returns 0 when the kernel does not fit, letting callers report the
/// offending stage themselves.
pub const fn conv_out_dim(input: usize, kernel: usize) -> usize {
    if kernel == 0 || input < kernel {
        0
    } else {
        input - kernel + 1
    }
}

/// 3D convolution layer with cubic kernels.
pub struct TrainableConv3 {
    /// Filter bank `[out_c, in_c, k, k, k]`
    pub weight: Tensor,
    /// Per-filter bias `[out_c]`
    pub bias: Tensor,
    /// Cubic kernel edge length
    pub kernel: usize,
}

impl TrainableConv3 {
    /// Create a convolution layer with He-initialized filters and zero bias.
    ///
    /// The fan-in of a filter is `in_channels * kernel^3`.
    pub fn new(in_channels: usize, out_channels: usize, kernel: usize, seed: u64) -> Self {
        assert!(in_channels > 0 && out_channels > 0 && kernel > 0);
        let fan_in = in_channels * kernel * kernel * kernel;
        let std = (2.0 / fan_in as f32).sqrt();
        Self {
            weight: Tensor::new(
                normal_init(out_channels * fan_in, seed, std),
                vec![out_channels, in_channels, kernel, kernel, kernel],
            ),
            bias: Tensor::new(vec![0.0; out_channels], vec![out_channels]),
            kernel,
        }
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.weight.shape[0]
    }

    /// Number of input channels expected.
    pub fn in_channels(&self) -> usize {
        self.weight.shape[1]
    }

    /// Convolve a batch of volumes, caching the input for the backward pass.
    ///
    /// # Panics
    ///
    /// Panics if `x` is not 5-D, the channel count disagrees with the filter
    /// bank, or the kernel does not fit in some spatial dimension.
    pub fn forward(&self, x: &Tensor) -> (Tensor, Conv3Cache) {
        assert_eq!(x.shape.len(), 5, "conv3 expects [n, c, d, h, w] input");
        let (n, c_in, d, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3], x.shape[4]);
        assert_eq!(
            c_in,
            self.in_channels(),
            "input has {} channels, filters expect {}",
            c_in,
            self.in_channels()
        );

        let k = self.kernel;
        let (od, oh, ow) = (conv_out_dim(d, k), conv_out_dim(h, k), conv_out_dim(w, k));
        assert!(
            od > 0 && oh > 0 && ow > 0,
            "kernel {} does not fit input volume {}x{}x{}",
            k,
            d,
            h,
            w
        );

        let c_out = self.out_channels();
        let plane = od * oh * ow;
        let mut out = vec![0.0; n * c_out * plane];

        out.par_chunks_mut(plane).enumerate().for_each(|(bi, dst)| {
            let sample = bi / c_out;
            let co = bi % c_out;

            dst.fill(self.bias.data[co]);

            for ci in 0..c_in {
                let x_base = sample * x.strides[0] + ci * x.strides[1];
                let w_base = co * self.weight.strides[0] + ci * self.weight.strides[1];

                for kz in 0..k {
                    for ky in 0..k {
                        for kx in 0..k {
                            let wv = self.weight.data
                                [w_base + kz * k * k + ky * k + kx];
                            for z in 0..od {
                                let row_base = x_base + (z + kz) * h * w + ky * w + kx;
                                for y in 0..oh {
                                    let src = &x.data
                                        [row_base + y * w..row_base + y * w + ow];
                                    let dst_row = &mut dst[z * oh * ow + y * ow
                                        ..z * oh * ow + y * ow + ow];
                                    for (o, &v) in dst_row.iter_mut().zip(src) {
                                        *o += wv * v;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        let out = Tensor::new(out, vec![n, c_out, od, oh, ow]);
        (out, Conv3Cache { x: x.clone() })
    }

    /// Gradients for the filters, bias, and input volume.
    pub fn backward(&self, grad_out: &Tensor, cache: &Conv3Cache) -> Conv3Gradients {
        let x = &cache.x;
        let (n, c_in, d, h, w) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3], x.shape[4]);
        let c_out = self.out_channels();
        let k = self.kernel;
        let (od, oh, ow) = (
            grad_out.shape[2],
            grad_out.shape[3],
            grad_out.shape[4],
        );
        let plane = od * oh * ow;

        // Bias gradient: total gradient received by each filter.
        let grad_bias_data: Vec<f32> = (0..c_out)
            .into_par_iter()
            .map(|co| {
                let mut sum = 0.0;
                for sample in 0..n {
                    let base = sample * grad_out.strides[0] + co * grad_out.strides[1];
                    sum += grad_out.data[base..base + plane].iter().sum::<f32>();
                }
                sum
            })
            .collect();

        // Weight gradient: correlate the input with the output gradient.
        let fan = c_in * k * k * k;
        let mut grad_weight_data = vec![0.0; c_out * fan];
        grad_weight_data
            .par_chunks_mut(fan)
            .enumerate()
            .for_each(|(co, dst)| {
                for ci in 0..c_in {
                    for kz in 0..k {
                        for ky in 0..k {
                            for kx in 0..k {
                                let mut sum = 0.0;
                                for sample in 0..n {
                                    let go_base = sample * grad_out.strides[0]
                                        + co * grad_out.strides[1];
                                    let x_base = sample * x.strides[0]
                                        + ci * x.strides[1]
                                        + kz * h * w
                                        + ky * w
                                        + kx;
                                    for z in 0..od {
                                        for y in 0..oh {
                                            let go_row = &grad_out.data[go_base
                                                + z * oh * ow
                                                + y * ow
                                                ..go_base + z * oh * ow + y * ow + ow];
                                            let x_row = &x.data[x_base + z * h * w + y * w
                                                ..x_base + z * h * w + y * w + ow];
                                            for (g, v) in go_row.iter().zip(x_row) {
                                                sum += g * v;
                                            }
                                        }
                                    }
                                }
                                dst[ci * k * k * k + kz * k * k + ky * k + kx] = sum;
                            }
                        }
                    }
                }
            });

        // Input gradient: scatter each output gradient over the voxels the
        // filter read.
        let mut grad_x_data = vec![0.0; x.len()];
        grad_x_data
            .par_chunks_mut(d * h * w)
            .enumerate()
            .for_each(|(bi, dst)| {
                let sample = bi / c_in;
                let ci = bi % c_in;

                for co in 0..c_out {
                    let go_base = sample * grad_out.strides[0] + co * grad_out.strides[1];
                    let w_base = co * self.weight.strides[0] + ci * self.weight.strides[1];

                    for kz in 0..k {
                        for ky in 0..k {
                            for kx in 0..k {
                                let wv = self.weight.data
                                    [w_base + kz * k * k + ky * k + kx];
                                for z in 0..od {
                                    for y in 0..oh {
                                        let go_row = &grad_out.data[go_base
                                            + z * oh * ow
                                            + y * ow
                                            ..go_base + z * oh * ow + y * ow + ow];
                                        let dst_base =
                                            (z + kz) * h * w + (y + ky) * w + kx;
                                        let dst_row =
                                            &mut dst[dst_base..dst_base + ow];
                                        for (o, &g) in dst_row.iter_mut().zip(go_row) {
                                            *o += wv * g;
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Conv3Gradients {
            weight: Tensor::new(grad_weight_data, self.weight.shape.clone()),
            bias: Tensor::new(grad_bias_data, self.bias.shape.clone()),
            x: Tensor::new(grad_x_data, x.shape.clone()),
        }
    }
}

/// Cache for the convolution backward pass.
pub struct Conv3Cache {
    pub x: Tensor,
}

/// Gradients produced by a convolution layer.
pub struct Conv3Gradients {
    pub weight: Tensor,
    pub bias: Tensor,
    /// Gradient handed to the previous layer.
    pub x: Tensor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32) * 0.1 - 0.3).collect()
    }

    #[test]
    fn output_dim_arithmetic() {
        assert_eq!(conv_out_dim(32, 7), 26);
        assert_eq!(conv_out_dim(8, 3), 6);
        assert_eq!(conv_out_dim(2, 5), 0);
        assert_eq!(conv_out_dim(4, 0), 0);
    }

    #[test]
    fn forward_single_window_sums_filter() {
        // Input 2x2x2 of ones with a kernel of the same size collapses to a
        // single voxel holding sum(W) + bias.
        let mut conv = TrainableConv3::new(1, 1, 2, 0);
        conv.weight = Tensor::new(ramp(8), vec![1, 1, 2, 2, 2]);
        conv.bias = Tensor::new(vec![0.5], vec![1]);

        let x = Tensor::new(vec![1.0; 8], vec![1, 1, 2, 2, 2]);
        let (y, _) = conv.forward(&x);
        assert_eq!(y.shape, vec![1, 1, 1, 1, 1]);

        let expected: f32 = ramp(8).iter().sum::<f32>() + 0.5;
        assert!((y.data[0] - expected).abs() < 1e-5);
    }

    #[test]
    fn forward_sums_over_input_channels() {
        let mut conv = TrainableConv3::new(2, 1, 1, 0);
        conv.weight = Tensor::new(vec![2.0, 3.0], vec![1, 2, 1, 1, 1]);
        conv.bias = Tensor::new(vec![0.0], vec![1]);

        // Channel 0 all ones, channel 1 all tens.
        let mut data = vec![1.0; 8];
        data.extend(vec![10.0; 8]);
        let x = Tensor::new(data, vec![1, 2, 2, 2, 2]);

        let (y, _) = conv.forward(&x);
        assert_eq!(y.shape, vec![1, 1, 2, 2, 2]);
        for &v in &y.data {
            assert!((v - 32.0).abs() < 1e-5); // 2*1 + 3*10
        }
    }

    #[test]
    fn weight_gradient_matches_finite_differences() {
        let mut conv = TrainableConv3::new(1, 1, 2, 3);
        conv.weight = Tensor::new(ramp(8), vec![1, 1, 2, 2, 2]);
        let x = Tensor::new(ramp(27), vec![1, 1, 3, 3, 3]);

        // Loss = sum of all outputs, so grad_out is all ones.
        let (y, cache) = conv.forward(&x);
        let grad_out = Tensor::new(vec![1.0; y.len()], y.shape.clone());
        let grads = conv.backward(&grad_out, &cache);

        let eps = 1e-3;
        for i in 0..conv.weight.len() {
            let mut plus = conv.weight.clone();
            plus.data[i] += eps;
            let mut minus = conv.weight.clone();
            minus.data[i] -= eps;

            let probe = |weight: Tensor| {
                let layer = TrainableConv3 {
                    weight,
                    bias: conv.bias.clone(),
                    kernel: conv.kernel,
                };
                let (out, _) = layer.forward(&x);
                out.data.iter().sum::<f32>()
            };

            let numeric = (probe(plus) - probe(minus)) / (2.0 * eps);
            assert!(
                (grads.weight.data[i] - numeric).abs() < 1e-2,
                "weight {} analytic {} vs numeric {}",
                i,
                grads.weight.data[i],
                numeric
            );
        }
    }

    #[test]
    fn input_gradient_matches_finite_differences() {
        let conv = TrainableConv3::new(1, 2, 2, 5);
        let x = Tensor::new(ramp(27), vec![1, 1, 3, 3, 3]);

        let (y, cache) = conv.forward(&x);
        let grad_out = Tensor::new(vec![1.0; y.len()], y.shape.clone());
        let grads = conv.backward(&grad_out, &cache);

        let probe = |input: &Tensor| {
            let (out, _) = conv.forward(input);
            out.data.iter().sum::<f32>()
        };

        let eps = 1e-3;
        for i in [0, 13, 26] {
            let mut plus = x.clone();
            plus.data[i] += eps;
            let mut minus = x.clone();
            minus.data[i] -= eps;
            let numeric = (probe(&plus) - probe(&minus)) / (2.0 * eps);
            assert!(
                (grads.x.data[i] - numeric).abs() < 1e-2,
                "voxel {} analytic {} vs numeric {}",
                i,
                grads.x.data[i],
                numeric
            );
        }
    }
}
