//! Neural Network Layers
//!
//! The layer implementations for the volumetric classifier. Each trainable
//! layer provides an explicit forward and backward pass.
//!
//! ## Layers
//!
//! - **activation**: ReLU (forward and backward)
//! - **conv3**: 3D convolution, the feature extractor
//! - **pool3**: 3D max-pooling downsampler
//! - **dense**: Fully connected layer for the classifier head
//! - **dropout**: Inverted dropout regularization
//! - **block**: Conv -> ReLU -> pool [-> dropout] unit
//!
//! ## Design Pattern
//!
//! Every trainable layer follows the same shape:
//!
//! ```rust,ignore
//! impl TrainableLayer {
//!     pub fn new(...) -> Self { }
//!     pub fn forward(&self, x: &Tensor) -> (Tensor, Cache) { }
//!     pub fn backward(&self, grad: &Tensor, cache: &Cache) -> Gradients { }
//! }
//! ```
//!
//! The `Cache` carries whatever the backward pass needs from the forward
//! pass (inputs, pre-activations, pooling winners, dropout masks); the
//! `Gradients` struct carries one tensor per parameter plus the gradient to
//! hand upstream. Backpropagation stays fully explicit: there is no autograd
//! graph anywhere in the crate.

pub mod activation;
pub mod block;
pub mod conv3;
pub mod dense;
pub mod dropout;
pub mod pool3;

// Re-export main types for convenience
pub use activation::{relu_backward, relu_forward};
pub use block::{BlockCache, BlockGradients, ConvBlock};
pub use conv3::{conv_out_dim, Conv3Cache, Conv3Gradients, TrainableConv3};
pub use dense::{normal_init, DenseCache, DenseGradients, TrainableDense};
pub use dropout::{DropoutCache, TrainableDropout};
pub use pool3::{pool_out_dim, MaxPool3, Pool3Cache};
