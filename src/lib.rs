//! Voxnet: 3D Shape Classification From Scratch
//!
//! A small 3D convolutional network that learns to classify synthesized
//! voxel solids (spheres versus polyhedra), implemented entirely in Rust
//! with hand-written forward and backward passes.
//!
//! # Modules
//!
//! - [`tensor`] - Flat-storage f32 tensors with shape/stride indexing
//! - [`dataset`] - On-the-fly voxel shape synthesis and train/test split
//! - [`data`] - One-hot label encoding and mini-batch iteration
//! - [`layers`] - Conv3D, max-pool, dense, dropout, ReLU building blocks
//! - [`model`] - Network assembly, loss, and backpropagation
//! - [`optimizer`] - RMSProp with learning-rate decay and momentum
//! - [`train`] - Epoch loop and held-out evaluation
//! - [`logger`] - CSV + console metric logging
//!
//! # Example
//!
//! ```rust,no_run
//! use voxnet::{dataset, data, NetworkConfig, ShapeNet, TrainConfig, train};
//!
//! // Synthesize a dataset and one-hot encode the labels
//! let ((x_train, y_train), (x_test, y_test)) = dataset::load_data(0.2, 500, 8);
//! let y_train = data::to_categorical(&y_train, 2);
//! let y_test = data::to_categorical(&y_test, 2);
//!
//! // Assemble and train
//! let mut model = ShapeNet::new(&NetworkConfig::tiny());
//! train::fit(&mut model, &x_train, &y_train, &TrainConfig::default(), None)?;
//!
//! // Measure held-out accuracy
//! let (loss, accuracy) = train::evaluate(&mut model, &x_test, &y_test, 128);
//! println!("Test accuracy: {accuracy:.4}");
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! Heavy loops run data-parallel through Rayon; set `RAYON_NUM_THREADS` to
//! control how many cores a run uses.

pub mod data;
pub mod dataset;
pub mod layers;
pub mod logger;
pub mod model;
pub mod optimizer;
pub mod tensor;
pub mod train;

// Re-export main types for convenience
pub use data::to_categorical;
pub use dataset::load_data;
pub use logger::TrainingLogger;
pub use model::{NetworkConfig, ShapeNet};
pub use optimizer::{rmsprop_update, RmsPropOptimizer};
pub use tensor::Tensor;
pub use train::{evaluate, fit, TrainConfig};
