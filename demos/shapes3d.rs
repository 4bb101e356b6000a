//! Classifying Synthesized 3D Shapes
//!
//! Trains a small 3D convolutional network to tell curved solids (spheres)
//! from flat-faced ones (diamonds and cubes). Volumetric features are
//! exactly what such a task needs: a 2D slice of a diamond and a cube can
//! look identical, but their 3D neighborhoods differ, and the learned 3D
//! filters pick that up.
//!
//! The data is generated on the fly; nothing is read from or written to
//! disk.
//!
//! ## Pipeline
//!
//! 1. Synthesize 5000 labeled 32-voxel volumes, 20% held out for testing
//! 2. One-hot encode the labels
//! 3. Assemble three conv+pool stages and a small dense head
//! 4. Train 50 epochs of RMSProp on batches of 128
//! 5. Print the held-out accuracy
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --example shapes3d
//!
//! # Limit the worker pool (all heavy loops go through Rayon):
//! RAYON_NUM_THREADS=4 cargo run --release --example shapes3d
//! ```
//!
//! Expect the full run to take a while on CPU; the training loop prints one
//! progress line per epoch. Held-out accuracy lands well above chance (0.5)
//! after the first few epochs and keeps climbing.

use voxnet::{data::to_categorical, dataset, train, NetworkConfig, ShapeNet, TrainConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Data generation parameters
    let test_split = 0.2;
    let dataset_size = 5000;
    let patch_size = 32;

    let ((x_train, y_train), (x_test, y_test)) =
        dataset::load_data(test_split, dataset_size, patch_size);

    println!("X_train shape: {:?}", x_train.shape);
    println!("{} train samples", x_train.shape[0]);
    println!("{} test samples", x_test.shape[0]);

    // Training parameters
    let batch_size = 128;
    let num_classes = 2;
    let epochs = 50;

    // Convert class ids to one-hot class matrices
    let y_train = to_categorical(&y_train, num_classes);
    let y_test = to_categorical(&y_test, num_classes);

    // Three conv+pool stages with growing filter banks and shrinking
    // kernels, then the dense classifier head; NetworkConfig::default()
    // carries the filter/kernel/pool constants.
    let network = NetworkConfig {
        patch_size,
        num_classes,
        ..NetworkConfig::default()
    };
    let mut model = ShapeNet::new(&network);
    println!("Model parameters: {}", model.num_parameters());

    // RMSProp absorbs the occasional class-skewed batch that on-the-fly
    // generation can produce.
    let config = TrainConfig {
        batch_size,
        epochs,
        ..TrainConfig::default()
    };
    train::fit(&mut model, &x_train, &y_train, &config, None)?;

    let (score, accuracy) = train::evaluate(&mut model, &x_test, &y_test, batch_size);
    println!("Test score: {score:.4}");
    println!("Test Accuracy: {accuracy:.4}");

    Ok(())
}
