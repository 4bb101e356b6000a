//! Configurable Shape-Classifier Training
//!
//! The same pipeline as the `shapes3d` example with every hyperparameter
//! exposed as a command-line flag, plus optional CSV metric logging and
//! model saving.
//!
//! ## Usage
//!
//! ```bash
//! # The fixed demo configuration
//! cargo run --release --example train
//!
//! # A quick run on small patches
//! cargo run --release --example train -- --tiny --dataset-size 200 --epochs 5
//!
//! # Reproducible run with metrics and a saved model
//! cargo run --release --example train -- \
//!     --seed 7 --log training_log.csv --save model.bin
//! ```

use clap::Parser;
use voxnet::{
    data::to_categorical, dataset, train, NetworkConfig, ShapeNet, TrainConfig, TrainingLogger,
};

#[derive(Parser)]
#[command(
    name = "train",
    about = "Train the 3D shape classifier with configurable hyperparameters"
)]
struct Args {
    /// Total number of generated samples
    #[arg(long, default_value = "5000")]
    dataset_size: usize,

    /// Edge length of the cubic input volumes
    #[arg(long, default_value = "32")]
    patch_size: usize,

    /// Fraction of samples held out for evaluation
    #[arg(long, default_value = "0.2")]
    test_split: f32,

    /// Use the small 8-voxel architecture preset
    #[arg(long)]
    tiny: bool,

    // Training parameters
    /// Samples per mini-batch
    #[arg(long, default_value = "128")]
    batch_size: usize,

    /// Number of training epochs
    #[arg(long, default_value = "50")]
    epochs: usize,

    /// Base learning rate
    #[arg(long, default_value = "0.01")]
    lr: f32,

    /// Per-step learning-rate decay
    #[arg(long, default_value = "1e-6")]
    decay: f32,

    /// RMSProp squared-gradient coefficient
    #[arg(long, default_value = "0.9")]
    rho: f32,

    /// Momentum on the scaled step
    #[arg(long, default_value = "0.9")]
    momentum: f32,

    /// Seed for reproducible data generation
    #[arg(long)]
    seed: Option<u64>,

    /// Write per-epoch metrics to this CSV file
    #[arg(long)]
    log: Option<String>,

    /// Save the trained model to this file
    #[arg(long)]
    save: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let network = if args.tiny {
        NetworkConfig::tiny()
    } else {
        NetworkConfig {
            patch_size: args.patch_size,
            ..NetworkConfig::default()
        }
    };
    let patch_size = network.patch_size;

    println!("Generating {} samples ({}^3 voxels)...", args.dataset_size, patch_size);
    let ((x_train, y_train), (x_test, y_test)) = match args.seed {
        Some(seed) => {
            dataset::load_data_seeded(args.test_split, args.dataset_size, patch_size, seed)
        }
        None => dataset::load_data(args.test_split, args.dataset_size, patch_size),
    };
    println!("{} train samples", x_train.shape[0]);
    println!("{} test samples", x_test.shape[0]);

    let num_classes = network.num_classes;
    let y_train = to_categorical(&y_train, num_classes);
    let y_test = to_categorical(&y_test, num_classes);

    let mut model = ShapeNet::new(&network);
    println!("Model parameters: {}", model.num_parameters());

    let config = TrainConfig {
        batch_size: args.batch_size,
        epochs: args.epochs,
        learning_rate: args.lr,
        lr_decay: args.decay,
        rho: args.rho,
        momentum: args.momentum,
    };

    let mut logger = match &args.log {
        Some(path) => Some(TrainingLogger::new(path)?),
        None => None,
    };
    train::fit(&mut model, &x_train, &y_train, &config, logger.as_mut())?;

    let (score, accuracy) = train::evaluate(&mut model, &x_test, &y_test, args.batch_size);
    println!("Test score: {score:.4}");
    println!("Test Accuracy: {accuracy:.4}");

    if let Some(path) = &args.save {
        model.save_to_file(path)?;
        println!("Model saved to {path}");
    }

    Ok(())
}
