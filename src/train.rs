//! Training Loop and Evaluation
//!
//! Drives mini-batch gradient descent over a generated dataset and measures
//! held-out performance afterwards. The loop is deliberately plain: a fixed
//! number of epochs, no validation split, no early stopping, no
//! checkpointing. The dataset is synthetic and cheap, so the demo pipeline
//! trains once and evaluates once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use voxnet::{dataset, data, model::{NetworkConfig, ShapeNet}, train};
//!
//! let ((x_train, y_train), (x_test, y_test)) = dataset::load_data(0.2, 100, 8);
//! let y_train = data::to_categorical(&y_train, 2);
//! let y_test = data::to_categorical(&y_test, 2);
//!
//! let mut model = ShapeNet::new(&NetworkConfig::tiny());
//! let config = train::TrainConfig {
//!     epochs: 2,
//!     batch_size: 8,
//!     ..TrainConfig::default()
//! };
//! # use voxnet::train::TrainConfig;
//! train::fit(&mut model, &x_train, &y_train, &config, None).unwrap();
//! let (loss, accuracy) = train::evaluate(&mut model, &x_test, &y_test, 8);
//! println!("test loss {loss:.4}, accuracy {accuracy:.4}");
//! ```

use crate::data::VolumeBatches;
use crate::logger::TrainingLogger;
use crate::model::ShapeNet;
use crate::optimizer::{rmsprop_update, RmsPropOptimizer};
use crate::tensor::Tensor;
use std::time::Instant;

/// Training hyperparameters.
///
/// The defaults reproduce the demo pipeline: batches of 128 for 50 epochs
/// with RMSProp at a 0.01 learning rate, 1e-6 step decay, and 0.9 for both
/// the squared-gradient average and the momentum buffer.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// Samples per mini-batch
    pub batch_size: usize,
    /// Full passes over the training set
    pub epochs: usize,
    /// Base learning rate
    pub learning_rate: f32,
    /// Per-step learning-rate decay
    pub lr_decay: f32,
    /// Squared-gradient averaging coefficient
    pub rho: f32,
    /// Momentum on the scaled step
    pub momentum: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            epochs: 50,
            learning_rate: 0.01,
            lr_decay: 1e-6,
            rho: 0.9,
            momentum: 0.9,
        }
    }
}

impl TrainConfig {
    /// Minimal configuration for smoke runs: tiny batches, a single epoch.
    pub fn smoke() -> Self {
        Self {
            batch_size: 2,
            epochs: 1,
            ..Self::default()
        }
    }
}

/// Train the model in place and return the mean loss of every epoch.
///
/// `y_train` must be one-hot encoded (see [`crate::data::to_categorical`]).
/// Progress goes to the logger when one is supplied, otherwise to stdout.
/// Dropout is switched on for the duration of the call and off again before
/// returning.
pub fn fit(
    model: &mut ShapeNet,
    x_train: &Tensor,
    y_train: &Tensor,
    config: &TrainConfig,
    mut logger: Option<&mut TrainingLogger>,
) -> std::io::Result<Vec<f32>> {
    assert!(config.epochs > 0, "epochs must be positive");

    model.set_training(true);
    let mut optimizer = RmsPropOptimizer::new(model);
    optimizer.rho = config.rho;
    optimizer.momentum = config.momentum;

    let n = x_train.shape[0];
    let mut epoch_losses = Vec::with_capacity(config.epochs);
    let start = Instant::now();

    for epoch in 1..=config.epochs {
        let epoch_start = Instant::now();
        let mut batches = VolumeBatches::new(x_train, y_train, config.batch_size);

        let mut total_loss = 0.0;
        let mut correct = 0;
        let mut effective_lr = config.learning_rate;

        while let Some((xb, yb)) = batches.next_batch() {
            let (logits, cache) = model.forward(&xb);
            let loss = model.compute_loss(&logits, &yb);
            total_loss += loss * xb.shape[0] as f32;

            let predicted = logits.argmax_rows();
            let expected = yb.argmax_rows();
            correct += predicted
                .iter()
                .zip(&expected)
                .filter(|(p, e)| p == e)
                .count();

            let grads = model.backward(&logits, &yb, &cache);
            effective_lr = rmsprop_update(
                model,
                &grads,
                &mut optimizer,
                config.learning_rate,
                config.lr_decay,
            );
        }

        let epoch_loss = total_loss / n as f32;
        let epoch_accuracy = correct as f32 / n as f32;
        epoch_losses.push(epoch_loss);

        match logger.as_deref_mut() {
            Some(logger) => {
                logger.log(epoch, effective_lr, epoch_loss, epoch_accuracy)?;
            }
            None => {
                println!(
                    "Epoch {:3}/{} | Time: {:6.1}s (+{:.1}s) | LR: {:.6} | Loss: {:.4} | Accuracy: {:.4}",
                    epoch,
                    config.epochs,
                    start.elapsed().as_secs_f32(),
                    epoch_start.elapsed().as_secs_f32(),
                    effective_lr,
                    epoch_loss,
                    epoch_accuracy
                );
            }
        }
    }

    model.set_training(false);
    Ok(epoch_losses)
}

/// Evaluate mean loss and accuracy on a held-out set.
///
/// Dropout is disabled for the duration of the call. `y_test` must be
/// one-hot encoded.
pub fn evaluate(
    model: &mut ShapeNet,
    x_test: &Tensor,
    y_test: &Tensor,
    batch_size: usize,
) -> (f32, f32) {
    model.set_training(false);

    let n = x_test.shape[0];
    let mut batches = VolumeBatches::new(x_test, y_test, batch_size);
    let mut total_loss = 0.0;
    let mut correct = 0;

    while let Some((xb, yb)) = batches.next_batch() {
        let (logits, _) = model.forward(&xb);
        total_loss += model.compute_loss(&logits, &yb) * xb.shape[0] as f32;

        let predicted = logits.argmax_rows();
        let expected = yb.argmax_rows();
        correct += predicted
            .iter()
            .zip(&expected)
            .filter(|(p, e)| p == e)
            .count();
    }

    (total_loss / n as f32, correct as f32 / n as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::to_categorical;
    use crate::dataset;
    use crate::model::NetworkConfig;

    #[test]
    fn fit_returns_one_loss_per_epoch() {
        let ((x_train, y_train), _) = dataset::load_data_seeded(0.25, 8, 8, 21);
        let y_train = to_categorical(&y_train, 2);

        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        let config = TrainConfig {
            batch_size: 3,
            epochs: 2,
            ..TrainConfig::default()
        };
        let losses = fit(&mut model, &x_train, &y_train, &config, None).unwrap();
        assert_eq!(losses.len(), 2);
        assert!(losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn training_improves_fixed_dataset_loss() {
        let ((x_train, y_train), _) = dataset::load_data_seeded(0.2, 20, 8, 5);
        let y_onehot = to_categorical(&y_train, 2);

        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        model.set_training(false);
        let initial = model.loss_from_labels(&x_train, &y_train);

        let config = TrainConfig {
            batch_size: 4,
            epochs: 8,
            learning_rate: 0.005,
            ..TrainConfig::default()
        };
        fit(&mut model, &x_train, &y_onehot, &config, None).unwrap();

        let trained = model.loss_from_labels(&x_train, &y_train);
        assert!(
            trained < initial,
            "training did not reduce loss: {} -> {}",
            initial,
            trained
        );
    }

    #[test]
    fn evaluate_reports_bounded_accuracy() {
        let (x, labels) =
            dataset::load_data_seeded(0.5, 12, 8, 9).1;
        let y = to_categorical(&labels, 2);

        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        let (loss, accuracy) = evaluate(&mut model, &x, &y, 4);
        assert!(loss.is_finite());
        assert!((0.0..=1.0).contains(&accuracy));
    }
}
