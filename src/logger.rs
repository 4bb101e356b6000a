//! Training Logger
//!
//! Records per-epoch metrics to a CSV file and mirrors them to the console.
//! The CSV survives a crashed run (every line is flushed) and is trivially
//! plotted afterwards.
//!
//! ## CSV Format
//!
//! - `epoch`: Epoch number
//! - `elapsed_seconds`: Time since the logger was created
//! - `learning_rate`: Effective learning rate at the end of the epoch
//! - `train_loss`: Mean cross-entropy over the epoch
//! - `train_accuracy`: Fraction of training samples classified correctly
//!
//! ## Example
//!
//! ```rust,no_run
//! use voxnet::TrainingLogger;
//!
//! let mut logger = TrainingLogger::new("training_log.csv")?;
//! logger.log(1, 0.01, 0.693, 0.5)?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::fs::File;
use std::io::Write;
use std::time::Instant;

/// Per-epoch metric logger (CSV file + console).
pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write its header.
    pub fn new(log_path: &str) -> std::io::Result<Self> {
        let mut log_file = File::create(log_path)?;
        writeln!(
            log_file,
            "epoch,elapsed_seconds,learning_rate,train_loss,train_accuracy"
        )?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    /// Record one epoch.
    pub fn log(
        &mut self,
        epoch: usize,
        learning_rate: f32,
        train_loss: f32,
        train_accuracy: f32,
    ) -> std::io::Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f32();

        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.4},{:.4}",
            epoch, elapsed, learning_rate, train_loss, train_accuracy
        )?;
        // Flushed per line so a crashed run keeps its history.
        self.log_file.flush()?;

        let epoch_time = self.last_log_time.elapsed().as_secs_f32();
        println!(
            "Epoch {:3} | Time: {:6.1}s (+{:.1}s) | LR: {:.6} | Loss: {:.4} | Accuracy: {:.4}",
            epoch, elapsed, epoch_time, learning_rate, train_loss, train_accuracy
        );

        self.last_log_time = Instant::now();
        Ok(())
    }
}
