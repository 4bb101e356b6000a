//! Volumetric Shape Classifier
//!
//! This module assembles the full network and implements its training
//! mathematics: forward pass, softmax cross-entropy loss, and backward pass.
//!
//! ## Architecture Overview
//!
//! ```text
//! Input volume [n, 1, p, p, p]
//!     |
//! Conv3D(16, 7x7x7) + ReLU -> MaxPool3D(2) -> Dropout(0.5)
//!     |
//! Conv3D(32, 5x5x5) + ReLU -> MaxPool3D(2)
//!     |
//! Conv3D(32, 3x3x3) + ReLU -> MaxPool3D(2)
//!     |
//! Flatten
//!     |
//! Dense(16) + ReLU -> Dropout(0.5)
//!     |
//! Dense(2) -> softmax (fused with the loss)
//! ```
//!
//! Filter counts grow while kernels shrink as the spatial resolution drops,
//! so each stage trades geometry for features. All of the numbers live in
//! [`NetworkConfig`]; [`Default`] reproduces the stack above for 32-voxel
//! patches.
//!
//! ## Loss
//!
//! The final softmax is fused with categorical cross-entropy. For logits `z`
//! and one-hot targets `t`:
//!
//! ```text
//! loss       = -mean over batch of sum(t * log softmax(z))
//! grad_z     = (softmax(z) - t) / batch
//! ```
//!
//! The fused form is numerically stable (log-sum-exp) and gives the simple
//! subtraction gradient, so no layer ever materializes a softmax derivative.
//!
//! ## Determinism
//!
//! Assembly is deterministic: every layer draws its weights from a fixed
//! per-layer seed, so two models built from the same config agree in shapes
//! *and* values. Training then diverges only through dropout masks and data
//! order.

use crate::data::to_categorical;
use crate::layers::{
    conv_out_dim, pool_out_dim, relu_backward, relu_forward, BlockCache, BlockGradients,
    ConvBlock, DenseCache, DenseGradients, DropoutCache, TrainableDense, TrainableDropout,
};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Number of convolution blocks in the feature extractor.
pub const NUM_BLOCKS: usize = 3;

/// Architecture hyperparameters.
///
/// `filters`, `kernels` and `pools` are per-stage constants for the three
/// convolution blocks. The dropout rate is shared by the first block and the
/// classifier head.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Edge length of the cubic input volume
    pub patch_size: usize,
    /// Number of target classes
    pub num_classes: usize,
    /// Convolution filters per stage
    pub filters: [usize; NUM_BLOCKS],
    /// Cubic kernel edge per stage
    pub kernels: [usize; NUM_BLOCKS],
    /// Pooling window edge per stage
    pub pools: [usize; NUM_BLOCKS],
    /// Width of the hidden dense layer
    pub dense_units: usize,
    /// Dropout probability
    pub dropout_rate: f32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            patch_size: 32,
            num_classes: 2,
            filters: [16, 32, 32],
            kernels: [7, 5, 3],
            pools: [2, 2, 2],
            dense_units: 16,
            dropout_rate: 0.5,
        }
    }
}

impl NetworkConfig {
    /// Small configuration for tests and smoke runs on 8-voxel patches.
    pub fn tiny() -> Self {
        Self {
            patch_size: 8,
            num_classes: 2,
            filters: [4, 8, 8],
            kernels: [3, 3, 1],
            pools: [2, 1, 1],
            dense_units: 8,
            dropout_rate: 0.25,
        }
    }

    /// Spatial edge length after each conv+pool stage.
    ///
    /// # Panics
    ///
    /// Panics if any stage would collapse to zero voxels, naming the stage.
    pub fn stage_dims(&self) -> [usize; NUM_BLOCKS] {
        let mut dims = [0; NUM_BLOCKS];
        let mut dim = self.patch_size;
        for i in 0..NUM_BLOCKS {
            let convolved = conv_out_dim(dim, self.kernels[i]);
            assert!(
                convolved > 0,
                "stage {}: kernel {} does not fit {} voxels",
                i + 1,
                self.kernels[i],
                dim
            );
            let pooled = pool_out_dim(convolved, self.pools[i]);
            assert!(
                pooled > 0,
                "stage {}: pool {} does not fit {} voxels",
                i + 1,
                self.pools[i],
                convolved
            );
            dims[i] = pooled;
            dim = pooled;
        }
        dims
    }

    /// Feature count entering the dense head.
    pub fn flattened_dim(&self) -> usize {
        let last = self.stage_dims()[NUM_BLOCKS - 1];
        self.filters[NUM_BLOCKS - 1] * last * last * last
    }
}

/// The full trainable network.
pub struct ShapeNet {
    pub(crate) blocks: Vec<ConvBlock>,
    pub(crate) dense1: TrainableDense,
    pub(crate) head_dropout: TrainableDropout,
    pub(crate) dense2: TrainableDense,
    pub(crate) config: NetworkConfig,
}

impl ShapeNet {
    /// Assemble the network described by `config`.
    ///
    /// # Panics
    ///
    /// Panics if the config's stage arithmetic collapses some dimension to
    /// zero (see [`NetworkConfig::stage_dims`]).
    pub fn new(config: &NetworkConfig) -> Self {
        // Validates the whole stack before any allocation.
        let flattened = config.flattened_dim();

        let mut blocks = Vec::with_capacity(NUM_BLOCKS);
        let mut in_channels = 1;
        for i in 0..NUM_BLOCKS {
            // Dropout only follows the first convolution stage.
            let dropout = if i == 0 {
                Some(config.dropout_rate)
            } else {
                None
            };
            blocks.push(ConvBlock::new(
                in_channels,
                config.filters[i],
                config.kernels[i],
                config.pools[i],
                dropout,
                10_000 * (i as u64 + 1),
            ));
            in_channels = config.filters[i];
        }

        Self {
            blocks,
            dense1: TrainableDense::new(flattened, config.dense_units, 45_678),
            head_dropout: TrainableDropout::new(config.dropout_rate),
            dense2: TrainableDense::new(config.dense_units, config.num_classes, 78_901),
            config: config.clone(),
        }
    }

    /// The configuration this model was assembled from.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Switch dropout between training and inference behavior.
    pub fn set_training(&mut self, training: bool) {
        for block in &mut self.blocks {
            if let Some(dropout) = block.dropout.as_mut() {
                dropout.training = training;
            }
        }
        self.head_dropout.training = training;
    }

    /// Forward a `[n, 1, p, p, p]` batch to `[n, num_classes]` logits.
    pub fn forward(&self, x: &Tensor) -> (Tensor, ShapeNetCache) {
        assert_eq!(
            x.shape.len(),
            5,
            "expected [n, c, d, h, w] input, got {:?}",
            x.shape
        );
        assert_eq!(
            x.shape[2], self.config.patch_size,
            "input volume does not match configured patch size"
        );

        let mut features = x.clone();
        let mut block_caches = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let (next, cache) = block.forward(&features);
            block_caches.push(cache);
            features = next;
        }

        // Flatten the last feature volume into one row per sample.
        let feature_shape = features.shape.clone();
        let n = feature_shape[0];
        let flat = features.len() / n;
        let flattened = features.reshape(&[n, flat]);

        let (hidden_pre, dense1_cache) = self.dense1.forward(&flattened);
        let hidden = relu_forward(&hidden_pre);
        let (dropped, dropout_cache) = self.head_dropout.forward(&hidden);
        let (logits, dense2_cache) = self.dense2.forward(&dropped);

        let cache = ShapeNetCache {
            block_caches,
            feature_shape,
            dense1: dense1_cache,
            hidden_pre,
            dropout: dropout_cache,
            dense2: dense2_cache,
        };
        (logits, cache)
    }

    /// Mean categorical cross-entropy between logits and one-hot targets.
    pub fn compute_loss(&self, logits: &Tensor, targets: &Tensor) -> f32 {
        assert_eq!(
            logits.shape, targets.shape,
            "logits and targets must share shape"
        );
        let batch = logits.shape[0];
        let classes = logits.shape[1];

        let mut total = 0.0;
        for i in 0..batch {
            let row = &logits.data[i * classes..(i + 1) * classes];
            let max = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let lse = row.iter().map(|&v| (v - max).exp()).sum::<f32>().ln();
            for (j, &t) in targets.data[i * classes..(i + 1) * classes].iter().enumerate() {
                if t > 0.0 {
                    total -= t * ((row[j] - max) - lse);
                }
            }
        }
        total / batch as f32
    }

    /// Backpropagate from logits down to every parameter.
    pub fn backward(
        &self,
        logits: &Tensor,
        targets: &Tensor,
        cache: &ShapeNetCache,
    ) -> ShapeNetGradients {
        let batch = logits.shape[0];

        // Fused softmax + cross-entropy gradient: (p - t) / batch.
        let probs = logits.softmax_rows();
        let grad_logits_data: Vec<f32> = probs
            .data
            .iter()
            .zip(&targets.data)
            .map(|(p, t)| (p - t) / batch as f32)
            .collect();
        let grad_logits = Tensor::new(grad_logits_data, logits.shape.clone());

        let dense2_grads = self.dense2.backward(&grad_logits, &cache.dense2);
        let grad = self.head_dropout.backward(&dense2_grads.x, &cache.dropout);
        let grad = relu_backward(&grad, &cache.hidden_pre);
        let dense1_grads = self.dense1.backward(&grad, &cache.dense1);

        // Un-flatten back to the last feature volume.
        let mut grad = dense1_grads.x.reshape(&cache.feature_shape);

        let mut block_grads = Vec::with_capacity(self.blocks.len());
        for (block, block_cache) in self.blocks.iter().zip(&cache.block_caches).rev() {
            let grads = block.backward(&grad, block_cache);
            grad = grads.x.clone();
            block_grads.push(grads);
        }
        block_grads.reverse(); // back to forward order

        ShapeNetGradients {
            block_grads,
            dense1: dense1_grads,
            dense2: dense2_grads,
        }
    }

    /// Class probabilities for a batch, honoring the current dropout mode.
    pub fn predict_proba(&self, x: &Tensor) -> Tensor {
        let (logits, _) = self.forward(x);
        logits.softmax_rows()
    }

    /// Predicted class ids for a batch.
    pub fn predict_classes(&self, x: &Tensor) -> Vec<usize> {
        let (logits, _) = self.forward(x);
        logits.argmax_rows()
    }

    /// Fraction of samples whose predicted class matches `labels`.
    pub fn accuracy(&self, x: &Tensor, labels: &[usize]) -> f32 {
        let predictions = self.predict_classes(x);
        assert_eq!(predictions.len(), labels.len());
        let correct = predictions
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count();
        correct as f32 / labels.len() as f32
    }

    /// Total number of trainable parameters.
    pub fn num_parameters(&self) -> usize {
        let mut count = 0;
        for block in &self.blocks {
            count += block.conv.weight.len() + block.conv.bias.len();
        }
        count += self.dense1.weight.len() + self.dense1.bias.len();
        count += self.dense2.weight.len() + self.dense2.bias.len();
        count
    }

    /// Iterate the one-hot loss over every sample at once.
    ///
    /// Convenience wrapper used by tests and demos when integer labels are at
    /// hand rather than one-hot targets.
    pub fn loss_from_labels(&self, x: &Tensor, labels: &[usize]) -> f32 {
        let targets = to_categorical(labels, self.config.num_classes);
        let (logits, _) = self.forward(x);
        self.compute_loss(&logits, &targets)
    }

    //=========================================================================
    // Persistence
    //=========================================================================

    /// Save model weights to a binary file.
    ///
    /// Layout: magic header, version byte, JSON-encoded config, then every
    /// parameter tensor in assembly order as little-endian f32.
    pub fn save_to_file(&self, path: &str) -> std::io::Result<()> {
        use std::fs::File;
        use std::io::Write;

        let mut file = File::create(path)?;
        file.write_all(MAGIC)?;
        file.write_all(&[VERSION])?;

        let config_json = serde_json::to_string(&self.config)?;
        let config_bytes = config_json.as_bytes();
        file.write_all(&(config_bytes.len() as u32).to_le_bytes())?;
        file.write_all(config_bytes)?;

        for block in &self.blocks {
            write_tensor(&mut file, &block.conv.weight)?;
            write_tensor(&mut file, &block.conv.bias)?;
        }
        write_tensor(&mut file, &self.dense1.weight)?;
        write_tensor(&mut file, &self.dense1.bias)?;
        write_tensor(&mut file, &self.dense2.weight)?;
        write_tensor(&mut file, &self.dense2.bias)?;

        Ok(())
    }

    /// Load a model saved with [`ShapeNet::save_to_file`].
    pub fn load_from_file(path: &str) -> std::io::Result<Self> {
        use std::fs::File;
        use std::io::Read;

        let mut file = File::open(path)?;

        let mut magic = [0u8; MAGIC.len()];
        file.read_exact(&mut magic)?;
        if magic != *MAGIC {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "not a voxnet model file",
            ));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("unsupported model file version {}", version[0]),
            ));
        }

        let mut len_bytes = [0u8; 4];
        file.read_exact(&mut len_bytes)?;
        let config_len = u32::from_le_bytes(len_bytes) as usize;
        let mut config_bytes = vec![0u8; config_len];
        file.read_exact(&mut config_bytes)?;
        let config_json = String::from_utf8(config_bytes)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let config: NetworkConfig = serde_json::from_str(&config_json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        // Build with fresh weights, then overwrite every tensor from the file.
        let mut model = ShapeNet::new(&config);
        for block in &mut model.blocks {
            block.conv.weight = read_tensor(&mut file)?;
            block.conv.bias = read_tensor(&mut file)?;
        }
        model.dense1.weight = read_tensor(&mut file)?;
        model.dense1.bias = read_tensor(&mut file)?;
        model.dense2.weight = read_tensor(&mut file)?;
        model.dense2.bias = read_tensor(&mut file)?;

        Ok(model)
    }
}

const MAGIC: &[u8; 10] = b"VOXNET_MDL";
const VERSION: u8 = 1;

fn write_tensor(file: &mut std::fs::File, tensor: &Tensor) -> std::io::Result<()> {
    use std::io::Write;

    file.write_all(&(tensor.shape.len() as u32).to_le_bytes())?;
    for &dim in &tensor.shape {
        file.write_all(&(dim as u32).to_le_bytes())?;
    }
    let mut bytes = Vec::with_capacity(tensor.data.len() * 4);
    for &val in &tensor.data {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    file.write_all(&bytes)
}

fn read_tensor(file: &mut std::fs::File) -> std::io::Result<Tensor> {
    use std::io::Read;

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let rank = u32::from_le_bytes(len_bytes) as usize;

    let mut shape = Vec::with_capacity(rank);
    for _ in 0..rank {
        let mut dim_bytes = [0u8; 4];
        file.read_exact(&mut dim_bytes)?;
        shape.push(u32::from_le_bytes(dim_bytes) as usize);
    }

    let size: usize = shape.iter().product();
    let mut bytes = vec![0u8; size * 4];
    file.read_exact(&mut bytes)?;
    let data = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(Tensor::new(data, shape))
}

/// Cache for the full-network backward pass.
pub struct ShapeNetCache {
    block_caches: Vec<BlockCache>,
    /// Shape of the last feature volume, restored when un-flattening.
    feature_shape: Vec<usize>,
    dense1: DenseCache,
    /// Hidden layer pre-activation, for the ReLU derivative.
    hidden_pre: Tensor,
    dropout: DropoutCache,
    dense2: DenseCache,
}

/// Gradients for every trainable parameter in the network.
pub struct ShapeNetGradients {
    pub block_grads: Vec<BlockGradients>,
    pub dense1: DenseGradients,
    pub dense2: DenseGradients,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stage_arithmetic() {
        let config = NetworkConfig::default();
        // 32 -conv7-> 26 -pool2-> 13 -conv5-> 9 -pool2-> 4 -conv3-> 2 -pool2-> 1
        assert_eq!(config.stage_dims(), [13, 4, 1]);
        assert_eq!(config.flattened_dim(), 32);
    }

    #[test]
    fn tiny_stage_arithmetic() {
        let config = NetworkConfig::tiny();
        // 8 -conv3-> 6 -pool2-> 3 -conv3-> 1 -> 1 -conv1-> 1 -> 1
        assert_eq!(config.stage_dims(), [3, 1, 1]);
        assert_eq!(config.flattened_dim(), 8);
    }

    #[test]
    #[should_panic(expected = "does not fit")]
    fn oversized_kernel_is_rejected() {
        let config = NetworkConfig {
            patch_size: 8,
            ..NetworkConfig::default()
        };
        // The default 7/5/3 kernel stack cannot process an 8-voxel patch.
        ShapeNet::new(&config);
    }

    #[test]
    fn assembly_is_deterministic() {
        let config = NetworkConfig::tiny();
        let a = ShapeNet::new(&config);
        let b = ShapeNet::new(&config);

        assert_eq!(a.num_parameters(), b.num_parameters());
        for (ba, bb) in a.blocks.iter().zip(&b.blocks) {
            assert_eq!(ba.conv.weight.shape, bb.conv.weight.shape);
            assert_eq!(ba.conv.weight.data, bb.conv.weight.data);
        }
        assert_eq!(a.dense1.weight.data, b.dense1.weight.data);
        assert_eq!(a.dense2.weight.data, b.dense2.weight.data);
    }

    #[test]
    fn forward_produces_class_logits() {
        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        model.set_training(false);
        let x = Tensor::zeros(vec![3, 1, 8, 8, 8]);
        let (logits, _) = model.forward(&x);
        assert_eq!(logits.shape, vec![3, 2]);
    }

    #[test]
    fn uniform_logits_give_log_num_classes_loss() {
        let model = ShapeNet::new(&NetworkConfig::tiny());
        let logits = Tensor::zeros(vec![4, 2]);
        let targets = to_categorical(&[0, 1, 0, 1], 2);
        let loss = model.compute_loss(&logits, &targets);
        assert!((loss - (2.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn backward_covers_every_parameter() {
        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        model.set_training(false);

        let x = Tensor::new(
            (0..2 * 512).map(|i| ((i % 17) as f32) / 17.0).collect(),
            vec![2, 1, 8, 8, 8],
        );
        let targets = to_categorical(&[0, 1], 2);

        let (logits, cache) = model.forward(&x);
        let grads = model.backward(&logits, &targets, &cache);

        assert_eq!(grads.block_grads.len(), NUM_BLOCKS);
        for (block, g) in model.blocks.iter().zip(&grads.block_grads) {
            assert_eq!(g.weight.shape, block.conv.weight.shape);
            assert_eq!(g.bias.shape, block.conv.bias.shape);
        }
        assert_eq!(grads.dense1.weight.shape, model.dense1.weight.shape);
        assert_eq!(grads.dense2.weight.shape, model.dense2.weight.shape);
        // The classifier gradient is non-trivial.
        assert!(grads.dense2.bias.data.iter().any(|&g| g != 0.0));
    }

    #[test]
    fn probabilities_are_normalized() {
        let mut model = ShapeNet::new(&NetworkConfig::tiny());
        model.set_training(false);
        let x = Tensor::zeros(vec![2, 1, 8, 8, 8]);
        let probs = model.predict_proba(&x);
        for row in probs.data.chunks(2) {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }
}
