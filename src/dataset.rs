//! On-the-fly 3D Shape Dataset
//!
//! This module synthesizes the training data instead of loading it from disk.
//! Each sample is a cubic voxel volume containing one solid, rendered at a
//! random position and size:
//!
//! - **Sphere** (class 0): Euclidean ball, `|v - c|_2 <= r`
//! - **Diamond** (class 1): L1 ball (an octahedron), `|dx| + |dy| + |dz| <= r`
//! - **Cube** (class 1): Chebyshev ball, `max(|dx|, |dy|, |dz|) <= r`
//!
//! The classification task is curved versus flat-faced: spheres form class 0
//! and the two polyhedra share class 1. Voxels inside the solid read 1.0 and
//! outside 0.0, with additive Gaussian noise over the whole volume so the
//! network cannot key on exact values.
//!
//! ## Example
//!
//! ```rust
//! use voxnet::dataset;
//!
//! let ((x_train, y_train), (x_test, y_test)) = dataset::load_data(0.2, 50, 8);
//! assert_eq!(x_train.shape, vec![40, 1, 8, 8, 8]);
//! assert_eq!(x_test.shape, vec![10, 1, 8, 8, 8]);
//! assert_eq!(y_train.len() + y_test.len(), 50);
//! ```

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Number of target classes produced by the generator.
pub const NUM_CLASSES: usize = 2;

/// Standard deviation of the additive voxel noise.
const NOISE_STD: f32 = 0.05;

/// The solids the generator can rasterize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShapeKind {
    Sphere,
    Diamond,
    Cube,
}

impl ShapeKind {
    /// Class id of this solid: 0 for the sphere, 1 for the polyhedra.
    pub fn class(self) -> usize {
        match self {
            ShapeKind::Sphere => 0,
            ShapeKind::Diamond | ShapeKind::Cube => 1,
        }
    }

    /// Draw a solid with balanced classes: the sphere half the time, one of
    /// the two polyhedra otherwise.
    pub fn sample(rng: &mut impl Rng) -> Self {
        if rng.gen_bool(0.5) {
            ShapeKind::Sphere
        } else if rng.gen_bool(0.5) {
            ShapeKind::Diamond
        } else {
            ShapeKind::Cube
        }
    }

    /// Whether the voxel at offset `(dz, dy, dx)` from the center lies inside
    /// a solid of the given radius.
    fn contains(self, dz: f32, dy: f32, dx: f32, radius: f32) -> bool {
        match self {
            ShapeKind::Sphere => (dz * dz + dy * dy + dx * dx).sqrt() <= radius,
            ShapeKind::Diamond => dz.abs() + dy.abs() + dx.abs() <= radius,
            ShapeKind::Cube => dz.abs().max(dy.abs()).max(dx.abs()) <= radius,
        }
    }
}

/// Rasterize one solid into a `patch_size^3` volume.
///
/// The center jitters around the middle of the patch and the radius is drawn
/// so the solid always fits, which keeps every sample fully visible.
fn rasterize(
    kind: ShapeKind,
    patch_size: usize,
    rng: &mut impl Rng,
    noise: &Normal<f32>,
) -> Vec<f32> {
    let p = patch_size as f32;
    let jitter = p / 8.0;
    let center = [
        p / 2.0 + rng.gen_range(-jitter..jitter),
        p / 2.0 + rng.gen_range(-jitter..jitter),
        p / 2.0 + rng.gen_range(-jitter..jitter),
    ];
    let radius = rng.gen_range(p / 4.0..p / 2.0 - jitter);

    let mut volume = Vec::with_capacity(patch_size * patch_size * patch_size);
    for z in 0..patch_size {
        for y in 0..patch_size {
            for x in 0..patch_size {
                let dz = z as f32 + 0.5 - center[0];
                let dy = y as f32 + 0.5 - center[1];
                let dx = x as f32 + 0.5 - center[2];
                let fill = if kind.contains(dz, dy, dx, radius) {
                    1.0
                } else {
                    0.0
                };
                volume.push(fill + noise.sample(rng));
            }
        }
    }
    volume
}

/// Generate `dataset_size` labeled volumes with the supplied RNG.
///
/// Returns a `[n, 1, p, p, p]` tensor and the matching class ids.
///
/// # Panics
///
/// Panics if `dataset_size` is zero or `patch_size` is too small to hold a
/// solid.
pub fn generate(
    dataset_size: usize,
    patch_size: usize,
    rng: &mut impl Rng,
) -> (Tensor, Vec<usize>) {
    assert!(dataset_size > 0, "dataset_size must be positive");
    assert!(
        patch_size >= 4,
        "patch_size {} too small to rasterize a solid",
        patch_size
    );

    let noise = Normal::new(0.0, NOISE_STD).expect("valid noise distribution");
    let volume_len = patch_size * patch_size * patch_size;

    let mut data = Vec::with_capacity(dataset_size * volume_len);
    let mut labels = Vec::with_capacity(dataset_size);

    for _ in 0..dataset_size {
        let kind = ShapeKind::sample(rng);
        data.extend(rasterize(kind, patch_size, rng, &noise));
        labels.push(kind.class());
    }

    let x = Tensor::new(
        data,
        vec![dataset_size, 1, patch_size, patch_size, patch_size],
    );
    (x, labels)
}

/// Generate and split a dataset: the original entry point of the pipeline.
///
/// `test_split` of the samples (rounded down) are held out for evaluation;
/// the rest form the training set. The two sets are disjoint and their sizes
/// always sum to `dataset_size`.
///
/// Uses the thread-local RNG; see [`load_data_seeded`] for reproducible runs.
///
/// # Panics
///
/// Panics if `test_split` is outside the open interval (0, 1) or either split
/// would be empty.
pub fn load_data(
    test_split: f32,
    dataset_size: usize,
    patch_size: usize,
) -> ((Tensor, Vec<usize>), (Tensor, Vec<usize>)) {
    let mut rng = rand::thread_rng();
    split_generated(test_split, dataset_size, patch_size, &mut rng)
}

/// Deterministic variant of [`load_data`] driven by a fixed seed.
pub fn load_data_seeded(
    test_split: f32,
    dataset_size: usize,
    patch_size: usize,
    seed: u64,
) -> ((Tensor, Vec<usize>), (Tensor, Vec<usize>)) {
    let mut rng = StdRng::seed_from_u64(seed);
    split_generated(test_split, dataset_size, patch_size, &mut rng)
}

fn split_generated(
    test_split: f32,
    dataset_size: usize,
    patch_size: usize,
    rng: &mut impl Rng,
) -> ((Tensor, Vec<usize>), (Tensor, Vec<usize>)) {
    assert!(
        test_split > 0.0 && test_split < 1.0,
        "test_split must lie in (0, 1), got {}",
        test_split
    );

    let n_test = (dataset_size as f32 * test_split) as usize;
    let n_train = dataset_size - n_test;
    assert!(
        n_train > 0 && n_test > 0,
        "split {} of {} samples leaves an empty set",
        test_split,
        dataset_size
    );

    let (x, labels) = generate(dataset_size, patch_size, rng);
    let volume_len = patch_size * patch_size * patch_size;

    let x_train = Tensor::new(
        x.data[..n_train * volume_len].to_vec(),
        vec![n_train, 1, patch_size, patch_size, patch_size],
    );
    let x_test = Tensor::new(
        x.data[n_train * volume_len..].to_vec(),
        vec![n_test, 1, patch_size, patch_size, patch_size],
    );
    let y_train = labels[..n_train].to_vec();
    let y_test = labels[n_train..].to_vec();

    ((x_train, y_train), (x_test, y_test))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_sizes_sum_to_total() {
        for &split in &[0.1, 0.2, 0.33, 0.5, 0.75] {
            let ((x_train, y_train), (x_test, y_test)) = load_data_seeded(split, 40, 4, 7);
            assert_eq!(y_train.len() + y_test.len(), 40, "split {}", split);
            assert_eq!(x_train.shape[0], y_train.len());
            assert_eq!(x_test.shape[0], y_test.len());
        }
    }

    #[test]
    fn sample_tensors_have_volume_shape() {
        let ((x_train, _), (x_test, _)) = load_data_seeded(0.2, 10, 8, 1);
        assert_eq!(x_train.shape, vec![8, 1, 8, 8, 8]);
        assert_eq!(x_test.shape, vec![2, 1, 8, 8, 8]);
    }

    #[test]
    fn labels_are_binary() {
        let (_, labels) = generate(64, 4, &mut StdRng::seed_from_u64(3));
        assert!(labels.iter().all(|&l| l < NUM_CLASSES));
        // With 64 draws both classes should occur.
        assert!(labels.contains(&0));
        assert!(labels.contains(&1));
    }

    #[test]
    fn generation_is_seed_deterministic() {
        let (a, la) = generate(5, 6, &mut StdRng::seed_from_u64(42));
        let (b, lb) = generate(5, 6, &mut StdRng::seed_from_u64(42));
        assert_eq!(la, lb);
        assert_eq!(a.data, b.data);
    }

    #[test]
    fn solids_fill_part_of_the_volume() {
        let (x, _) = generate(8, 8, &mut StdRng::seed_from_u64(11));
        let volume_len = 8 * 8 * 8;
        for sample in x.data.chunks(volume_len) {
            let filled = sample.iter().filter(|&&v| v > 0.5).count();
            assert!(filled > 0, "sample contains no solid voxels");
            assert!(filled < volume_len, "sample is entirely filled");
        }
    }
}
