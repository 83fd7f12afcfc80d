//! PatchDataset: an endless, shuffled stream of clean image patches

use super::BatchSource;
use crate::checkpoints::mlx_utils::{f32_from_le_bytes, f32_to_le_bytes};
use anyhow::{Context, Result};
use memmap2::MmapOptions;
use mlx_rs::Array;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;

/// Name of the `[N, H, W, C]` tensor inside a patch file
pub const PATCHES_TENSOR: &str = "patches";

pub struct PatchDataset {
    patches: Vec<f32>,
    /// `[H, W, C]` of a single patch
    patch_shape: [usize; 3],
    num_patches: usize,
    batch_size: usize,
    shuffle: bool,
    seed: u64,

    // State
    order: Vec<usize>,
    position: usize,
    epoch: usize,
    rng: StdRng,
}

impl PatchDataset {
    /// Builds a dataset over in-memory patches laid out as `shape = [N, H, W, C]`
    pub fn new(
        patches: Vec<f32>,
        shape: [usize; 4],
        batch_size: usize,
        shuffle: bool,
        seed: u64,
    ) -> Result<Self> {
        let [num_patches, height, width, channels] = shape;
        if batch_size == 0 {
            anyhow::bail!("batch_size must be > 0");
        }
        if num_patches == 0 {
            anyhow::bail!("patch dataset is empty");
        }
        if patches.len() != num_patches * height * width * channels {
            anyhow::bail!(
                "patch data has {} values but shape {:?} needs {}",
                patches.len(),
                shape,
                num_patches * height * width * channels
            );
        }

        let mut dataset = Self {
            patches,
            patch_shape: [height, width, channels],
            num_patches,
            batch_size,
            shuffle,
            seed,
            order: (0..num_patches).collect(),
            position: 0,
            epoch: 0,
            rng: StdRng::seed_from_u64(seed),
        };
        dataset.start_epoch();
        Ok(dataset)
    }

    /// Loads the `patches` tensor of a safetensors file
    pub fn from_file(path: &Path, batch_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open patch file {}", path.display()))?;
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .with_context(|| format!("Failed to map file {}", path.display()))?
        };
        let tensors = SafeTensors::deserialize(&mmap)
            .with_context(|| format!("Failed to deserialize safetensors from {}", path.display()))?;
        let tensor = tensors
            .tensor(PATCHES_TENSOR)
            .with_context(|| format!("{} has no '{}' tensor", path.display(), PATCHES_TENSOR))?;

        if tensor.dtype() != Dtype::F32 {
            anyhow::bail!("patch tensor must be F32, got {:?}", tensor.dtype());
        }
        let shape: [usize; 4] = tensor.shape().try_into().map_err(|_| {
            anyhow::anyhow!("patch tensor must be [N, H, W, C], got {:?}", tensor.shape())
        })?;

        let dataset = Self::new(
            f32_from_le_bytes(tensor.data()),
            shape,
            batch_size,
            shuffle,
            seed,
        )?;
        tracing::info!(
            "Loaded {} patches of {:?} from {}",
            dataset.num_patches,
            dataset.patch_shape,
            path.display()
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.num_patches
    }

    pub fn is_empty(&self) -> bool {
        self.num_patches == 0
    }

    /// `[H, W, C]` of a single patch
    pub fn patch_shape(&self) -> [usize; 3] {
        self.patch_shape
    }

    /// Number of completed passes over the data
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Rewinds to the state after `batches` draws from a freshly built dataset
    pub fn seek(&mut self, batches: usize) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.order = (0..self.num_patches).collect();
        self.epoch = 0;
        self.start_epoch();

        let skipped = batches * self.batch_size;
        for _ in 0..skipped / self.num_patches {
            self.epoch += 1;
            self.start_epoch();
        }
        self.position = skipped % self.num_patches;
    }

    fn start_epoch(&mut self) {
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
        self.position = 0;
    }

    fn next_index(&mut self) -> usize {
        if self.position >= self.order.len() {
            self.epoch += 1;
            self.start_epoch();
        }
        let index = self.order[self.position];
        self.position += 1;
        index
    }
}

impl BatchSource for PatchDataset {
    fn next_batch(&mut self) -> Result<Array> {
        let patch_len: usize = self.patch_shape.iter().product();
        let mut batch = Vec::with_capacity(self.batch_size * patch_len);

        for _ in 0..self.batch_size {
            let index = self.next_index();
            let start = index * patch_len;
            batch.extend_from_slice(&self.patches[start..start + patch_len]);
        }

        let [height, width, channels] = self.patch_shape;
        Ok(Array::from_slice(
            &batch,
            &[
                self.batch_size as i32,
                height as i32,
                width as i32,
                channels as i32,
            ],
        ))
    }

    fn resume_at(&mut self, step: usize) -> Result<()> {
        self.seek(step);
        Ok(())
    }
}

/// Stores `[N, H, W, C]` patches in the layout [`PatchDataset::from_file`] reads
pub fn write_patch_file(path: &Path, patches: &[f32], shape: [usize; 4]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = f32_to_le_bytes(patches);
    let view = TensorView::new(Dtype::F32, shape.to_vec(), &bytes)
        .with_context(|| "Failed to create TensorView")?;

    safetensors::serialize_to_file(vec![(PATCHES_TENSOR.to_string(), view)], &None, path)
        .with_context(|| format!("Failed to save patches to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_patches(n: usize) -> Vec<f32> {
        // each 2x2x1 patch is filled with its own index
        (0..n).flat_map(|i| vec![i as f32; 4]).collect()
    }

    fn first_values(batch: &Array) -> Vec<f32> {
        batch
            .as_slice::<f32>()
            .chunks(4)
            .map(|patch| patch[0])
            .collect()
    }

    #[test]
    fn test_batches_wrap_around() {
        let mut dataset = PatchDataset::new(numbered_patches(3), [3, 2, 2, 1], 2, false, 0).unwrap();

        let first = dataset.next_batch().unwrap();
        assert_eq!(first.shape(), &[2, 2, 2, 1]);
        assert_eq!(first_values(&first), vec![0.0, 1.0]);

        let second = dataset.next_batch().unwrap();
        assert_eq!(first_values(&second), vec![2.0, 0.0]);
        assert_eq!(dataset.epoch(), 1);
    }

    #[test]
    fn test_shuffled_epoch_visits_every_patch() {
        let mut dataset = PatchDataset::new(numbered_patches(8), [8, 2, 2, 1], 4, true, 11).unwrap();
        let mut seen: Vec<f32> = (0..2)
            .flat_map(|_| first_values(&dataset.next_batch().unwrap()))
            .collect();
        seen.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(seen, (0..8).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_seek_continues_the_uninterrupted_stream() {
        let mut uninterrupted =
            PatchDataset::new(numbered_patches(5), [5, 2, 2, 1], 2, true, 9).unwrap();
        for _ in 0..7 {
            uninterrupted.next_batch().unwrap();
        }

        let mut resumed = PatchDataset::new(numbered_patches(5), [5, 2, 2, 1], 2, true, 9).unwrap();
        resumed.next_batch().unwrap();
        resumed.seek(7);

        for _ in 0..6 {
            assert_eq!(
                first_values(&resumed.next_batch().unwrap()),
                first_values(&uninterrupted.next_batch().unwrap())
            );
        }
    }

    #[test]
    fn test_patch_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data").join("patches.safetensors");
        write_patch_file(&path, &numbered_patches(5), [5, 2, 2, 1]).unwrap();

        let mut dataset = PatchDataset::from_file(&path, 5, false, 0).unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.patch_shape(), [2, 2, 1]);
        assert_eq!(
            first_values(&dataset.next_batch().unwrap()),
            vec![0.0, 1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        assert!(PatchDataset::new(vec![0.0; 7], [2, 2, 2, 1], 1, false, 0).is_err());
        assert!(PatchDataset::new(vec![], [0, 2, 2, 1], 1, false, 0).is_err());
    }
}
