pub mod patches;

pub use patches::{write_patch_file, PatchDataset, PATCHES_TENSOR};

use mlx_rs::Array;

/// Source of clean training batches.
///
/// Implementations behave as an endless sequence: once the underlying data is
/// exhausted they start over instead of running dry.
pub trait BatchSource {
    /// Next clean batch, `[B, H, W, C]` with values in `[0, 1]`
    fn next_batch(&mut self) -> anyhow::Result<Array>;

    /// Positions the stream where a run that has completed `step` steps left
    /// it, one batch per step. Sources without a replayable order keep their
    /// current position.
    fn resume_at(&mut self, _step: usize) -> anyhow::Result<()> {
        Ok(())
    }
}
