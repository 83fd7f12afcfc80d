pub mod manager;
pub mod mlx_utils;
pub mod state;

pub use manager::{CheckpointError, CheckpointManager, CheckpointSummary};
pub use state::{Checkpoint, CheckpointMetadata, FlatTensor, OptimizerState, FORMAT_VERSION};
