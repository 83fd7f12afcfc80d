//! Checkpoint state container

use crate::config::{Config, Variant};
use crate::model::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version written into every checkpoint's metadata
pub const FORMAT_VERSION: u32 = 1;

/// Row-major values and shape of one tensor
pub type FlatTensor = (Vec<f32>, Vec<i32>);

/// Adam moments of one parameter partition, keyed by qualified parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerState {
    pub exp_avg: BTreeMap<String, FlatTensor>,
    pub exp_avg_sq: BTreeMap<String, FlatTensor>,
    /// Number of updates applied so far (drives bias correction)
    pub step: usize,
}

/// JSON stored in the `_metadata` tensor of a checkpoint file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub name: String,
    pub variant: Variant,
    pub step: usize,
    pub optimizer_steps: BTreeMap<Role, usize>,
    pub timestamp: f64,
    pub config: Config,
}

/// Complete training state snapshot
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub name: String,
    pub variant: Variant,
    pub step: usize,
    /// Every trainable parameter of both partitions
    pub weights: BTreeMap<String, FlatTensor>,
    pub optimizers: BTreeMap<Role, OptimizerState>,
    pub config: Config,
    pub timestamp: f64,
}

impl Checkpoint {
    pub fn new(
        name: impl Into<String>,
        variant: Variant,
        step: usize,
        weights: BTreeMap<String, FlatTensor>,
        optimizers: BTreeMap<Role, OptimizerState>,
        config: Config,
    ) -> Self {
        Self {
            name: name.into(),
            variant,
            step,
            weights,
            optimizers,
            config,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        }
    }

    pub fn metadata(&self) -> CheckpointMetadata {
        CheckpointMetadata {
            format_version: FORMAT_VERSION,
            name: self.name.clone(),
            variant: self.variant,
            step: self.step,
            optimizer_steps: self
                .optimizers
                .iter()
                .map(|(role, state)| (*role, state.step))
                .collect(),
            timestamp: self.timestamp,
            config: self.config.clone(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.weights.is_empty() {
            anyhow::bail!("checkpoint '{}' holds no weights", self.name);
        }
        for (name, (data, shape)) in &self.weights {
            let expected: i64 = shape.iter().map(|&d| d as i64).product();
            if expected != data.len() as i64 {
                anyhow::bail!(
                    "tensor '{}' has {} values but shape {:?}",
                    name,
                    data.len(),
                    shape
                );
            }
        }
        Ok(())
    }
}
