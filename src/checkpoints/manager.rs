// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Denoise GAN Project
//
// CheckpointManager persists one named training snapshot per run variant.
// Writes go to a temporary file that is renamed over the target, so an
// interrupted save never damages the previous checkpoint.

use super::mlx_utils::{f32_from_le_bytes, f32_to_le_bytes};
use super::state::{Checkpoint, CheckpointMetadata, FlatTensor, OptimizerState, FORMAT_VERSION};
use crate::config::Variant;
use crate::model::Role;
use anyhow::{Context, Result};
use memmap2::MmapOptions;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;

const METADATA_TENSOR: &str = "_metadata";
const OPTIMIZER_PREFIX: &str = "optimizer.";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckpointError {
    #[error("no checkpoint named '{name}' at {}", path.display())]
    NotFound { name: String, path: PathBuf },
    #[error("checkpoint belongs to the {found} run, expected {expected}")]
    VariantMismatch { expected: Variant, found: Variant },
    #[error("unsupported checkpoint format version {0}")]
    UnsupportedVersion(u32),
    #[error("checkpoint is missing tensor '{0}'")]
    MissingTensor(String),
    #[error("optimizer moment '{name}' is outside the '{scope}' scope")]
    ForeignMoment { scope: String, name: String },
    #[error("tensor '{name}' has shape {found:?} in the checkpoint, model expects {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i32>,
        found: Vec<i32>,
    },
}

/// Metadata and tensor count of a stored checkpoint
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    pub metadata: CheckpointMetadata,
    pub weight_tensors: usize,
    pub optimizer_tensors: usize,
}

/// CheckpointManager manages checkpoint operations
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    checkpoint_dir: PathBuf,
}

impl CheckpointManager {
    /// Creates a new CheckpointManager
    pub fn new(checkpoint_dir: &Path) -> Result<Self> {
        fs::create_dir_all(checkpoint_dir).with_context(|| {
            format!(
                "Failed to create checkpoint directory {}",
                checkpoint_dir.display()
            )
        })?;

        Ok(Self {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.checkpoint_dir.join(format!("{}.safetensors", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Writes `checkpoint` under its name, replacing any previous one
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<PathBuf> {
        checkpoint.validate()?;

        let path = self.path_for(&checkpoint.name);
        let tmp_path = self
            .checkpoint_dir
            .join(format!("{}.safetensors.tmp", checkpoint.name));

        write_checkpoint(&tmp_path, checkpoint).with_context(|| {
            format!("Failed to save checkpoint to {}", tmp_path.display())
        })?;
        fs::rename(&tmp_path, &path).with_context(|| {
            format!(
                "Failed to move {} into place at {}",
                tmp_path.display(),
                path.display()
            )
        })?;

        tracing::debug!("Saved checkpoint '{}' at step {}", checkpoint.name, checkpoint.step);
        Ok(path)
    }

    /// Loads the checkpoint stored under `name`, which must belong to `variant`
    pub fn restore(&self, name: &str, variant: Variant) -> Result<Checkpoint> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(CheckpointError::NotFound {
                name: name.to_string(),
                path,
            }
            .into());
        }

        let checkpoint = read_checkpoint(&path)
            .with_context(|| format!("Failed to load checkpoint from {}", path.display()))?;
        if checkpoint.variant != variant {
            return Err(CheckpointError::VariantMismatch {
                expected: variant,
                found: checkpoint.variant,
            }
            .into());
        }
        Ok(checkpoint)
    }

    /// Reads only the metadata of the checkpoint stored under `name`
    pub fn describe(&self, name: &str) -> Result<CheckpointSummary> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(CheckpointError::NotFound {
                name: name.to_string(),
                path,
            }
            .into());
        }

        let file = File::open(&path)
            .with_context(|| format!("Failed to open file {}", path.display()))?;
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .with_context(|| format!("Failed to map file {}", path.display()))?
        };
        let tensors = SafeTensors::deserialize(&mmap)
            .with_context(|| format!("Failed to deserialize safetensors from {}", path.display()))?;

        let metadata = read_metadata(&tensors)?;
        let names = tensors.names();
        let optimizer_tensors = names
            .iter()
            .filter(|n| n.starts_with(OPTIMIZER_PREFIX))
            .count();
        let weight_tensors = names.len() - optimizer_tensors - 1;

        Ok(CheckpointSummary {
            path,
            metadata,
            weight_tensors,
            optimizer_tensors,
        })
    }
}

fn optimizer_tensor_name(role: Role, moment: &str, param: &str) -> String {
    format!("{}{}.{}.{}", OPTIMIZER_PREFIX, role.as_str(), moment, param)
}

fn write_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    // Byte buffers must outlive the views that borrow them
    let mut buffers: Vec<(String, Vec<usize>, Vec<u8>)> = Vec::new();
    let mut push = |name: String, (data, shape): &FlatTensor| {
        let shape: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        buffers.push((name, shape, f32_to_le_bytes(data)));
    };

    for (name, tensor) in &checkpoint.weights {
        push(name.clone(), tensor);
    }
    for (role, state) in &checkpoint.optimizers {
        for (param, tensor) in &state.exp_avg {
            push(optimizer_tensor_name(*role, "exp_avg", param), tensor);
        }
        for (param, tensor) in &state.exp_avg_sq {
            push(optimizer_tensor_name(*role, "exp_avg_sq", param), tensor);
        }
    }

    let metadata_bytes = serde_json::to_vec(&checkpoint.metadata())?;

    let mut views = Vec::with_capacity(buffers.len() + 1);
    for (name, shape, bytes) in &buffers {
        let view = TensorView::new(Dtype::F32, shape.clone(), bytes)
            .with_context(|| format!("Failed to create TensorView for '{}'", name))?;
        views.push((name.clone(), view));
    }
    views.push((
        METADATA_TENSOR.to_string(),
        TensorView::new(Dtype::U8, vec![metadata_bytes.len()], &metadata_bytes)?,
    ));

    safetensors::serialize_to_file(views, &None, path)
        .with_context(|| format!("Failed to save safetensors to {}", path.display()))?;
    Ok(())
}

fn read_metadata(tensors: &SafeTensors<'_>) -> Result<CheckpointMetadata> {
    let raw = tensors
        .tensor(METADATA_TENSOR)
        .with_context(|| "checkpoint has no _metadata tensor")?;
    let metadata: CheckpointMetadata = serde_json::from_slice(raw.data())
        .with_context(|| "Failed to parse checkpoint metadata")?;
    if metadata.format_version != FORMAT_VERSION {
        return Err(CheckpointError::UnsupportedVersion(metadata.format_version).into());
    }
    Ok(metadata)
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let file = File::open(path).with_context(|| format!("Failed to open file {}", path.display()))?;
    let mmap = unsafe {
        MmapOptions::new()
            .map(&file)
            .with_context(|| format!("Failed to map file {}", path.display()))?
    };
    let tensors = SafeTensors::deserialize(&mmap)
        .with_context(|| format!("Failed to deserialize safetensors from {}", path.display()))?;

    let metadata = read_metadata(&tensors)?;

    let mut weights = BTreeMap::new();
    let mut optimizers: BTreeMap<Role, OptimizerState> = BTreeMap::new();
    for (role, step) in &metadata.optimizer_steps {
        optimizers.entry(*role).or_default().step = *step;
    }

    for (name, tensor) in tensors.tensors() {
        if name == METADATA_TENSOR {
            continue;
        }
        if tensor.dtype() != Dtype::F32 {
            anyhow::bail!("tensor '{}' is {:?}, expected F32", name, tensor.dtype());
        }
        let shape: Vec<i32> = tensor.shape().iter().map(|&d| d as i32).collect();
        let flat = (f32_from_le_bytes(tensor.data()), shape);

        match name.strip_prefix(OPTIMIZER_PREFIX) {
            Some(rest) => {
                let (role, moment, param) = parse_optimizer_name(rest)
                    .with_context(|| format!("malformed optimizer tensor name '{}'", name))?;
                let state = optimizers.entry(role).or_default();
                match moment {
                    "exp_avg" => state.exp_avg.insert(param.to_string(), flat),
                    _ => state.exp_avg_sq.insert(param.to_string(), flat),
                };
            }
            None => {
                weights.insert(name, flat);
            }
        }
    }

    Ok(Checkpoint {
        name: metadata.name,
        variant: metadata.variant,
        step: metadata.step,
        weights,
        optimizers,
        config: metadata.config,
        timestamp: metadata.timestamp,
    })
}

/// Splits `<role>.<moment>.<param>`
fn parse_optimizer_name(rest: &str) -> Option<(Role, &str, &str)> {
    let (role, rest) = rest.split_once('.')?;
    let role = Role::ALL.into_iter().find(|r| r.as_str() == role)?;
    let (moment, param) = rest.split_once('.')?;
    match moment {
        "exp_avg" | "exp_avg_sq" => Some((role, moment, param)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optimizer_name() {
        assert_eq!(
            parse_optimizer_name("critic.exp_avg_sq.critic.d_encoder.proj.weight"),
            Some((Role::Critic, "exp_avg_sq", "critic.d_encoder.proj.weight"))
        );
        assert_eq!(
            parse_optimizer_name("generator.exp_avg.generator.layers.0.bias"),
            Some((Role::Generator, "exp_avg", "generator.layers.0.bias"))
        );
        assert_eq!(parse_optimizer_name("unknown.exp_avg.x"), None);
        assert_eq!(parse_optimizer_name("critic.momentum.x"), None);
    }

    #[test]
    fn test_optimizer_names_round_trip() {
        let name = optimizer_tensor_name(Role::Generator, "exp_avg", "generator.layers.2.weight");
        let rest = name.strip_prefix(OPTIMIZER_PREFIX).unwrap();
        assert_eq!(
            parse_optimizer_name(rest),
            Some((Role::Generator, "exp_avg", "generator.layers.2.weight"))
        );
    }
}
