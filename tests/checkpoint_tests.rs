// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Denoise GAN Project
//
// Tests for checkpoint persistence

use anyhow::Result;
use denoise_gan::checkpoints::{Checkpoint, CheckpointError, CheckpointManager, OptimizerState};
use denoise_gan::config::{Config, Variant};
use denoise_gan::model::Role;
use std::collections::BTreeMap;
use tempfile::TempDir;

/// Values chosen to expose any lossy conversion
fn awkward_values(len: usize, seed: f32) -> Vec<f32> {
    (0..len)
        .map(|i| match i % 5 {
            0 => seed / 3.0,
            1 => -f32::MIN_POSITIVE,
            2 => 1e-9 * i as f32,
            3 => f32::MAX / (i as f32 + 1.0),
            _ => std::f32::consts::PI * seed,
        })
        .collect()
}

fn create_test_checkpoint(name: &str, variant: Variant, step: usize) -> Checkpoint {
    let mut weights = BTreeMap::new();
    weights.insert(
        "generator.layers.0.weight".to_string(),
        (awkward_values(2 * 3 * 3 * 1, 1.0), vec![2, 3, 3, 1]),
    );
    weights.insert(
        "generator.layers.0.bias".to_string(),
        (awkward_values(2, 2.0), vec![2]),
    );
    weights.insert(
        "discriminator.head.weight".to_string(),
        (awkward_values(8, 3.0), vec![1, 8]),
    );

    let mut generator_state = OptimizerState {
        step: 7,
        ..Default::default()
    };
    generator_state.exp_avg.insert(
        "generator.layers.0.bias".to_string(),
        (awkward_values(2, 4.0), vec![2]),
    );
    generator_state.exp_avg_sq.insert(
        "generator.layers.0.bias".to_string(),
        (awkward_values(2, 5.0), vec![2]),
    );
    let critic_state = OptimizerState {
        step: 7,
        ..Default::default()
    };

    let mut optimizers = BTreeMap::new();
    optimizers.insert(Role::Generator, generator_state);
    optimizers.insert(Role::Critic, critic_state);

    Checkpoint::new(
        name,
        variant,
        step,
        weights,
        optimizers,
        Config::for_variant(variant),
    )
}

fn bits(values: &[f32]) -> Vec<u32> {
    values.iter().map(|v| v.to_bits()).collect()
}

#[test]
fn test_checkpoint_round_trip_is_bit_exact() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(&temp_dir.path().join("checkpoints"))?;

    let original = create_test_checkpoint("gan", Variant::Gan, 42);
    let path = manager.save(&original)?;
    assert_eq!(path, manager.path_for("gan"));
    assert!(manager.exists("gan"));

    let restored = manager.restore("gan", Variant::Gan)?;
    assert_eq!(restored.step, 42);
    assert_eq!(restored.variant, Variant::Gan);
    assert_eq!(restored.config, original.config);
    assert_eq!(restored.weights.len(), original.weights.len());
    for (name, (data, shape)) in &original.weights {
        let (restored_data, restored_shape) = &restored.weights[name];
        assert_eq!(restored_shape, shape, "shape of {}", name);
        assert_eq!(bits(restored_data), bits(data), "values of {}", name);
    }
    assert_eq!(restored.optimizers, original.optimizers);
    Ok(())
}

#[test]
fn test_restore_missing_checkpoint_is_not_found() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;

    let err = manager.restore("mmd_gan", Variant::MmdGan).unwrap_err();
    match err.downcast_ref::<CheckpointError>() {
        Some(CheckpointError::NotFound { name, .. }) => assert_eq!(name, "mmd_gan"),
        other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(!manager.exists("mmd_gan"));
    Ok(())
}

#[test]
fn test_runs_are_never_cross_loaded() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;

    // a GAN snapshot stored under the MMD run's name
    manager.save(&create_test_checkpoint("mmd_gan", Variant::Gan, 10))?;

    let err = manager.restore("mmd_gan", Variant::MmdGan).unwrap_err();
    assert_eq!(
        err.downcast_ref::<CheckpointError>(),
        Some(&CheckpointError::VariantMismatch {
            expected: Variant::MmdGan,
            found: Variant::Gan,
        })
    );
    Ok(())
}

#[test]
fn test_overwrite_replaces_previous_checkpoint() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;

    manager.save(&create_test_checkpoint("gan", Variant::Gan, 10))?;
    manager.save(&create_test_checkpoint("gan", Variant::Gan, 20))?;

    assert_eq!(manager.restore("gan", Variant::Gan)?.step, 20);

    let files: Vec<String> = std::fs::read_dir(temp_dir.path())?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(files, vec!["gan.safetensors".to_string()]);
    Ok(())
}

#[test]
fn test_interrupted_write_leaves_previous_checkpoint_intact() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;
    manager.save(&create_test_checkpoint("gan", Variant::Gan, 30))?;

    // what a crash in the middle of the next save leaves behind
    std::fs::write(temp_dir.path().join("gan.safetensors.tmp"), b"\x10\x00garbage")?;

    assert_eq!(manager.restore("gan", Variant::Gan)?.step, 30);

    // and the next save still succeeds
    manager.save(&create_test_checkpoint("gan", Variant::Gan, 40))?;
    assert_eq!(manager.restore("gan", Variant::Gan)?.step, 40);
    assert!(!temp_dir.path().join("gan.safetensors.tmp").exists());
    Ok(())
}

#[test]
fn test_describe_reads_metadata() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;
    manager.save(&create_test_checkpoint("gan", Variant::Gan, 50))?;

    let summary = manager.describe("gan")?;
    assert_eq!(summary.metadata.step, 50);
    assert_eq!(summary.metadata.variant, Variant::Gan);
    assert_eq!(summary.metadata.optimizer_steps[&Role::Generator], 7);
    assert_eq!(summary.weight_tensors, 3);
    assert_eq!(summary.optimizer_tensors, 2);
    Ok(())
}

#[test]
fn test_empty_checkpoint_is_rejected() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let manager = CheckpointManager::new(temp_dir.path())?;
    let checkpoint = Checkpoint::new(
        "gan",
        Variant::Gan,
        0,
        BTreeMap::new(),
        BTreeMap::new(),
        Config::default(),
    );
    assert!(manager.save(&checkpoint).is_err());
    assert!(!manager.exists("gan"));
    Ok(())
}
