//! Adversarial training of image denoisers
//!
//! This crate trains a residual denoising network against a critic using
//! MLX for Apple Silicon acceleration. Two formulations are supported:
//!
//! - **GAN**: a discriminator scores images as real or generated, with scores
//!   clamped before every logarithm.
//! - **MMD-GAN**: an encoder/decoder critic; the generator minimizes the kernel
//!   MMD between encoded real and denoised batches while the critic maximizes
//!   it and keeps its embedding invertible.
//!
//! ## Main Components
//!
//! - `losses` / `kernels`: loss formulations and the MMD statistic
//! - `training`: alternating optimizer, objectives and stop handling
//! - `checkpoints`: atomic, per-run safetensors checkpoints
//! - `monitor`: per-step scalar and image records
//! - `model`: generator and critic networks, parameter ownership
//! - `data` / `noise`: patch batches, noise injection and PSNR
//! - `config`: Configuration management

pub mod checkpoints;
pub mod config;
pub mod data;
pub mod kernels;
pub mod losses;
pub mod model;
pub mod monitor;
pub mod noise;
pub mod training;

pub use config::{Config, Variant};
pub use losses::LossRecord;
pub use training::{AdversarialTrainer, StartMode, StopSignal, TrainingSummary};

/// Library errors
pub use anyhow::{Error, Result};
