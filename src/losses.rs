//! Adversarial objectives for the generator and the critic
//!
//! Two formulations are provided:
//!
//! - **GAN**: the critic scores images as real (near 1) or generated (near 0).
//!   Scores are clamped into `[clamp_min, 1.0]` before every logarithm so a
//!   saturated critic never produces `log(0)`.
//! - **MMD-GAN**: the critic is an encoder/decoder pair. The generator minimizes
//!   the kernel MMD between encoded real and generated batches; the critic
//!   maximizes it while keeping encode -> decode close to identity, which stops
//!   it from collapsing the embedding.
//!
//! All functions return `mlx_rs` results so they can run inside
//! `value_and_grad` closures.

use crate::kernels::mmd2;
use mlx_rs::error::Exception;
use mlx_rs::Array;
use thiserror::Error;

/// Lower clamp applied to critic scores before taking a logarithm
pub const SCORE_CLAMP_MIN: f32 = 1e-9;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LossError {
    #[error("critic inputs must share a batch size: real batch has {real}, generated batch has {generated}")]
    BatchMismatch { real: i32, generated: i32 },
}

impl From<LossError> for Exception {
    fn from(err: LossError) -> Self {
        Exception::custom(err.to_string())
    }
}

/// Scalar objectives of one training step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossRecord {
    pub generator_loss: f32,
    pub critic_loss: f32,
}

impl LossRecord {
    pub fn is_finite(&self) -> bool {
        self.generator_loss.is_finite() && self.critic_loss.is_finite()
    }
}

/// Fails unless both critic inputs carry the same number of samples
pub fn ensure_same_batch(real: &Array, generated: &Array) -> Result<(), LossError> {
    let real_batch = real.shape().first().copied().unwrap_or(0);
    let generated_batch = generated.shape().first().copied().unwrap_or(0);
    if real_batch != generated_batch {
        return Err(LossError::BatchMismatch {
            real: real_batch,
            generated: generated_batch,
        });
    }
    Ok(())
}

/// `log(clip(x, clamp_min, 1.0))`
pub fn clamped_log(x: &Array, clamp_min: f32) -> Result<Array, Exception> {
    let lower = mlx_rs::ops::maximum(x, Array::from_f32(clamp_min))?;
    let clipped = mlx_rs::ops::minimum(&lower, Array::from_f32(1.0))?;
    clipped.log()
}

/// GAN generator loss: `-mean(log(s_fake))`
pub fn gan_generator_loss(fake_scores: &Array, clamp_min: f32) -> Result<Array, Exception> {
    clamped_log(fake_scores, clamp_min)?
        .mean(None)?
        .multiply(Array::from_f32(-1.0))
}

/// GAN critic loss: `-mean(log(s_real) + log(1 - s_fake))`
pub fn gan_critic_loss(
    real_scores: &Array,
    fake_scores: &Array,
    clamp_min: f32,
) -> Result<Array, Exception> {
    ensure_same_batch(real_scores, fake_scores)?;

    let log_real = clamped_log(real_scores, clamp_min)?;
    let one_minus_fake = Array::from_f32(1.0).subtract(fake_scores)?;
    let log_fake = clamped_log(&one_minus_fake, clamp_min)?;

    log_real
        .add(&log_fake)?
        .mean(None)?
        .multiply(Array::from_f32(-1.0))
}

/// `mean((a - b)^2)` over every element
pub fn mean_squared_error(a: &Array, b: &Array) -> Result<Array, Exception> {
    a.subtract(b)?.square()?.mean(None)
}

/// Encoder/decoder outputs the MMD objectives are built from
pub struct MmdCriticOutputs<'a> {
    /// Real batch `x`
    pub original: &'a Array,
    /// Generated batch `y`
    pub generated: &'a Array,
    pub enc_x: &'a Array,
    pub enc_y: &'a Array,
    pub dec_x: &'a Array,
    pub dec_y: &'a Array,
}

/// The three terms of the MMD critic objective
pub struct MmdTerms {
    pub mmd: Array,
    pub l2_x: Array,
    pub l2_y: Array,
}

impl MmdTerms {
    pub fn compute(outputs: &MmdCriticOutputs<'_>, sigmas: &[f32]) -> Result<Self, Exception> {
        ensure_same_batch(outputs.enc_x, outputs.enc_y)?;

        Ok(Self {
            mmd: mmd2(outputs.enc_x, outputs.enc_y, sigmas)?,
            l2_x: mean_squared_error(outputs.original, outputs.dec_x)?,
            l2_y: mean_squared_error(outputs.generated, outputs.dec_y)?,
        })
    }

    /// `mmd - lambda_x * l2_x - lambda_y * l2_y`
    pub fn total(&self, lambda_x: f32, lambda_y: f32) -> Result<Array, Exception> {
        let penalty_x = self.l2_x.multiply(Array::from_f32(lambda_x))?;
        let penalty_y = self.l2_y.multiply(Array::from_f32(lambda_y))?;
        self.mmd.subtract(&penalty_x)?.subtract(&penalty_y)
    }

    /// The critic maximizes the total, so it minimizes its negation
    pub fn critic_loss(&self, lambda_x: f32, lambda_y: f32) -> Result<Array, Exception> {
        self.total(lambda_x, lambda_y)?
            .multiply(Array::from_f32(-1.0))
    }
}

/// MMD generator loss: the plain MMD between encoded real and generated batches
pub fn mmd_generator_loss(
    enc_x: &Array,
    enc_y: &Array,
    sigmas: &[f32],
) -> Result<Array, Exception> {
    ensure_same_batch(enc_x, enc_y)?;
    mmd2(enc_x, enc_y, sigmas)
}
