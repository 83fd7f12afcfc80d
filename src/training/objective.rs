//! The two adversarial formulations behind a common interface.
//!
//! An objective owns the critic network and knows how to score the generator
//! against it. The trainer drives both through [`AdversarialObjective`] and
//! never looks inside.

use crate::config::{Config, Variant};
use crate::losses::{
    gan_critic_loss, gan_generator_loss, mmd_generator_loss, MmdCriticOutputs, MmdTerms,
};
use crate::model::{Discriminator, Generator, MmdCritic};
use mlx_rs::error::Exception;
use mlx_rs::module::{FlattenedModuleParam, ModuleParameters};
use mlx_rs::Array;

pub trait AdversarialObjective {
    type Critic: ModuleParameters;

    fn variant(&self) -> Variant;

    /// Scope the critic's parameters are registered and stored under
    fn critic_scope(&self) -> &'static str;

    fn critic(&self) -> &Self::Critic;

    fn critic_mut(&mut self) -> &mut Self::Critic;

    /// Critic loss for a real batch and a fixed generated batch, with its
    /// gradients w.r.t. the critic's parameters
    fn critic_value_and_grad(
        &mut self,
        original: &Array,
        generated: &Array,
    ) -> Result<(Array, FlattenedModuleParam), Exception>;

    /// Generator loss of an already denoised batch, scored by the current critic
    fn generator_loss(&mut self, original: &Array, denoised: &Array) -> Result<Array, Exception>;

    /// Generator loss with its gradients w.r.t. the generator's parameters only
    fn generator_value_and_grad(
        &mut self,
        generator: &mut Generator,
        original: &Array,
        noisy: &Array,
    ) -> Result<(Array, FlattenedModuleParam), Exception>
    where
        Self: Sized,
    {
        let loss_fn = |g: &mut Generator,
                       (original, noisy): (&Array, &Array)|
         -> Result<Array, Exception> {
            let denoised = g.forward(noisy)?;
            self.generator_loss(original, &denoised)
        };
        let mut vg = mlx_rs::nn::value_and_grad(loss_fn);
        vg(generator, (original, noisy))
    }
}

/// Binary real/fake critic with clamped log-likelihood losses
pub struct GanObjective {
    pub discriminator: Discriminator,
    clamp_min: f32,
}

impl GanObjective {
    pub fn new(discriminator: Discriminator, clamp_min: f32) -> Self {
        Self {
            discriminator,
            clamp_min,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let training = &config.training;
        let discriminator = Discriminator::new(
            &config.model,
            training.patch_size as i32,
            training.channels as i32,
        )?;
        Ok(Self::new(discriminator, training.score_clamp_min))
    }
}

impl AdversarialObjective for GanObjective {
    type Critic = Discriminator;

    fn variant(&self) -> Variant {
        Variant::Gan
    }

    fn critic_scope(&self) -> &'static str {
        "discriminator"
    }

    fn critic(&self) -> &Discriminator {
        &self.discriminator
    }

    fn critic_mut(&mut self) -> &mut Discriminator {
        &mut self.discriminator
    }

    fn critic_value_and_grad(
        &mut self,
        original: &Array,
        generated: &Array,
    ) -> Result<(Array, FlattenedModuleParam), Exception> {
        let clamp_min = self.clamp_min;
        let loss_fn = move |critic: &mut Discriminator,
                            (original, generated): (&Array, &Array)|
              -> Result<Array, Exception> {
            let real_scores = critic.forward(original)?;
            let fake_scores = critic.forward(generated)?;
            gan_critic_loss(&real_scores, &fake_scores, clamp_min)
        };
        let mut vg = mlx_rs::nn::value_and_grad(loss_fn);
        vg(&mut self.discriminator, (original, generated))
    }

    fn generator_loss(&mut self, _original: &Array, denoised: &Array) -> Result<Array, Exception> {
        let fake_scores = self.discriminator.forward(denoised)?;
        gan_generator_loss(&fake_scores, self.clamp_min)
    }
}

/// Kernel MMD critic regularized to reconstruct its inputs
pub struct MmdObjective {
    pub critic: MmdCritic,
    lambda_x: f32,
    lambda_y: f32,
    sigmas: Vec<f32>,
}

impl MmdObjective {
    pub fn new(critic: MmdCritic, lambda_x: f32, lambda_y: f32, sigmas: Vec<f32>) -> Self {
        Self {
            critic,
            lambda_x,
            lambda_y,
            sigmas,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, Exception> {
        let training = &config.training;
        let critic = MmdCritic::new(
            &config.model,
            training.patch_size as i32,
            training.channels as i32,
        )?;
        Ok(Self::new(
            critic,
            config.mmd.lambda_x,
            config.mmd.lambda_y,
            config.mmd.kernel_sigmas.clone(),
        ))
    }
}

impl AdversarialObjective for MmdObjective {
    type Critic = MmdCritic;

    fn variant(&self) -> Variant {
        Variant::MmdGan
    }

    fn critic_scope(&self) -> &'static str {
        "critic"
    }

    fn critic(&self) -> &MmdCritic {
        &self.critic
    }

    fn critic_mut(&mut self) -> &mut MmdCritic {
        &mut self.critic
    }

    fn critic_value_and_grad(
        &mut self,
        original: &Array,
        generated: &Array,
    ) -> Result<(Array, FlattenedModuleParam), Exception> {
        let (lambda_x, lambda_y) = (self.lambda_x, self.lambda_y);
        let sigmas = self.sigmas.clone();
        let loss_fn = move |critic: &mut MmdCritic,
                            (original, generated): (&Array, &Array)|
              -> Result<Array, Exception> {
            let enc_x = critic.encode(original)?;
            let enc_y = critic.encode(generated)?;
            let dec_x = critic.decode(&enc_x)?;
            let dec_y = critic.decode(&enc_y)?;

            let outputs = MmdCriticOutputs {
                original,
                generated,
                enc_x: &enc_x,
                enc_y: &enc_y,
                dec_x: &dec_x,
                dec_y: &dec_y,
            };
            MmdTerms::compute(&outputs, &sigmas)?.critic_loss(lambda_x, lambda_y)
        };
        let mut vg = mlx_rs::nn::value_and_grad(loss_fn);
        vg(&mut self.critic, (original, generated))
    }

    fn generator_loss(&mut self, original: &Array, denoised: &Array) -> Result<Array, Exception> {
        let enc_x = self.critic.encode(original)?;
        let enc_y = self.critic.encode(denoised)?;
        mmd_generator_loss(&enc_x, &enc_y, &self.sigmas)
    }
}
