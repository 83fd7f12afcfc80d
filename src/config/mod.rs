pub mod mmd;
pub mod model;
pub mod monitor;
pub mod paths;
pub mod training;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub use mmd::MmdLossConfig;
pub use model::ModelConfig;
pub use monitor::MonitorConfig;
pub use paths::PathConfig;
pub use training::TrainingConfig;

/// Which adversarial formulation a run trains with.
///
/// Each variant has its own checkpoint identity and monitoring directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// Binary real/fake discriminator
    Gan,
    /// Kernel MMD critic with an auto-encoding regularizer
    MmdGan,
}

impl Variant {
    /// Logical checkpoint name of the run
    pub fn run_name(&self) -> &'static str {
        match self {
            Variant::Gan => "gan",
            Variant::MmdGan => "mmd_gan",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.run_name())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{name} must be positive, got {value}")]
    NotPositive { name: &'static str, value: f32 },

    #[error("patch_size must be divisible by 8, got {0}")]
    PatchSize(usize),

    #[error("model.generator_depth must be at least 2, got {0}")]
    GeneratorDepth(usize),

    #[error("training.score_clamp_min must be below 1.0, got {0}")]
    ClampRange(f32),

    #[error("mmd.kernel_sigmas must not be empty")]
    NoKernelSigmas,
}

/// Main configuration for adversarial denoising training.
///
/// Fields missing from a serialized config take the defaults of its
/// `variant` (see [`Config::for_variant`]), not the GAN defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct Config {
    pub variant: Variant,
    pub training: TrainingConfig,
    pub model: ModelConfig,
    pub mmd: MmdLossConfig,
    pub paths: PathConfig,
    pub monitor: MonitorConfig,
    pub seed: u64,
}

/// Wire layout of [`Config`] once the variant defaults are filled in
#[derive(Deserialize)]
struct ConfigFields {
    variant: Variant,
    training: TrainingConfig,
    model: ModelConfig,
    mmd: MmdLossConfig,
    paths: PathConfig,
    monitor: MonitorConfig,
    seed: u64,
}

impl TryFrom<Value> for Config {
    type Error = serde_json::Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let variant: Variant = match value.get("variant") {
            Some(variant) => serde_json::from_value(variant.clone())?,
            None => return Err(serde::de::Error::missing_field("variant")),
        };

        let mut merged = serde_json::to_value(Config::for_variant(variant))?;
        overlay(&mut merged, value);
        let fields: ConfigFields = serde_json::from_value(merged)?;

        Ok(Self {
            variant: fields.variant,
            training: fields.training,
            model: fields.model,
            mmd: fields.mmd,
            paths: fields.paths,
            monitor: fields.monitor,
            seed: fields.seed,
        })
    }
}

/// Recursively writes the fields of `patch` over `base`
fn overlay(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                match base.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn default_seed() -> u64 {
    42
}

impl Default for Config {
    fn default() -> Self {
        Self::for_variant(Variant::Gan)
    }
}

impl Config {
    /// Per-variant defaults: learning rates, batch size and MMD weights
    pub fn for_variant(variant: Variant) -> Self {
        let training = match variant {
            Variant::Gan => TrainingConfig::default(),
            Variant::MmdGan => TrainingConfig {
                critic_lr: 1e-3,
                ..TrainingConfig::default()
            },
        };

        Self {
            variant,
            training,
            model: ModelConfig::default(),
            mmd: MmdLossConfig::default(),
            paths: PathConfig::default(),
            monitor: MonitorConfig::default(),
            seed: default_seed(),
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.training;
        for (name, value) in [
            ("training.batch_size", t.batch_size),
            ("training.patch_size", t.patch_size),
            ("training.channels", t.channels),
            ("training.max_steps", t.max_steps),
            ("training.checkpoint_interval", t.checkpoint_interval),
            ("model.generator_features", self.model.generator_features),
            ("model.critic_features", self.model.critic_features),
            ("model.embedding_dim", self.model.embedding_dim),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.model.generator_depth < 2 {
            return Err(ConfigError::GeneratorDepth(self.model.generator_depth));
        }
        if t.patch_size % 8 != 0 {
            return Err(ConfigError::PatchSize(t.patch_size));
        }

        for (name, value) in [
            ("training.generator_lr", t.generator_lr),
            ("training.critic_lr", t.critic_lr),
            ("training.noise_stddev", t.noise_stddev),
            ("training.score_clamp_min", t.score_clamp_min),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }

        if t.score_clamp_min >= 1.0 {
            return Err(ConfigError::ClampRange(t.score_clamp_min));
        }

        if self.mmd.kernel_sigmas.is_empty() {
            return Err(ConfigError::NoKernelSigmas);
        }
        if let Some(&value) = self.mmd.kernel_sigmas.iter().find(|s| !(**s > 0.0)) {
            return Err(ConfigError::NotPositive {
                name: "mmd.kernel_sigmas",
                value,
            });
        }

        Ok(())
    }
}
