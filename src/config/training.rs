use serde::{Deserialize, Serialize};

/// Optimization and schedule settings for one adversarial run.
///
/// Every knob the orchestrator reads lives here; nothing is taken from
/// free-standing constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub generator_lr: f32,
    pub critic_lr: f32,
    pub batch_size: usize,
    /// Side length of the square training patches
    pub patch_size: usize,
    pub channels: usize,
    /// Gaussian noise standard deviation in 0-255 intensity units
    pub noise_stddev: f32,
    pub max_steps: usize,
    pub checkpoint_interval: usize,
    pub adam_beta1: f32,
    pub adam_beta2: f32,
    pub adam_epsilon: f32,
    /// Lower bound applied to critic scores before every logarithm
    pub score_clamp_min: f32,
    /// Wall-clock budget; the run stops at the next step boundary once exceeded
    pub max_duration_secs: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            generator_lr: 1e-3,
            critic_lr: 2e-3,
            batch_size: 64,
            patch_size: 64,
            channels: 1,
            noise_stddev: 25.0,
            max_steps: 10_000,
            checkpoint_interval: 10,
            adam_beta1: 0.9,
            adam_beta2: 0.999,
            adam_epsilon: 1e-8,
            score_clamp_min: 1e-9,
            max_duration_secs: None,
        }
    }
}
