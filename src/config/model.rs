use serde::{Deserialize, Serialize};

/// Sizes of the generator and critic networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Number of conv layers in the generator, including input and output layers
    pub generator_depth: usize,
    pub generator_features: usize,
    /// Width of the first critic conv layer; doubled at each downsampling stage
    pub critic_features: usize,
    /// Size of the MMD critic's encoded feature vector
    pub embedding_dim: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            generator_depth: 8,
            generator_features: 64,
            critic_features: 32,
            embedding_dim: 64,
        }
    }
}

impl ModelConfig {
    /// Small networks for smoke runs and tests
    pub fn tiny() -> Self {
        Self {
            generator_depth: 3,
            generator_features: 4,
            critic_features: 4,
            embedding_dim: 8,
        }
    }
}
