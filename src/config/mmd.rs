use serde::{Deserialize, Serialize};

/// MMD-GAN critic loss configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmdLossConfig {
    /// Weight of the reconstruction error on real images
    pub lambda_x: f32,

    /// Weight of the reconstruction error on generated images
    pub lambda_y: f32,

    /// Bandwidths of the RBF kernel mixture
    pub kernel_sigmas: Vec<f32>,
}

impl Default for MmdLossConfig {
    fn default() -> Self {
        Self {
            lambda_x: 8.0,
            lambda_y: 8.0,
            kernel_sigmas: vec![1.0],
        }
    }
}
