use super::{conv3x3, leaky_relu};
use crate::config::ModelConfig;
use mlx_macros::ModuleParameters as DeriveModuleParameters;
use mlx_rs::error::Exception;
use mlx_rs::module::Module;
use mlx_rs::nn::{Conv2d, Linear};
use mlx_rs::Array;

/// GAN critic: scores each image of a batch as real (near 1) or generated (near 0)
#[derive(Debug, Clone, DeriveModuleParameters)]
pub struct Discriminator {
    #[param]
    pub convs: Vec<Conv2d>,
    #[param]
    pub head: Linear,
}

impl Discriminator {
    pub fn new(config: &ModelConfig, patch_size: i32, channels: i32) -> Result<Self, Exception> {
        let f = config.critic_features as i32;
        let convs = vec![
            conv3x3(channels, f, 2)?,
            conv3x3(f, 2 * f, 2)?,
            conv3x3(2 * f, 4 * f, 2)?,
        ];
        let side = patch_size / 8;
        let head = Linear::new(side * side * 4 * f, 1)?;

        Ok(Self { convs, head })
    }

    /// Scores in `(0, 1)`, shape `[B, 1]`
    pub fn forward(&mut self, images: &Array) -> Result<Array, Exception> {
        let mut hidden = images.clone();
        for conv in self.convs.iter_mut() {
            hidden = leaky_relu(&conv.forward(&hidden)?)?;
        }
        let flat = hidden.reshape(&[images.dim(0), -1])?;
        let logits = self.head.forward(&flat)?;
        mlx_rs::ops::sigmoid(&logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_are_probabilities() {
        let mut critic = Discriminator::new(&ModelConfig::tiny(), 16, 1).unwrap();
        let values: Vec<f32> = (0..3 * 16 * 16).map(|i| (i % 17) as f32 / 17.0).collect();
        let images = Array::from_slice(&values, &[3, 16, 16, 1]);
        let scores = critic.forward(&images).unwrap();
        assert_eq!(scores.shape(), &[3, 1]);
        assert!(scores.as_slice::<f32>().iter().all(|s| *s > 0.0 && *s < 1.0));
    }
}
