use super::conv3x3;
use crate::config::ModelConfig;
use mlx_macros::ModuleParameters as DeriveModuleParameters;
use mlx_rs::error::Exception;
use mlx_rs::module::Module;
use mlx_rs::nn::Conv2d;
use mlx_rs::Array;

/// Residual denoiser in the style of DnCNN (Zhang et al.).
///
/// The conv stack estimates the noise in its input; the denoised estimate is
/// `noisy - estimated_noise`. Spatial size is preserved throughout.
#[derive(Debug, Clone, DeriveModuleParameters)]
pub struct Generator {
    #[param]
    pub layers: Vec<Conv2d>,
}

impl Generator {
    pub fn new(config: &ModelConfig, channels: i32) -> Result<Self, Exception> {
        let features = config.generator_features as i32;
        let depth = config.generator_depth.max(2);

        let mut layers = Vec::with_capacity(depth);
        layers.push(conv3x3(channels, features, 1)?);
        for _ in 0..depth - 2 {
            layers.push(conv3x3(features, features, 1)?);
        }
        layers.push(conv3x3(features, channels, 1)?);

        Ok(Self { layers })
    }

    /// Estimated noise of a `[B, H, W, C]` batch
    pub fn residual(&mut self, noisy: &Array) -> Result<Array, Exception> {
        let last = self.layers.len() - 1;
        let mut hidden = noisy.clone();
        for (i, layer) in self.layers.iter_mut().enumerate() {
            hidden = layer.forward(&hidden)?;
            if i < last {
                hidden = mlx_rs::nn::relu(&hidden)?;
            }
        }
        Ok(hidden)
    }

    /// Denoised estimate of a `[B, H, W, C]` batch
    pub fn forward(&mut self, noisy: &Array) -> Result<Array, Exception> {
        let residual = self.residual(noisy)?;
        noisy.subtract(&residual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_matches_input_shape() {
        let mut generator = Generator::new(&ModelConfig::tiny(), 1).unwrap();
        let noisy = mlx_rs::ops::zeros::<f32>(&[2, 16, 16, 1]).unwrap();
        let denoised = generator.forward(&noisy).unwrap();
        assert_eq!(denoised.shape(), &[2, 16, 16, 1]);
        assert_eq!(generator.layers.len(), 3);
    }
}
