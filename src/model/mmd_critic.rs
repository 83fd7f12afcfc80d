use super::{conv3x3, leaky_relu};
use crate::config::ModelConfig;
use mlx_macros::ModuleParameters as DeriveModuleParameters;
use mlx_rs::error::Exception;
use mlx_rs::module::Module;
use mlx_rs::nn::{Conv2d, Linear};
use mlx_rs::Array;

/// Embeds images into a `[B, embedding_dim]` feature space
#[derive(Debug, Clone, DeriveModuleParameters)]
pub struct Encoder {
    #[param]
    pub convs: Vec<Conv2d>,
    #[param]
    pub proj: Linear,
}

impl Encoder {
    pub fn new(config: &ModelConfig, patch_size: i32, channels: i32) -> Result<Self, Exception> {
        let f = config.critic_features as i32;
        let convs = vec![
            conv3x3(channels, f, 2)?,
            conv3x3(f, 2 * f, 2)?,
            conv3x3(2 * f, 4 * f, 2)?,
        ];
        let side = patch_size / 8;
        let proj = Linear::new(side * side * 4 * f, config.embedding_dim as i32)?;

        Ok(Self { convs, proj })
    }

    pub fn forward(&mut self, images: &Array) -> Result<Array, Exception> {
        let mut hidden = images.clone();
        for conv in self.convs.iter_mut() {
            hidden = leaky_relu(&conv.forward(&hidden)?)?;
        }
        let flat = hidden.reshape(&[images.dim(0), -1])?;
        self.proj.forward(&flat)
    }
}

/// Maps embeddings back to `[B, H, W, C]` images
#[derive(Debug, Clone, DeriveModuleParameters)]
pub struct Decoder {
    #[param]
    pub proj: Linear,
    #[param]
    pub convs: Vec<Conv2d>,
    pub side: i32,
    pub width: i32,
}

impl Decoder {
    pub fn new(config: &ModelConfig, patch_size: i32, channels: i32) -> Result<Self, Exception> {
        let f = config.critic_features as i32;
        let side = patch_size / 8;
        let proj = Linear::new(config.embedding_dim as i32, side * side * 4 * f)?;
        let convs = vec![
            conv3x3(4 * f, 2 * f, 1)?,
            conv3x3(2 * f, f, 1)?,
            conv3x3(f, channels, 1)?,
        ];

        Ok(Self {
            proj,
            convs,
            side,
            width: 4 * f,
        })
    }

    pub fn forward(&mut self, embedding: &Array) -> Result<Array, Exception> {
        let batch = embedding.dim(0);
        let projected = self.proj.forward(embedding)?;
        let mut hidden = mlx_rs::nn::relu(&projected.reshape(&[
            batch, self.side, self.side, self.width,
        ])?)?;

        let last = self.convs.len() - 1;
        for (i, conv) in self.convs.iter_mut().enumerate() {
            hidden = conv.forward(&upsample_nearest(&hidden)?)?;
            if i < last {
                hidden = mlx_rs::nn::relu(&hidden)?;
            }
        }
        mlx_rs::ops::sigmoid(&hidden)
    }
}

/// Doubles height and width of an NHWC batch by repeating pixels
fn upsample_nearest(x: &Array) -> Result<Array, Exception> {
    let (b, h, w, c) = (x.dim(0), x.dim(1), x.dim(2), x.dim(3));
    let expanded = x.reshape(&[b, h, 1, w, 1, c])?;
    let tiled = mlx_rs::ops::broadcast_to(&expanded, &[b, h, 2, w, 2, c])?;
    tiled.reshape(&[b, 2 * h, 2 * w, c])
}

/// MMD-GAN critic: an encoder and a decoder trained together
#[derive(Debug, Clone, DeriveModuleParameters)]
pub struct MmdCritic {
    #[param]
    pub d_encoder: Encoder,
    #[param]
    pub d_decoder: Decoder,
}

impl MmdCritic {
    pub fn new(config: &ModelConfig, patch_size: i32, channels: i32) -> Result<Self, Exception> {
        Ok(Self {
            d_encoder: Encoder::new(config, patch_size, channels)?,
            d_decoder: Decoder::new(config, patch_size, channels)?,
        })
    }

    pub fn encode(&mut self, images: &Array) -> Result<Array, Exception> {
        self.d_encoder.forward(images)
    }

    pub fn decode(&mut self, embedding: &Array) -> Result<Array, Exception> {
        self.d_decoder.forward(embedding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_shapes() {
        let mut critic = MmdCritic::new(&ModelConfig::tiny(), 16, 1).unwrap();
        let images = mlx_rs::ops::zeros::<f32>(&[2, 16, 16, 1]).unwrap();
        let embedding = critic.encode(&images).unwrap();
        assert_eq!(embedding.shape(), &[2, 8]);
        let reconstruction = critic.decode(&embedding).unwrap();
        assert_eq!(reconstruction.shape(), &[2, 16, 16, 1]);
    }

    #[test]
    fn test_upsample_repeats_pixels() {
        let x = Array::from_slice(&[1.0_f32, 2.0, 3.0, 4.0], &[1, 2, 2, 1]);
        let up = upsample_nearest(&x).unwrap();
        assert_eq!(up.shape(), &[1, 4, 4, 1]);
        assert_eq!(
            up.as_slice::<f32>(),
            &[
                1.0, 1.0, 2.0, 2.0, //
                1.0, 1.0, 2.0, 2.0, //
                3.0, 3.0, 4.0, 4.0, //
                3.0, 3.0, 4.0, 4.0,
            ]
        );
    }
}
