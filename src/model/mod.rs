pub mod discriminator;
pub mod generator;
pub mod mmd_critic;
pub mod params;

pub use discriminator::Discriminator;
pub use generator::Generator;
pub use mmd_critic::{Decoder, Encoder, MmdCritic};
pub use params::{ParamRegistry, Partition, PartitionError, Role};

use mlx_rs::builder::Builder;
use mlx_rs::error::Exception;
use mlx_rs::nn::{Conv2d, Conv2dBuilder};
use mlx_rs::Array;

/// Negative slope of the critics' leaky ReLU
pub const LEAKY_SLOPE: f32 = 0.2;

/// 3x3 convolution, padded so stride 1 keeps the spatial size and stride 2 halves it
pub(crate) fn conv3x3(input: i32, output: i32, stride: i32) -> Result<Conv2d, Exception> {
    Conv2dBuilder::new(input, output, 3)
        .stride(stride)
        .padding(1)
        .build()
}

pub(crate) fn leaky_relu(x: &Array) -> Result<Array, Exception> {
    mlx_rs::ops::maximum(x, &x.multiply(Array::from_f32(LEAKY_SLOPE))?)
}
