//! Gaussian noise injection and image quality measurement

use crate::losses::mean_squared_error;
use mlx_rs::error::Exception;
use mlx_rs::Array;

/// Largest intensity of the unnormalized image scale
pub const PIXEL_RANGE: f32 = 255.0;

/// Draws `N(mean, stddev^2)` noise of the given shape.
///
/// `mean` and `stddev` are in 0-255 intensity units; pass the result through
/// [`scale`] before adding it to a normalized image.
pub fn gaussian_noise(
    shape: &[i32],
    mean: f32,
    stddev: f32,
    key: Option<&Array>,
) -> Result<Array, Exception> {
    mlx_rs::random::normal::<f32>(shape, mean, stddev, key)
}

/// Maps 0-255 intensity units into the `[0, 1]` image range
pub fn scale(tensor: &Array) -> Result<Array, Exception> {
    tensor.divide(Array::from_f32(PIXEL_RANGE))
}

/// Peak signal-to-noise ratio in dB for images with peak value 1.0
pub fn psnr(reference: &Array, estimate: &Array) -> Result<f32, Exception> {
    let mse: f32 = mean_squared_error(reference, estimate)?.item();
    if mse <= 0.0 {
        return Ok(f32::INFINITY);
    }
    Ok(-10.0 * mse.log10())
}

/// Adds calibrated Gaussian noise to clean batches.
///
/// The PRNG key is derived from the seed and the absolute training step, so a
/// resumed run continues the noise sequence instead of replaying it.
#[derive(Debug, Clone)]
pub struct NoiseInjector {
    stddev: f32,
    seed: u64,
}

impl NoiseInjector {
    pub fn new(stddev: f32, seed: u64) -> Self {
        Self { stddev, seed }
    }

    fn step_key(&self, step: usize) -> u64 {
        // odd multiplier spreads consecutive steps over the key space
        self.seed ^ (step as u64).wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }

    /// Returns `clean + scale(noise)` with the noise of training step `step`
    pub fn apply(&self, clean: &Array, step: usize) -> Result<Array, Exception> {
        let key = mlx_rs::random::key(self.step_key(step))?;
        let noise = gaussian_noise(clean.shape(), 0.0, self.stddev, Some(&key))?;
        clean.add(&scale(&noise)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noise_statistics() {
        let key = mlx_rs::random::key(7).unwrap();
        let noise = gaussian_noise(&[64, 64], 0.0, 25.0, Some(&key)).unwrap();
        let mean: f32 = noise.mean(None).unwrap().item();
        let var: f32 = noise.square().unwrap().mean(None).unwrap().item();
        assert!(mean.abs() < 1.5, "mean {}", mean);
        assert!((var.sqrt() - 25.0).abs() < 1.5, "stddev {}", var.sqrt());
    }

    #[test]
    fn test_noise_depends_on_step() {
        let injector = NoiseInjector::new(25.0, 3);
        let clean = mlx_rs::ops::zeros::<f32>(&[2, 8, 8, 1]).unwrap();

        let first = injector.apply(&clean, 0).unwrap();
        let later = injector.apply(&clean, 50).unwrap();
        let diff: f32 = mean_squared_error(&first, &later).unwrap().item();
        assert!(diff > 0.0);

        // the same step always gets the same noise
        let again = injector.apply(&clean, 50).unwrap();
        let same: f32 = mean_squared_error(&later, &again).unwrap().item();
        assert_eq!(same, 0.0);
    }

    #[test]
    fn test_psnr() {
        let a = Array::from_slice(&[0.5_f32; 16], &[4, 4]);
        assert_eq!(psnr(&a, &a).unwrap(), f32::INFINITY);

        // mse = 0.01 -> 20 dB
        let b = Array::from_slice(&[0.6_f32; 16], &[4, 4]);
        assert!((psnr(&a, &b).unwrap() - 20.0).abs() < 1e-2);
    }
}
