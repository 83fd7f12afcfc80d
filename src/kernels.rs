//! Kernel two-sample statistic used by the MMD critic

use mlx_rs::error::Exception;
use mlx_rs::Array;

/// Collapse every axis after the batch axis: `[B, ...] -> [B, D]`
fn flatten_samples(x: &Array) -> Result<Array, Exception> {
    let batch = x.shape().first().copied().unwrap_or(1);
    x.reshape(&[batch, -1])
}

/// Pairwise squared euclidean distances between the rows of `a` and `b`
fn squared_distances(a: &Array, b: &Array) -> Result<Array, Exception> {
    let a_norms = a.square()?.sum_axis(1, true)?;
    let b_norms = b.square()?.sum_axis(1, true)?.reshape(&[1, -1])?;
    let cross = a.matmul(&b.transpose_axes(&[1, 0])?)?;

    let distances = a_norms
        .add(&b_norms)?
        .subtract(&cross.multiply(Array::from_f32(2.0))?)?;
    // rounding can push distances of identical rows slightly below zero
    mlx_rs::ops::maximum(&distances, Array::from_f32(0.0))
}

/// Gram matrix of a mixture of RBF kernels, `sum_s exp(-d^2 / (2 s^2))`
pub fn mix_rbf_kernel(a: &Array, b: &Array, sigmas: &[f32]) -> Result<Array, Exception> {
    let distances = squared_distances(a, b)?;

    let mut gram: Option<Array> = None;
    for sigma in sigmas {
        let gamma = 1.0 / (2.0 * sigma * sigma);
        let k = distances.multiply(Array::from_f32(-gamma))?.exp()?;
        gram = Some(match gram {
            Some(acc) => acc.add(&k)?,
            None => k,
        });
    }

    gram.ok_or_else(|| {
        Exception::custom("mix_rbf_kernel needs at least one bandwidth".to_string())
    })
}

/// Biased squared MMD between two batches of features.
///
/// Symmetric, never negative, and exactly zero when `a` and `b` are the same
/// batch: all three gram matrices are then computed by the same operations.
pub fn mmd2(a: &Array, b: &Array, sigmas: &[f32]) -> Result<Array, Exception> {
    let x = flatten_samples(a)?;
    let y = flatten_samples(b)?;

    let k_xx = mix_rbf_kernel(&x, &x, sigmas)?.mean(None)?;
    let k_yy = mix_rbf_kernel(&y, &y, sigmas)?.mean(None)?;
    let k_xy = mix_rbf_kernel(&x, &y, sigmas)?.mean(None)?;

    let statistic = k_xx
        .add(&k_yy)?
        .subtract(&k_xy.multiply(Array::from_f32(2.0))?)?;
    mlx_rs::ops::maximum(&statistic, Array::from_f32(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(values: &[f32], rows: i32) -> Array {
        Array::from_slice(values, &[rows, values.len() as i32 / rows])
    }

    #[test]
    fn test_identical_batches_have_zero_mmd() {
        let a = batch(&[0.1, -0.4, 2.0, 0.3, 1.5, -1.0, 0.0, 0.7], 4);
        let value: f32 = mmd2(&a, &a, &[1.0, 2.0, 4.0]).unwrap().item();
        assert_eq!(value, 0.0);
    }

    #[test]
    fn test_mmd_is_symmetric_and_non_negative() {
        let a = batch(&[0.1, -0.4, 2.0, 0.3, 1.5, -1.0], 3);
        let b = batch(&[1.1, 0.4, -2.0, 0.9, 0.5, 3.0], 3);
        let ab: f32 = mmd2(&a, &b, &[1.0]).unwrap().item();
        let ba: f32 = mmd2(&b, &a, &[1.0]).unwrap().item();
        assert!(ab > 0.0);
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn test_mmd_grows_with_divergence() {
        let a = batch(&[0.0, 0.0, 0.1, 0.1], 2);
        let near = batch(&[0.2, 0.2, 0.3, 0.3], 2);
        let far = batch(&[3.0, 3.0, 3.1, 3.1], 2);
        let near_value: f32 = mmd2(&a, &near, &[1.0]).unwrap().item();
        let far_value: f32 = mmd2(&a, &far, &[1.0]).unwrap().item();
        assert!(far_value > near_value);
    }

    #[test]
    fn test_image_batches_are_flattened() {
        let a = Array::from_slice(&[0.5_f32; 2 * 4 * 4], &[2, 4, 4, 1]);
        let value: f32 = mmd2(&a, &a, &[1.0]).unwrap().item();
        assert_eq!(value, 0.0);
    }
}
