// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Denoise GAN Project
//
// Utility functions for converting between MLX Array and flat representations

use mlx_rs::Array;

/// Converts an MLX Array to a flat representation (data + shape)
/// This is useful for serialization and checkpointing
pub fn to_flat(array: &Array) -> Result<(Vec<f32>, Vec<i32>), mlx_rs::error::Exception> {
    array.eval()?;
    let data = array.as_slice::<f32>().to_vec();
    let shape = array.shape().to_vec();
    Ok((data, shape))
}

/// Converts flat data and shape back to an MLX Array
pub fn from_flat(data: &[f32], shape: &[i32]) -> Array {
    Array::from_slice(data, shape)
}

/// Little-endian bytes of an f32 slice, the byte order safetensors stores
pub fn f32_to_le_bytes(data: &[f32]) -> Vec<u8> {
    data.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decodes little-endian f32 values; works on unaligned buffers
pub fn f32_from_le_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_conversion_is_bit_exact() {
        let values = vec![0.0_f32, -1.5, f32::MIN_POSITIVE, 1e-9, 12345.678];
        let decoded = f32_from_le_bytes(&f32_to_le_bytes(&values));
        assert_eq!(
            decoded.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            values.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }
}
