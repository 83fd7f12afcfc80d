use denoise_gan::kernels::mmd2;
use denoise_gan::losses::{gan_critic_loss, gan_generator_loss, SCORE_CLAMP_MIN};
use mlx_rs::Array;

/// Every score in [0, 1] on a grid, including both endpoints
fn score_grid() -> Vec<f32> {
    (0..=100).map(|i| i as f32 / 100.0).collect()
}

#[test]
fn test_gan_losses_are_finite_on_closed_unit_interval() {
    let grid = score_grid();
    let n = grid.len() as i32;

    for &real in &[0.0_f32, 0.5, 1.0] {
        let real_scores = Array::from_slice(&vec![real; grid.len()], &[n, 1]);
        let fake_scores = Array::from_slice(&grid, &[n, 1]);

        let critic: f32 = gan_critic_loss(&real_scores, &fake_scores, SCORE_CLAMP_MIN)
            .unwrap()
            .item();
        let generator: f32 = gan_generator_loss(&fake_scores, SCORE_CLAMP_MIN)
            .unwrap()
            .item();
        assert!(critic.is_finite(), "critic loss {} for real={}", critic, real);
        assert!(generator.is_finite(), "generator loss {}", generator);
    }

    // each extreme on its own
    for &s in &[0.0_f32, 1.0] {
        let scores = Array::from_slice(&[s; 4], &[4, 1]);
        let critic: f32 = gan_critic_loss(&scores, &scores, SCORE_CLAMP_MIN)
            .unwrap()
            .item();
        let generator: f32 = gan_generator_loss(&scores, SCORE_CLAMP_MIN).unwrap().item();
        assert!(critic.is_finite() && critic >= 0.0);
        assert!(generator.is_finite() && generator >= 0.0);
    }
}

#[test]
fn test_mmd_identity_and_non_negativity() {
    let a: Vec<f32> = (0..64 * 16).map(|i| ((i * 37) % 101) as f32 / 101.0).collect();
    let b: Vec<f32> = (0..64 * 16).map(|i| ((i * 53) % 89) as f32 / 89.0).collect();
    let a = Array::from_slice(&a, &[64, 16]);
    let b = Array::from_slice(&b, &[64, 16]);

    let same: f32 = mmd2(&a, &a, &[1.0]).unwrap().item();
    assert_eq!(same, 0.0);

    for sigmas in [vec![1.0_f32], vec![0.5, 2.0, 8.0]] {
        let value: f32 = mmd2(&a, &b, &sigmas).unwrap().item();
        assert!(value >= 0.0);
    }
}
