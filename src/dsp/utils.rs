use std::f32::consts::PI;

/// Floor used when converting a silent level to dB.
pub const DB_FLOOR: f32 = -100.0;

pub fn db_to_gain(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

pub fn gain_to_db(gain: f32) -> f32 {
    if gain > 1e-10 {
        20.0 * gain.log10()
    } else {
        DB_FLOOR
    }
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

pub fn frame_peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |m, &v| m.max(v.abs()))
}

pub fn frame_mean(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().sum::<f32>() / x.len() as f32
}

/// Periodic square-root Hann window.
///
/// Squared and overlap-added at a hop of `len / 2` the window sums to exactly one,
/// which is what makes analysis followed by synthesis transparent.
pub fn make_sqrt_hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let hann = 0.5 * (1.0 - (2.0 * PI * i as f32 / len as f32).cos());
            hann.sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_roundtrip() {
        let g = db_to_gain(-40.0);
        assert!((g - 0.01).abs() < 1e-6);
        assert!((gain_to_db(g) + 40.0).abs() < 1e-3);
        assert_eq!(gain_to_db(0.0), DB_FLOOR);
    }

    #[test]
    fn test_sqrt_hann_power_complementary() {
        let n = 512;
        let w = make_sqrt_hann_window(n);
        for i in 0..n / 2 {
            let sum = w[i] * w[i] + w[i + n / 2] * w[i + n / 2];
            assert!((sum - 1.0).abs() < 1e-5, "index {} sums to {}", i, sum);
        }
    }

    #[test]
    fn test_frame_stats() {
        let x = [0.5, -0.5, 0.5, -0.5];
        assert!((frame_rms(&x) - 0.5).abs() < 1e-6);
        assert_eq!(frame_peak(&x), 0.5);
        assert_eq!(frame_mean(&x), 0.0);
        assert_eq!(frame_rms(&[]), 0.0);
    }
}
