//! Output Safety Stage
//!
//! # Contract
//! - **Target Source**: Every block leaving the session, enhanced or bypassed.
//! - **Intended Effect**: Keep the block inside full scale without audible pumping.
//! - **Order**: Soft limit -> clip -> DC removal.
//! - **Will Not Do**:
//!   - Carry state between blocks (no envelopes, no lookahead).

use crate::dsp::utils::{frame_mean, frame_peak};

pub const DEFAULT_LIMITER_THRESHOLD: f32 = 0.98;
const CLIP_MIN: f32 = -1.0;
const CLIP_MAX: f32 = 1.0;

#[derive(Clone, Copy, Debug)]
pub struct PostProcessor {
    limiter_threshold: f32,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_LIMITER_THRESHOLD)
    }
}

impl PostProcessor {
    pub fn new(limiter_threshold: f32) -> Self {
        Self {
            limiter_threshold: limiter_threshold.clamp(1e-6, CLIP_MAX),
        }
    }

    pub fn limiter_threshold(&self) -> f32 {
        self.limiter_threshold
    }

    pub fn process(&self, block: &mut [f32]) {
        if block.is_empty() {
            return;
        }

        let peak = frame_peak(block);
        if peak > self.limiter_threshold {
            let scale = self.limiter_threshold / peak;
            block.iter_mut().for_each(|s| *s *= scale);
        }

        block
            .iter_mut()
            .for_each(|s| *s = s.clamp(CLIP_MIN, CLIP_MAX));

        let mean = frame_mean(block);
        block.iter_mut().for_each(|s| *s -= mean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limiter_scales_to_threshold() {
        let post = PostProcessor::default();
        let mut block = vec![2.0, -2.0, 1.0, -1.0];
        post.process(&mut block);
        assert!((block[0] - 0.98).abs() < 1e-6);
        assert!((block[1] + 0.98).abs() < 1e-6);
        assert!((block[2] - 0.49).abs() < 1e-6);
    }

    #[test]
    fn test_dc_removed() {
        let post = PostProcessor::default();
        let mut block = vec![0.3, 0.1, 0.3, 0.1];
        post.process(&mut block);
        let mean: f32 = block.iter().sum::<f32>() / block.len() as f32;
        assert!(mean.abs() < 1e-7);
        assert!((block[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_idempotent_on_clean_block() {
        let post = PostProcessor::default();
        let mut once: Vec<f32> = (0..480)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * i as f32 / 48.0).sin())
            .collect();
        post.process(&mut once);
        let mut twice = once.clone();
        post.process(&mut twice);
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_empty_block_is_noop() {
        let post = PostProcessor::default();
        let mut block: Vec<f32> = Vec::new();
        post.process(&mut block);
        assert!(block.is_empty());
    }
}
