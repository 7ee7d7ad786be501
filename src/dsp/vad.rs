//! Energy Gate (Voice Activity Detection)
//!
//! Decides per block whether the expensive inference path has to run.
//!
//! # Contract
//! - **Source signal**: Model-rate block, before any enhancement.
//! - **Domain**: Linear RMS compared against a threshold converted from dB once
//!   at construction. No log/pow per block.
//! - **Hangover**: After the last loud block, up to `hangover_frames` quiet
//!   blocks still count as speech. Covers stop consonants and short gaps.
//! - **Reset**: Starts from true silence, so the first quiet block after a reset
//!   is already bypassed.

use crate::dsp::utils::{db_to_gain, frame_rms};

/// Cumulative gate counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VadStats {
    pub total: u64,
    /// Loud blocks plus hangover blocks.
    pub active: u64,
    /// Quiet blocks that were only kept active by the hangover.
    pub hangover: u64,
    pub bypassed: u64,
}

impl VadStats {
    pub fn bypass_ratio(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            self.bypassed as f32 / self.total as f32
        }
    }
}

pub struct VoiceActivityDetector {
    threshold_db: f32,
    threshold_lin: f32,
    hangover_frames: u32,
    frames_since_active: u32,
    stats: VadStats,
}

impl VoiceActivityDetector {
    pub fn new(threshold_db: f32, hangover_frames: u32) -> Self {
        Self {
            threshold_db,
            threshold_lin: db_to_gain(threshold_db),
            hangover_frames,
            frames_since_active: hangover_frames.saturating_add(1),
            stats: VadStats::default(),
        }
    }

    /// Build a gate whose hangover covers `hangover_ms` of audio made of
    /// `block_len`-sample blocks at `sample_rate`.
    pub fn with_hangover_ms(
        threshold_db: f32,
        hangover_ms: f32,
        block_len: usize,
        sample_rate: u32,
    ) -> Self {
        Self::new(
            threshold_db,
            hangover_frames_for(hangover_ms, block_len, sample_rate),
        )
    }

    pub fn is_speech(&mut self, block: &[f32]) -> bool {
        debug_assert!(!block.is_empty(), "VAD needs a non-empty block");
        self.stats.total += 1;

        if frame_rms(block) > self.threshold_lin {
            self.frames_since_active = 0;
            self.stats.active += 1;
            return true;
        }

        self.frames_since_active = self.frames_since_active.saturating_add(1);
        if self.frames_since_active <= self.hangover_frames {
            self.stats.active += 1;
            self.stats.hangover += 1;
            true
        } else {
            self.stats.bypassed += 1;
            false
        }
    }

    pub fn stats(&self) -> VadStats {
        self.stats
    }

    pub fn threshold_db(&self) -> f32 {
        self.threshold_db
    }

    pub fn hangover_frames(&self) -> u32 {
        self.hangover_frames
    }

    pub fn reset(&mut self) {
        self.frames_since_active = self.hangover_frames.saturating_add(1);
        self.stats = VadStats::default();
    }
}

pub fn hangover_frames_for(hangover_ms: f32, block_len: usize, sample_rate: u32) -> u32 {
    if block_len == 0 || sample_rate == 0 || hangover_ms <= 0.0 {
        return 0;
    }
    let block_ms = block_len as f32 * 1000.0 / sample_rate as f32;
    (hangover_ms / block_ms).floor() as u32
}
