//! Lock-free level meters shared between the frame loop and its controller.
//!
//! Floats are stored as raw bits in `AtomicU32` so the loop thread never
//! takes a lock to publish a value.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct LevelMeters {
    input_peak: AtomicU32,
    output_peak: AtomicU32,
    input_rms: AtomicU32,
    speech: AtomicBool,
    blocks: AtomicU64,
}

impl LevelMeters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_input_peak(&self, val: f32) {
        self.input_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_peak(&self, val: f32) {
        self.output_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_input_rms(&self, val: f32) {
        self.input_rms.store(val.to_bits(), Ordering::Relaxed);
    }

    /// Whether the last gated block was classified active.
    pub fn set_speech(&self, active: bool) {
        self.speech.store(active, Ordering::Relaxed);
    }

    pub fn count_block(&self) {
        self.blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_input_peak(&self) -> f32 {
        f32::from_bits(self.input_peak.load(Ordering::Relaxed))
    }

    pub fn get_output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak.load(Ordering::Relaxed))
    }

    pub fn get_input_rms(&self) -> f32 {
        f32::from_bits(self.input_rms.load(Ordering::Relaxed))
    }

    pub fn get_speech(&self) -> bool {
        self.speech.load(Ordering::Relaxed)
    }

    pub fn get_blocks(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.set_input_peak(0.0);
        self.set_output_peak(0.0);
        self.set_input_rms(0.0);
        self.set_speech(false);
        self.blocks.store(0, Ordering::Relaxed);
    }
}
