use crate::dsp::vad::VadStats;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of session counters and derived metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Successful inference calls.
    pub frame_count: u64,
    /// Wall time spent inside successful inference calls.
    pub total_inference_ms: f64,
    pub avg_inference_ms: f64,
    /// Mean inference time over block duration; < 1 is faster than real time.
    pub rtf: f64,
    pub vad_total: u64,
    pub vad_active: u64,
    pub vad_bypassed: u64,
    pub vad_bypass_ratio: f32,
    /// Part of `vad_active` that was only kept open by the hangover.
    pub vad_hangover: u64,
    pub inference_failures: u64,
}

/// Inference timing counters owned by the session.
#[derive(Clone, Copy, Debug, Default)]
pub struct InferenceCounters {
    frames: u64,
    total: Duration,
    failures: u64,
}

impl InferenceCounters {
    pub fn record_success(&mut self, elapsed: Duration) {
        self.frames += 1;
        self.total += elapsed;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn avg_ms(&self) -> f64 {
        if self.frames == 0 {
            0.0
        } else {
            self.total.as_secs_f64() * 1000.0 / self.frames as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn snapshot(&self, vad: VadStats, block_duration_ms: f64) -> ProcessingStats {
        let avg = self.avg_ms();
        ProcessingStats {
            frame_count: self.frames,
            total_inference_ms: self.total.as_secs_f64() * 1000.0,
            avg_inference_ms: avg,
            rtf: if block_duration_ms > 0.0 {
                avg / block_duration_ms
            } else {
                0.0
            },
            vad_total: vad.total,
            vad_active: vad.active,
            vad_bypassed: vad.bypassed,
            vad_bypass_ratio: vad.bypass_ratio(),
            vad_hangover: vad.hangover,
            inference_failures: self.failures,
        }
    }
}
