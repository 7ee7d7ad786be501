//! Streaming linear-interpolation resampler.
//!
//! Input blocks of any length are accumulated until a full output block of the
//! requested length can be interpolated. `None` means "feed more input", it is
//! not an error.
//!
//! The phase is kept in input-sample units: after each call the consumed span
//! `phase + len / ratio` is split into a whole part (dropped from the
//! accumulator) and a fractional part (the new phase), so rounding never
//! accumulates past one sample.

use log::info;

pub struct StreamingResampler {
    input_rate: u32,
    output_rate: u32,
    /// Output samples per input sample.
    ratio: f64,
    phase: f64,
    accumulator: Vec<f32>,
}

impl StreamingResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        assert!(
            input_rate > 0 && output_rate > 0,
            "sample rates must be > 0"
        );
        let ratio = output_rate as f64 / input_rate as f64;
        info!(
            "Resampler created: {} Hz -> {} Hz (ratio: {:.4})",
            input_rate, output_rate, ratio
        );
        Self {
            input_rate,
            output_rate,
            ratio,
            phase: 0.0,
            accumulator: Vec::new(),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.input_rate == self.output_rate
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Samples waiting in the accumulator.
    pub fn buffered(&self) -> usize {
        self.accumulator.len()
    }

    /// Output samples the accumulator can currently produce.
    fn available(&self) -> usize {
        if self.accumulator.len() < 2 {
            return 0;
        }
        let span = (self.accumulator.len() - 1) as f64 - self.phase;
        (span * self.ratio).floor().max(0.0) as usize
    }

    pub fn process(&mut self, input: &[f32], output_len: usize) -> Option<Vec<f32>> {
        if self.is_identity() {
            return Some(input.to_vec());
        }

        self.accumulator.extend_from_slice(input);
        if output_len == 0 || self.available() < output_len {
            return None;
        }

        let step = 1.0 / self.ratio;
        let mut output = Vec::with_capacity(output_len);
        for i in 0..output_len {
            let src = self.phase + i as f64 * step;
            let idx = src as usize;
            let frac = (src - idx as f64) as f32;
            // available() guarantees idx + 1 is in range
            let a = self.accumulator[idx];
            let b = self.accumulator[idx + 1];
            output.push(a * (1.0 - frac) + b * frac);
        }

        let consumed = self.phase + output_len as f64 * step;
        let whole = consumed.trunc();
        self.phase = consumed - whole;
        let drop = (whole as usize).min(self.accumulator.len());
        self.accumulator.drain(..drop);

        Some(output)
    }

    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.phase = 0.0;
    }
}

/// Exact integer pacing for output request lengths.
///
/// Requests `hop * out / in` samples per call on average without the
/// truncation drift of a fixed per-call length.
#[derive(Clone, Copy, Debug)]
pub struct RatePacer {
    numerator: u64,
    denominator: u64,
    remainder: u64,
}

impl RatePacer {
    pub fn new(block_len: usize, from_rate: u32, to_rate: u32) -> Self {
        Self {
            numerator: block_len as u64 * to_rate as u64,
            denominator: from_rate.max(1) as u64,
            remainder: 0,
        }
    }

    pub fn next_len(&mut self) -> usize {
        let total = self.numerator + self.remainder;
        self.remainder = total % self.denominator;
        (total / self.denominator) as usize
    }

    pub fn reset(&mut self) {
        self.remainder = 0;
    }
}

/// Resampler whose output length follows a `RatePacer`.
///
/// A request that cannot be served yet stays pending, so every emitted block
/// counts toward the paced total exactly once.
pub struct PacedResampler {
    inner: StreamingResampler,
    pacer: RatePacer,
    pending: Option<usize>,
}

impl PacedResampler {
    /// `block_len` is the input length fed per call.
    pub fn new(block_len: usize, input_rate: u32, output_rate: u32) -> Self {
        Self {
            inner: StreamingResampler::new(input_rate, output_rate),
            pacer: RatePacer::new(block_len, input_rate, output_rate),
            pending: None,
        }
    }

    pub fn buffered(&self) -> usize {
        self.inner.buffered()
    }

    pub fn process(&mut self, input: &[f32]) -> Option<Vec<f32>> {
        let len = match self.pending.take() {
            Some(len) => len,
            None => self.pacer.next_len(),
        };
        let out = self.inner.process(input, len);
        if out.is_none() {
            self.pending = Some(len);
        }
        out
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.pacer.reset();
        self.pending = None;
    }
}
