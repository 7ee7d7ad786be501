//! Streaming STFT / iSTFT with overlap-add reconstruction.
//!
//! # Design Notes
//! - One hop of new audio per call, transform size fixed at construction
//! - Periodic sqrt-Hann analysis and synthesis windows, hop = size / 2
//! - Only the non-redundant `size / 2 + 1` bins cross the API
//! - One hop of latency on every path, including frames that skip the model
//! - No allocations in `analyze()` apart from the returned spectrum

use crate::dsp::utils::make_sqrt_hann_window;
use crate::model::Spectrum;
use log::info;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

pub struct SpectralEngine {
    fft_size: usize,
    hop_size: usize,
    bins: usize,

    fft_fwd: Arc<dyn Fft<f32>>,
    fft_inv: Arc<dyn Fft<f32>>,

    window: Vec<f32>,
    analysis: Vec<f32>,
    overlap: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl SpectralEngine {
    pub fn new(fft_size: usize, hop_size: usize) -> Self {
        assert!(
            hop_size > 0 && hop_size <= fft_size,
            "hop size must be in 1..=fft_size"
        );
        let mut planner = FftPlanner::<f32>::new();
        let fft_fwd = planner.plan_fft_forward(fft_size);
        let fft_inv = planner.plan_fft_inverse(fft_size);
        info!("Spectral engine initialized: FFT={}, hop={}", fft_size, hop_size);

        Self {
            fft_size,
            hop_size,
            bins: fft_size / 2 + 1,
            fft_fwd,
            fft_inv,
            window: make_sqrt_hann_window(fft_size),
            analysis: vec![0.0; fft_size],
            overlap: vec![0.0; fft_size],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn hop_size(&self) -> usize {
        self.hop_size
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Slide `hop` into the analysis history without transforming it.
    pub fn push_history(&mut self, hop: &[f32]) {
        debug_assert_eq!(hop.len(), self.hop_size);
        let keep = self.fft_size - self.hop_size;
        self.analysis.copy_within(self.hop_size.., 0);
        self.analysis[keep..].copy_from_slice(&hop[..self.hop_size]);
    }

    pub fn analyze(&mut self, hop: &[f32]) -> Spectrum {
        self.push_history(hop);

        for (dst, (&x, &w)) in self
            .scratch
            .iter_mut()
            .zip(self.analysis.iter().zip(self.window.iter()))
        {
            *dst = Complex::new(x * w, 0.0);
        }
        self.fft_fwd.process(&mut self.scratch);

        let mut spectrum = Spectrum::zeros(self.bins);
        for (i, c) in self.scratch[..self.bins].iter().enumerate() {
            spectrum.re[i] = c.re;
            spectrum.im[i] = c.im;
        }
        spectrum
    }

    pub fn synthesize(&mut self, spectrum: &Spectrum) -> Vec<f32> {
        debug_assert_eq!(spectrum.bins(), self.bins);
        for i in 0..self.bins {
            self.scratch[i] = Complex::new(spectrum.re[i], spectrum.im[i]);
        }
        // Hermitian mirror: bins 1..bins-1 fill n-1 down to n-bins+1
        for i in 1..self.bins - 1 {
            self.scratch[self.fft_size - i] = self.scratch[i].conj();
        }
        self.fft_inv.process(&mut self.scratch);

        let norm = 1.0 / self.fft_size as f32;
        for i in 0..self.fft_size {
            self.overlap[i] += self.scratch[i].re * norm * self.window[i];
        }

        let out = self.overlap[..self.hop_size].to_vec();
        self.drain_overlap();
        out
    }

    /// Overlap-add the current analysis frame unmodified and emit one hop.
    ///
    /// Time-domain equivalent of `synthesize(&analyze(..))` with an identity
    /// model, so bypassed frames keep the same one-hop latency and blend into
    /// their enhanced neighbours. Call after `analyze` or `push_history`.
    pub fn synthesize_dry(&mut self) -> Vec<f32> {
        for i in 0..self.fft_size {
            let w = self.window[i];
            self.overlap[i] += self.analysis[i] * w * w;
        }
        let out = self.overlap[..self.hop_size].to_vec();
        self.drain_overlap();
        out
    }

    /// Shift the overlap-add buffer left by one hop and zero the tail.
    fn drain_overlap(&mut self) {
        let keep = self.fft_size - self.hop_size;
        self.overlap.copy_within(self.hop_size.., 0);
        self.overlap[keep..].fill(0.0);
    }

    pub fn reset(&mut self) {
        self.analysis.fill(0.0);
        self.overlap.fill(0.0);
        self.scratch.fill(Complex::new(0.0, 0.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const N: usize = 512;
    const HOP: usize = 256;

    fn roundtrip(signal: &[f32]) -> Vec<f32> {
        let mut engine = SpectralEngine::new(N, HOP);
        let mut out = Vec::with_capacity(signal.len());
        for hop in signal.chunks(HOP) {
            let spec = engine.analyze(hop);
            out.extend(engine.synthesize(&spec));
        }
        out
    }

    #[test]
    fn test_bins_and_sizes() {
        let engine = SpectralEngine::new(N, HOP);
        assert_eq!(engine.bins(), 257);
        assert_eq!(engine.hop_size(), HOP);
    }

    #[test]
    fn test_roundtrip_sine_after_one_hop() {
        let signal: Vec<f32> = (0..HOP * 40)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16000.0).sin())
            .collect();
        let out = roundtrip(&signal);
        for i in HOP..signal.len() {
            assert_abs_diff_eq!(out[i], signal[i - HOP], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_roundtrip_zeros() {
        let signal = vec![0.0f32; HOP * 8];
        let out = roundtrip(&signal);
        assert!(out.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn test_dc_lands_in_bin_zero() {
        let mut engine = SpectralEngine::new(N, HOP);
        engine.analyze(&vec![1.0; HOP]);
        let spec = engine.analyze(&vec![1.0; HOP]);
        // sum of the sqrt-Hann window
        let expected: f32 = make_sqrt_hann_window(N).iter().sum();
        assert_abs_diff_eq!(spec.re[0], expected, epsilon = 1e-2);
        assert_abs_diff_eq!(spec.im[0], 0.0, epsilon = 1e-3);
    }

    #[test]
    fn test_dry_and_spectral_paths_share_one_timeline() {
        let signal: Vec<f32> = (0..HOP * 12).map(|i| 0.5 * (i as f32 * 0.11).sin()).collect();
        let mut engine = SpectralEngine::new(N, HOP);
        let mut out = Vec::with_capacity(signal.len());
        for (k, hop) in signal.chunks(HOP).enumerate() {
            // alternate runs of transformed and bypassed frames
            if (k / 3) % 2 == 0 {
                let spec = engine.analyze(hop);
                out.extend(engine.synthesize(&spec));
            } else {
                engine.push_history(hop);
                out.extend(engine.synthesize_dry());
            }
        }
        for i in 0..HOP {
            assert_abs_diff_eq!(out[i], 0.0, epsilon = 1e-6);
        }
        for i in HOP..signal.len() {
            assert_abs_diff_eq!(out[i], signal[i - HOP], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_reset_matches_fresh_engine() {
        let signal: Vec<f32> = (0..HOP * 6).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut engine = SpectralEngine::new(N, HOP);
        for hop in signal.chunks(HOP) {
            let spec = engine.analyze(hop);
            engine.synthesize(&spec);
        }
        engine.reset();

        let mut fresh = SpectralEngine::new(N, HOP);
        for hop in signal.chunks(HOP) {
            let a = engine.analyze(hop);
            let b = fresh.analyze(hop);
            assert_eq!(a, b);
            assert_eq!(engine.synthesize(&a), fresh.synthesize(&b));
        }
    }
}
