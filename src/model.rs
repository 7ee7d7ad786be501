//! Model family description and the inference engine boundary.
//!
//! The session never looks inside the engine. It hands over one frame (samples
//! for waveform models, half-spectrum for spectral models) together with the
//! recurrent state, and takes back an enhanced frame plus the next state.

use crate::error::InferenceError;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelDomain {
    /// Model consumes and produces time-domain hops.
    Waveform,
    /// Model consumes and produces STFT half-spectra.
    Spectral,
}

/// One named recurrent buffer of a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSlot {
    pub name: String,
    pub len: usize,
}

impl StateSlot {
    pub fn new(name: &str, len: usize) -> Self {
        Self {
            name: name.to_string(),
            len,
        }
    }
}

/// Fixed framing and state layout of a model family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub domain: ModelDomain,
    pub sample_rate: u32,
    pub hop_size: usize,
    /// FFT length, only meaningful for spectral models.
    pub fft_size: usize,
    pub state: Vec<StateSlot>,
}

impl ModelSpec {
    /// DeepFilterNet-style waveform model: 10 ms frames at 48 kHz, one flat state.
    pub fn deep_filter() -> Self {
        Self {
            name: "deep_filter".into(),
            domain: ModelDomain::Waveform,
            sample_rate: 48000,
            hop_size: 480,
            fft_size: 0,
            state: vec![StateSlot::new("states", 45304)],
        }
    }

    /// GTCRN streaming model: 512-point STFT, 256 hop at 16 kHz.
    pub fn gtcrn() -> Self {
        Self {
            name: "gtcrn".into(),
            domain: ModelDomain::Spectral,
            sample_rate: 16000,
            hop_size: 256,
            fft_size: 512,
            state: vec![
                StateSlot::new("conv_cache", 2 * 16 * 16 * 33),
                StateSlot::new("tra_cache", 2 * 3 * 16),
                StateSlot::new("inter_cache", 2 * 33 * 16),
            ],
        }
    }

    pub fn bins(&self) -> usize {
        self.fft_size / 2 + 1
    }

    pub fn block_duration_ms(&self) -> f64 {
        self.hop_size as f64 * 1000.0 / self.sample_rate.max(1) as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err(format!("model '{}' has a zero sample rate", self.name));
        }
        if self.hop_size == 0 {
            return Err(format!("model '{}' has a zero hop size", self.name));
        }
        if self.domain == ModelDomain::Spectral && self.fft_size != 2 * self.hop_size {
            return Err(format!(
                "spectral model '{}' needs fft_size = 2 * hop_size (got {} / {})",
                self.name, self.fft_size, self.hop_size
            ));
        }
        if self.state.iter().any(|s| s.len == 0) {
            return Err(format!("model '{}' has an empty state slot", self.name));
        }
        Ok(())
    }
}

/// Non-redundant half of a real signal's spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct Spectrum {
    pub re: Vec<f32>,
    pub im: Vec<f32>,
}

impl Spectrum {
    pub fn zeros(bins: usize) -> Self {
        Self {
            re: vec![0.0; bins],
            im: vec![0.0; bins],
        }
    }

    pub fn bins(&self) -> usize {
        self.re.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ModelFrame {
    Waveform(Vec<f32>),
    Spectrum(Spectrum),
}

impl ModelFrame {
    pub fn domain(&self) -> ModelDomain {
        match self {
            ModelFrame::Waveform(_) => ModelDomain::Waveform,
            ModelFrame::Spectrum(_) => ModelDomain::Spectral,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StateBuffer {
    pub name: String,
    pub data: Vec<f32>,
}

/// Opaque recurrent model context, persisted between calls.
#[derive(Clone, Debug, PartialEq)]
pub struct RecurrentState {
    buffers: Vec<StateBuffer>,
}

impl RecurrentState {
    pub fn zeros(layout: &[StateSlot]) -> Self {
        Self {
            buffers: layout
                .iter()
                .map(|slot| StateBuffer {
                    name: slot.name.clone(),
                    data: vec![0.0; slot.len],
                })
                .collect(),
        }
    }

    pub fn buffers(&self) -> &[StateBuffer] {
        &self.buffers
    }

    pub fn buffers_mut(&mut self) -> &mut [StateBuffer] {
        &mut self.buffers
    }

    pub fn get(&self, name: &str) -> Option<&[f32]> {
        self.buffers
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.data.as_slice())
    }

    pub fn len(&self) -> usize {
        self.buffers.iter().map(|b| b.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn same_layout(&self, other: &RecurrentState) -> bool {
        self.buffers.len() == other.buffers.len()
            && self
                .buffers
                .iter()
                .zip(other.buffers.iter())
                .all(|(a, b)| a.name == b.name && a.data.len() == b.data.len())
    }

    /// Copy `other` in place. Callers check `same_layout` first.
    pub fn copy_from(&mut self, other: &RecurrentState) {
        for (dst, src) in self.buffers.iter_mut().zip(other.buffers.iter()) {
            dst.data.copy_from_slice(&src.data);
        }
    }

    pub fn zero(&mut self) {
        for b in &mut self.buffers {
            b.data.fill(0.0);
        }
    }
}

pub struct InferenceRequest<'a> {
    pub frame: &'a ModelFrame,
    pub state: &'a RecurrentState,
    /// Maximum attenuation the engine may apply, in dB (negative).
    pub atten_lim_db: f32,
}

pub struct InferenceOutput {
    pub frame: ModelFrame,
    pub state: RecurrentState,
}

/// External denoising model.
pub trait InferenceEngine: Send {
    fn domain(&self) -> ModelDomain;

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput, InferenceError>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn domain(&self) -> ModelDomain {
        (**self).domain()
    }

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput, InferenceError> {
        (**self).infer(request)
    }
}

/// Check an engine answer against the request before anything is committed.
pub fn validate_output(
    request: &InferenceRequest<'_>,
    output: &InferenceOutput,
) -> Result<(), InferenceError> {
    match (request.frame, &output.frame) {
        (ModelFrame::Waveform(a), ModelFrame::Waveform(b)) => {
            if a.len() != b.len() {
                return Err(InferenceError::Malformed(format!(
                    "waveform of {} samples, expected {}",
                    b.len(),
                    a.len()
                )));
            }
        }
        (ModelFrame::Spectrum(a), ModelFrame::Spectrum(b)) => {
            if a.bins() != b.bins() || b.re.len() != b.im.len() {
                return Err(InferenceError::Malformed(format!(
                    "spectrum of {}/{} bins, expected {}",
                    b.re.len(),
                    b.im.len(),
                    a.bins()
                )));
            }
        }
        (sent, got) => {
            return Err(InferenceError::Malformed(format!(
                "sent a {:?} frame, got a {:?} frame",
                sent.domain(),
                got.domain()
            )));
        }
    }

    let bad_sample = match &output.frame {
        ModelFrame::Waveform(x) => x.iter().any(|v| !v.is_finite()),
        ModelFrame::Spectrum(s) => s.re.iter().chain(s.im.iter()).any(|v| !v.is_finite()),
    };
    if bad_sample {
        return Err(InferenceError::Malformed("non-finite output".into()));
    }

    if !request.state.same_layout(&output.state) {
        return Err(InferenceError::Malformed(
            "recurrent state layout changed".into(),
        ));
    }
    Ok(())
}

/// Identity engine: returns the frame and state it was given.
///
/// Useful to measure the latency and transparency of the plumbing.
pub struct PassthroughEngine {
    domain: ModelDomain,
}

impl PassthroughEngine {
    pub fn new(domain: ModelDomain) -> Self {
        Self { domain }
    }
}

impl InferenceEngine for PassthroughEngine {
    fn domain(&self) -> ModelDomain {
        self.domain
    }

    fn infer(&mut self, request: &InferenceRequest<'_>) -> Result<InferenceOutput, InferenceError> {
        Ok(InferenceOutput {
            frame: request.frame.clone(),
            state: request.state.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(ModelSpec::deep_filter().validate().is_ok());
        let gtcrn = ModelSpec::gtcrn();
        assert!(gtcrn.validate().is_ok());
        assert_eq!(gtcrn.bins(), 257);
        assert_eq!(ModelSpec::deep_filter().state[0].len, 45304);
    }

    #[test]
    fn test_spectral_needs_half_overlap() {
        let mut spec = ModelSpec::gtcrn();
        spec.hop_size = 128;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_state_layout_checks() {
        let layout = ModelSpec::gtcrn().state;
        let a = RecurrentState::zeros(&layout);
        let mut b = a.clone();
        assert!(a.same_layout(&b));
        b.buffers_mut()[0].data.push(0.0);
        assert!(!a.same_layout(&b));
        assert_eq!(a.get("tra_cache").map(|d| d.len()), Some(96));
    }

    #[test]
    fn test_validate_rejects_wrong_length() {
        let state = RecurrentState::zeros(&[StateSlot::new("h", 4)]);
        let frame = ModelFrame::Waveform(vec![0.0; 8]);
        let request = InferenceRequest {
            frame: &frame,
            state: &state,
            atten_lim_db: -60.0,
        };
        let short = InferenceOutput {
            frame: ModelFrame::Waveform(vec![0.0; 7]),
            state: state.clone(),
        };
        assert!(matches!(
            validate_output(&request, &short),
            Err(InferenceError::Malformed(_))
        ));
        let nan = InferenceOutput {
            frame: ModelFrame::Waveform(vec![f32::NAN; 8]),
            state: state.clone(),
        };
        assert!(validate_output(&request, &nan).is_err());
    }
}
