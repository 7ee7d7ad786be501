//! Poise: frame-synchronous real-time speech denoising core.
//!
//! A [`DenoisingSession`] takes capture blocks through an energy gate, an
//! optional resampler to the model rate, an STFT (spectral models only), an
//! external [`InferenceEngine`], the inverse transform and a safety stage.
//! [`SessionController`] runs that session on a worker thread between a
//! [`CaptureSource`] and a [`PlaybackSink`].

pub mod config;
pub mod control;
pub mod dsp;
pub mod error;
pub mod meters;
pub mod model;
pub mod session;
pub mod stats;
pub mod wav;

pub use config::SessionConfig;
pub use control::{CaptureSource, FrameLoop, LoopExit, LoopSummary, PlaybackSink, SessionController};
pub use error::{ConfigError, InferenceError, SessionError};
pub use meters::LevelMeters;
pub use model::{
    InferenceEngine, InferenceOutput, InferenceRequest, ModelDomain, ModelFrame, ModelSpec,
    PassthroughEngine, RecurrentState, Spectrum, StateBuffer, StateSlot,
};
pub use session::{DenoisingSession, SessionPhase};
pub use stats::ProcessingStats;
pub use wav::{WavCapture, WavPlayback};
