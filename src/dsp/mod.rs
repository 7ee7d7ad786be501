pub mod post;
pub mod reblock;
pub mod resampler;
pub mod stft;
pub mod utils;
pub mod vad;

pub use post::PostProcessor;
pub use reblock::BlockAssembler;
pub use resampler::{PacedResampler, RatePacer, StreamingResampler};
pub use stft::SpectralEngine;
pub use vad::{VadStats, VoiceActivityDetector};
