use crate::dsp::post::DEFAULT_LIMITER_THRESHOLD;
use crate::error::ConfigError;
use crate::model::ModelSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_VAD_THRESHOLD_DB: f32 = -40.0;
const DEFAULT_HANGOVER_MS: f32 = 300.0;
const DEFAULT_ATTEN_LIM_DB: f32 = -60.0;
const DEFAULT_DEVICE_RATE: u32 = 48000;
const DEFAULT_DEVICE_BLOCK: usize = 480;
const DEFAULT_MAX_IO_ERRORS: u32 = 8;

/// Construction parameters of one denoising session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub vad_threshold_db: f32,
    pub hangover_ms: f32,
    /// Peak level the soft limiter scales down to.
    pub limiter_threshold: f32,
    pub atten_lim_db: f32,
    pub capture_rate: u32,
    pub playback_rate: u32,
    /// Samples requested from the capture source per iteration.
    pub capture_block: usize,
    /// Samples handed to the playback sink per write.
    pub playback_block: usize,
    /// Consecutive capture/playback failures tolerated before the loop gives up.
    pub max_consecutive_io_errors: u32,
    pub model: ModelSpec,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            vad_threshold_db: DEFAULT_VAD_THRESHOLD_DB,
            hangover_ms: DEFAULT_HANGOVER_MS,
            limiter_threshold: DEFAULT_LIMITER_THRESHOLD,
            atten_lim_db: DEFAULT_ATTEN_LIM_DB,
            capture_rate: DEFAULT_DEVICE_RATE,
            playback_rate: DEFAULT_DEVICE_RATE,
            capture_block: DEFAULT_DEVICE_BLOCK,
            playback_block: DEFAULT_DEVICE_BLOCK,
            max_consecutive_io_errors: DEFAULT_MAX_IO_ERRORS,
            model: ModelSpec::deep_filter(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("vad_threshold_db", self.vad_threshold_db),
            ("hangover_ms", self.hangover_ms),
            ("limiter_threshold", self.limiter_threshold),
            ("atten_lim_db", self.atten_lim_db),
        ];
        for (name, v) in finite {
            if !v.is_finite() {
                return Err(ConfigError::Invalid(format!("{} must be finite", name)));
            }
        }
        if self.hangover_ms < 0.0 {
            return Err(ConfigError::Invalid("hangover_ms must be >= 0".into()));
        }
        if self.limiter_threshold <= 0.0 || self.limiter_threshold > 1.0 {
            return Err(ConfigError::Invalid(
                "limiter_threshold must be in (0, 1]".into(),
            ));
        }
        if self.capture_rate == 0 || self.playback_rate == 0 {
            return Err(ConfigError::Invalid("device sample rates must be > 0".into()));
        }
        if self.capture_block == 0 || self.playback_block == 0 {
            return Err(ConfigError::Invalid("device block sizes must be > 0".into()));
        }
        self.model.validate().map_err(ConfigError::Invalid)
    }

    pub fn needs_input_resampler(&self) -> bool {
        self.capture_rate != self.model.sample_rate
    }

    pub fn needs_output_resampler(&self) -> bool {
        self.playback_rate != self.model.sample_rate
    }
}
