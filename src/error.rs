use crate::model::ModelDomain;
use crate::session::SessionPhase;
use thiserror::Error;

/// Failure reported by (or detected in the output of) an inference engine.
///
/// Always recovered locally: the block passes through and the recurrent state
/// keeps its last good value.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("inference failed: {0}")]
    Failed(String),
    #[error("malformed engine output: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session is {actual:?}, operation requires {expected:?}")]
    InvalidState {
        expected: SessionPhase,
        actual: SessionPhase,
    },
    #[error("block of {got} samples, expected {expected}")]
    BlockSize { expected: usize, got: usize },
    #[error("engine runs in the {engine:?} domain but the model is {model:?}")]
    DomainMismatch {
        engine: ModelDomain,
        model: ModelDomain,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session lock poisoned")]
    Poisoned,
    #[error("frame loop is already running")]
    AlreadyRunning,
    #[error("failed to spawn frame loop thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("frame loop thread panicked")]
    WorkerPanicked,
}

pub type Result<T> = std::result::Result<T, SessionError>;
