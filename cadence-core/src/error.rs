use thiserror::Error;

/// All errors produced by cadence-core.
#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("invalid configuration for `{field}`: {message}")]
    InvalidConfig { field: &'static str, message: String },

    #[error("unsupported score batch size {0}: only batch size 1 is supported")]
    UnsupportedBatch(usize),

    #[error("silence class index {index} is out of range for a score tensor with {classes} classes")]
    SilenceClassOutOfRange { index: usize, classes: usize },

    #[error("frame scoring failed: {0}")]
    Scoring(String),

    #[error("cannot align {tokens} tokens against {windows} firing windows")]
    AlignmentMismatch { tokens: usize, windows: usize },

    #[error("segmentation engine is already running")]
    AlreadyRunning,

    #[error("segmentation engine is not running")]
    NotRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CadenceError {
    pub(crate) fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CadenceError>;
