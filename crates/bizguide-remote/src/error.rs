//! Transport errors and their classification into pipeline and model error
//! kinds.
//!
//! This is the only place that inspects transport error text. Everything
//! downstream matches on [`PipelineError`] variants.

use bizguide_chat::error::{ModelError, PipelineError};

/// Known benign message produced by the pipeline transport.
pub const FORMAT_ANOMALY_MARKER: &str = "Bad message format";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("missing API key: set {0}")]
    MissingApiKey(&'static str),
}

/// Map an error message reported by the pipeline itself.
pub fn classify_message(message: &str) -> PipelineError {
    if message.contains(FORMAT_ANOMALY_MARKER) {
        PipelineError::FormatAnomaly(message.to_string())
    } else {
        PipelineError::Failed(message.to_string())
    }
}

impl From<RemoteError> for PipelineError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Request(e) if e.is_body() => PipelineError::StreamClosed(e.to_string()),
            RemoteError::Request(e) if e.is_decode() => {
                PipelineError::FormatAnomaly(format!("{}: {}", FORMAT_ANOMALY_MARKER, e))
            }
            RemoteError::Status { message, .. } => classify_message(&message),
            other => classify_message(&other.to_string()),
        }
    }
}

impl From<RemoteError> for ModelError {
    fn from(err: RemoteError) -> Self {
        ModelError::Request(err.to_string())
    }
}
