//! Error types for the orchestration layer and its collaborator boundaries.

use bizguide_core::error::GuideError;

/// Errors surfaced to the hosting layer by the chat engine.
///
/// Pipeline and rendering failures never appear here: they are handled
/// inside a turn. Only input validation and session store failures escape.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("question exceeds maximum length of {0} characters")]
    QuestionTooLong(usize),
    #[error("session error: {0}")]
    Session(String),
}

impl From<GuideError> for ChatError {
    fn from(err: GuideError) -> Self {
        ChatError::Session(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Session(format!("serialization failed: {}", err))
    }
}

/// How the orchestrator treats a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stream or its connection went away. Logged only.
    TransportClosed,
    /// A known benign transport quirk. Logged only.
    NonCriticalFormatAnomaly,
    /// The result lacked `generate.generation`.
    MissingGeneration,
    /// Anything else. Shown to the user as a fixed message.
    Unclassified,
}

/// Structured error raised at the pipeline boundary.
///
/// Transport adapters decide the variant when they build the error, so the
/// orchestrator classifies by kind rather than by message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("stream closed: {0}")]
    StreamClosed(String),
    #[error("bad message format: {0}")]
    FormatAnomaly(String),
    #[error("no generation found in result")]
    MissingGeneration,
    #[error("pipeline failed: {0}")]
    Failed(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::StreamClosed(_) => FailureKind::TransportClosed,
            PipelineError::FormatAnomaly(_) => FailureKind::NonCriticalFormatAnomaly,
            PipelineError::MissingGeneration => FailureKind::MissingGeneration,
            PipelineError::Failed(_) => FailureKind::Unclassified,
        }
    }
}

/// Failure to update an output region.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("output region closed")]
    Closed,
    #[error("render attempted outside the owning run context")]
    ForeignContext,
}

/// Failure of the secondary model used for follow-up questions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned no content")]
    EmptyResponse,
}
