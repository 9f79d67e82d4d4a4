use thiserror::Error;

/// Top-level error type for the business guide.
///
/// Subsystem crates define their own error types and implement
/// `From<GuideError>` (or the reverse) so that `?` works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GuideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for GuideError {
    fn from(err: toml::de::Error) -> Self {
        GuideError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for GuideError {
    fn from(err: toml::ser::Error) -> Self {
        GuideError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for GuideError {
    fn from(err: serde_json::Error) -> Self {
        GuideError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for guide operations.
pub type Result<T> = std::result::Result<T, GuideError>;
