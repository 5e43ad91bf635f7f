use thiserror::Error;

/// Errors raised while validating protocol values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
