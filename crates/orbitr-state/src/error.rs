use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid rules file: {0}")]
    InvalidRules(String),

    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow {0} is already closed")]
    WorkflowClosed(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}
