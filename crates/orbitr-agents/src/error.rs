use orbitr_state::StateError;

/// Errors raised while analysing an event.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("Unparseable LLM response: {0}")]
    Parse(String),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Agent {0} is not registered")]
    UnknownAgent(String),
}
