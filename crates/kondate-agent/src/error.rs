use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Planner reply could not be parsed: {0}")]
    MalformedPlan(String),

    #[error("Plan failed validation: {0}")]
    PlanInvalid(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
