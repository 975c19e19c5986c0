use thiserror::Error;

use kondate_agent::AgentError;
use kondate_sessions::SessionError;
use kondate_tools::ToolError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Parameter resolution failed: {0}")]
    ParameterResolution(String),

    #[error("Task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Session is busy with another request")]
    BusySession,

    #[error("Run was cancelled")]
    Cancelled,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
