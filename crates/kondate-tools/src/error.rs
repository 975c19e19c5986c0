use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool call timed out after {secs}s: {tool}")]
    Timeout { tool: String, secs: u64 },

    #[error("Transport error calling {tool}: {reason}")]
    Transport { tool: String, reason: String },

    #[error("Malformed tool reply from {tool}: {reason}")]
    MalformedReply { tool: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ToolError>;
