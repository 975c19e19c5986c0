use thiserror::Error;

/// Top-level error kinds surfaced by the pipeline.
///
/// Subsystem crates keep their own error enums; everything that reaches
/// the HTTP layer is converted into one of these so the gateway can map
/// it to a status code and a stable client-facing code string.
#[derive(Debug, Error)]
pub enum KondateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Session is busy with another request")]
    BusySession,

    #[error("Planner output could not be parsed: {0}")]
    MalformedPlan(String),

    #[error("Planner output failed validation: {0}")]
    PlanInvalid(String),

    #[error("Parameter reference could not be resolved: {0}")]
    ParameterResolution(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool failed: {0}")]
    ToolFailed(String),

    #[error("Tool call timed out after {secs}s")]
    ToolTimeout { secs: u64 },

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session is owned by another user")]
    SessionOwnership,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl KondateError {
    /// Short error code string sent to clients in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            KondateError::Config(_) => "CONFIG_ERROR",
            KondateError::AuthRequired => "AUTH_REQUIRED",
            KondateError::AuthFailed(_) => "AUTH_FAILED",
            KondateError::BusySession => "BUSY_SESSION",
            KondateError::MalformedPlan(_) => "MALFORMED_PLAN",
            KondateError::PlanInvalid(_) => "PLAN_INVALID",
            KondateError::ParameterResolution(_) => "PARAMETER_RESOLUTION",
            KondateError::UnknownTool(_) => "UNKNOWN_TOOL",
            KondateError::ToolFailed(_) => "TOOL_FAILED",
            KondateError::ToolTimeout { .. } => "TOOL_TIMEOUT",
            KondateError::SessionExpired(_) => "SESSION_EXPIRED",
            KondateError::SessionOwnership => "SESSION_OWNERSHIP",
            KondateError::Serialization(_) => "SERIALIZATION_ERROR",
            KondateError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, KondateError>;
