use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {id}")]
    NotFound { id: String },

    #[error("Session {id} is owned by another user")]
    Ownership { id: String },

    #[error("Session expired: {id}")]
    Expired { id: String },

    #[error("No candidate at index {index} for stage {stage}")]
    NoSuchCandidate { stage: String, index: usize },

    #[error("Selection is not possible: {0}")]
    InvalidSelection(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
