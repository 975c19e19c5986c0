pub mod chat;
pub mod health;
pub mod menu;
pub mod session;
pub mod stream;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use kondate_engine::EngineError;
use kondate_sessions::SessionError;

/// JSON error body; the message never carries internal detail.
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

pub fn unauthorized() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "Authentication required. Set 'Authorization: Bearer <token>'.".to_string(),
            code: "AUTH_FAILED",
        }),
    )
}

pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.into(),
            code: "BAD_REQUEST",
        }),
    )
}

/// Map engine errors onto HTTP without leaking internals.
pub fn engine_error(error: EngineError) -> (StatusCode, Json<ErrorBody>) {
    let (status, code, message) = match &error {
        EngineError::BusySession => (
            StatusCode::CONFLICT,
            "BUSY_SESSION",
            "The session is already processing a request.".to_string(),
        ),
        EngineError::Session(SessionError::NotFound { .. }) => (
            StatusCode::NOT_FOUND,
            "SESSION_NOT_FOUND",
            "Unknown session.".to_string(),
        ),
        EngineError::Session(SessionError::Ownership { .. }) => (
            StatusCode::FORBIDDEN,
            "SESSION_OWNERSHIP",
            "The session belongs to another user.".to_string(),
        ),
        EngineError::Session(SessionError::NoSuchCandidate { .. })
        | EngineError::Session(SessionError::InvalidSelection(_)) => (
            StatusCode::BAD_REQUEST,
            "INVALID_SELECTION",
            error.to_string(),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "The request could not be processed.".to_string(),
        ),
    };
    (
        status,
        Json(ErrorBody {
            error: message,
            code,
        }),
    )
}
