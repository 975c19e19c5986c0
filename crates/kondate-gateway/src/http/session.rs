//! POST /logout — explicit session purge.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use kondate_sessions::SessionError;

use crate::app::AppState;
use crate::auth::extract_bearer;
use crate::http::{engine_error, unauthorized, ErrorBody};

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub sse_session_id: String,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Drop the session and its progress channel. Any running graph is
/// cancelled best-effort. Only the owning user may purge a session.
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, (StatusCode, Json<ErrorBody>)> {
    let token = extract_bearer(&headers).ok_or_else(unauthorized)?;
    let user_id = state.auth.verify(token).await.ok_or_else(unauthorized)?;

    info!(user = %user_id, session = %request.sse_session_id, "logout");

    match state.store.get(&request.sse_session_id, &user_id).await {
        Ok(_) => {
            state.pipeline.cancel_session(&request.sse_session_id);
            state.store.remove(&request.sse_session_id);
            state.hub.remove(&request.sse_session_id);
            Ok(Json(LogoutResponse { success: true }))
        }
        Err(SessionError::NotFound { .. }) => Ok(Json(LogoutResponse { success: false })),
        Err(error) => Err(engine_error(error.into())),
    }
}
