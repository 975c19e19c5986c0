//! POST /chat — the main conversational endpoint.
//!
//! Auth: `Authorization: Bearer <token>` (or `token` in the body for
//! clients that cannot set headers). Progress streams separately via
//! `GET /chat/stream/{sse_session_id}`.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

use kondate_core::types::AuthToken;
use kondate_protocol::{ChatRequest, ChatResponse};

use crate::app::AppState;
use crate::auth::extract_bearer;
use crate::http::{bad_request, engine_error, unauthorized, ErrorBody};

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), (StatusCode, Json<ErrorBody>)> {
    let token = extract_bearer(&headers)
        .map(str::to_string)
        .or_else(|| request.token.clone())
        .ok_or_else(unauthorized)?;

    let user_id = state
        .auth
        .verify(&token)
        .await
        .ok_or_else(unauthorized)?;

    request.validate().map_err(bad_request)?;

    info!(user = %user_id, session = ?request.sse_session_id, "chat request");

    let turn = state
        .pipeline
        .handle(
            &request.message,
            &user_id,
            &AuthToken::from(token),
            request.sse_session_id.clone(),
        )
        .await
        .map_err(|error| {
            warn!(error = %error, "chat turn failed");
            engine_error(error)
        })?;

    // A failed graph still returns the formatted body, but as a 500 so
    // scripted clients notice.
    let status = if turn.response.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(turn.response)))
}
