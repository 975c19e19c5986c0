//! POST /menu/select, POST /menu/save and GET /menu/history — the
//! selection dialog surface.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use kondate_core::types::AuthToken;
use kondate_protocol::{
    MenuHistoryResponse, MenuSaveRequest, MenuSaveResponse, SelectionRequest, SelectionResponse,
};

use crate::app::AppState;
use crate::auth::extract_bearer;
use crate::http::{engine_error, unauthorized, ErrorBody};

/// Record the user's pick for the current stage and advance the dialog.
pub async fn select_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SelectionRequest>,
) -> Result<Json<SelectionResponse>, (StatusCode, Json<ErrorBody>)> {
    let token = extract_bearer(&headers).ok_or_else(unauthorized)?;
    let user_id = state.auth.verify(token).await.ok_or_else(unauthorized)?;

    info!(user = %user_id, session = %request.sse_session_id,
          index = request.selection_index, "selection received");

    let response = state
        .stage
        .select(&user_id, &request)
        .await
        .map_err(engine_error)?;
    Ok(Json(response))
}

/// Persist the composed menu into the history store.
pub async fn save_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<MenuSaveRequest>,
) -> Result<Json<MenuSaveResponse>, (StatusCode, Json<ErrorBody>)> {
    let token = extract_bearer(&headers).ok_or_else(unauthorized)?;
    let user_id = state.auth.verify(token).await.ok_or_else(unauthorized)?;

    let response = state
        .stage
        .save_menu(&user_id, &AuthToken::from(token), &request)
        .await
        .map_err(engine_error)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_days")]
    pub days: i64,
    #[serde(default)]
    pub category: Option<String>,
}

fn default_history_days() -> i64 {
    14
}

/// List saved menus, grouped by day.
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<MenuHistoryResponse>, (StatusCode, Json<ErrorBody>)> {
    let token = extract_bearer(&headers).ok_or_else(unauthorized)?;
    let user_id = state.auth.verify(token).await.ok_or_else(unauthorized)?;

    let response = state
        .stage
        .menu_history(
            &user_id,
            &AuthToken::from(token),
            query.days,
            query.category.as_deref(),
        )
        .await
        .map_err(engine_error)?;
    Ok(Json(response))
}
