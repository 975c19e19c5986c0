//! GET /chat/stream/{sse_session_id} — the progress stream.
//!
//! Server-sent events, one `data: <json>` frame per progress event. The
//! stream opens with a `connected` frame, heartbeats while idle, and ends
//! with a `close` frame after `complete` or `error`. Disconnecting merely
//! detaches the subscriber; the running graph is not affected.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::sse::{Event, Sse},
    Json,
};
use futures_util::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

use kondate_protocol::ProgressEvent;

use crate::app::AppState;
use crate::auth::extract_bearer;
use crate::http::{unauthorized, ErrorBody};

pub async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(sse_session_id): Path<String>,
    headers: HeaderMap,
) -> Result<
    Sse<impl Stream<Item = Result<Event, Infallible>>>,
    (axum::http::StatusCode, Json<ErrorBody>),
> {
    let token = extract_bearer(&headers).ok_or_else(unauthorized)?;
    let user_id = state.auth.verify(token).await.ok_or_else(unauthorized)?;

    info!(user = %user_id, session = %sse_session_id, "stream attached");

    let mut subscription = state.hub.subscribe(&sse_session_id);
    let stream = async_stream::stream! {
        yield Ok(to_sse(&ProgressEvent::connected()));
        while let Some(event) = subscription.next().await {
            yield Ok(to_sse(&event));
        }
    };

    // Heartbeats come from the hub subscription, not the transport layer,
    // so they appear in the event log like any other frame.
    Ok(Sse::new(stream))
}

fn to_sse(event: &ProgressEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(body) => Event::default().data(body),
        Err(_) => Event::default().data("{\"type\":\"error\"}"),
    }
}
