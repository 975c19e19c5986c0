use axum::Json;
use serde_json::{json, Value};

/// GET /health — liveness probe, no auth.
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "kondate-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
