use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Kinds of frames on a session's progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connected,
    Progress,
    Complete,
    Error,
    Heartbeat,
    Close,
}

/// One frame on the progress stream.
///
/// Serialized as `{"type": "...", "data": {...}, "timestamp": "..."}` and
/// shipped to SSE clients as a single `data:` line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
    pub timestamp: String,
}

impl ProgressEvent {
    fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn connected() -> Self {
        Self::new(EventKind::Connected, json!({ "message": "stream connected" }))
    }

    /// Emitted around each task: `percent` is completed/total of the graph.
    pub fn progress(task_id: &str, percent: u8, message: &str) -> Self {
        Self::new(
            EventKind::Progress,
            json!({ "task_id": task_id, "percent": percent, "message": message }),
        )
    }

    /// Terminal frame on success; carries the formatted response.
    pub fn complete(result: Value) -> Self {
        Self::new(EventKind::Complete, json!({ "result": result }))
    }

    pub fn error(message: &str) -> Self {
        Self::new(EventKind::Error, json!({ "message": message }))
    }

    pub fn heartbeat(counter: u64) -> Self {
        Self::new(
            EventKind::Heartbeat,
            json!({ "message": "ping", "counter": counter }),
        )
    }

    pub fn close() -> Self {
        Self::new(
            EventKind::Close,
            json!({ "message": "connection will close" }),
        )
    }

    /// True for the frames after which the stream closes.
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }

    /// Render as one SSE frame: `data: <json>\n\n`.
    pub fn to_sse_line(&self) -> String {
        // Serialization of this shape cannot fail; fall back to a bare
        // error frame rather than panicking if it ever does.
        let body = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","data":{"message":"serialization"}}"#.into());
        format!("data: {body}\n\n")
    }
}
