//! Wire types shared between the gateway, the planner and the executor.
//!
//! Everything in this crate is plain serde data: the chat request/response
//! pair, the SSE progress frames, the task-graph JSON the planner exchanges
//! with the chat model, and the result envelope every backend tool returns.
//! No I/O lives here; the `tests/wire_compat.rs` suite pins the exact JSON
//! so clients are never broken silently.

pub mod chat;
pub mod events;
pub mod plan;
pub mod refs;
pub mod tool;

pub use chat::{
    ChatRequest, ChatResponse, HistoryEntry, HistoryRecipe, MenuHistoryResponse, MenuSaveRequest,
    MenuSaveResponse, SavedRecipe, SelectionRequest, SelectionResponse,
};
pub use events::{EventKind, ProgressEvent};
pub use plan::{PlanDocument, TaskSpec};
pub use refs::{ParamRef, PathSeg};
pub use tool::{ToolEnvelope, ToolOutcome};
