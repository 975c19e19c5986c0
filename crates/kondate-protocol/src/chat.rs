use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest user message the chat endpoint accepts.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// Inbound chat request.
///
/// `token` may also arrive via the `Authorization: Bearer` header; the body
/// field exists for clients that cannot set headers. `sse_session_id` is
/// assigned by the gateway when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, alias = "sseSessionId", skip_serializing_if = "Option::is_none")]
    pub sse_session_id: Option<String>,
    /// True when this message answers a pending clarification question.
    #[serde(default)]
    pub confirm: bool,
}

impl ChatRequest {
    /// Message length bounds from the public API contract.
    pub fn validate(&self) -> Result<(), String> {
        let len = self.message.chars().count();
        if len == 0 {
            return Err("message cannot be empty".to_string());
        }
        if len > MAX_MESSAGE_CHARS {
            return Err(format!("message exceeds {MAX_MESSAGE_CHARS} characters"));
        }
        Ok(())
    }
}

/// Outbound chat response.
///
/// The boolean flags are always serialized (clients branch on them without
/// presence checks); the optional payload fields are omitted when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub success: bool,
    pub model_used: String,
    pub user_id: String,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_session_id: Option<String>,
    #[serde(default)]
    pub requires_selection: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    /// Inventory items not yet consumed by selected recipes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_ingredients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_category: Option<String>,
    #[serde(default)]
    pub requires_next_stage: bool,
}

/// Client posts this after picking one of the offered candidates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub task_id: String,
    pub selection_index: usize,
    pub sse_session_id: String,
}

/// Acknowledgement of a selection; tells the client whether another
/// proposal round follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    #[serde(default)]
    pub requires_next_stage: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_ingredients: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_category: Option<String>,
}

/// Save the composed menu into the history store.
///
/// Recipes sent in the body take priority over the session's selections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuSaveRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sse_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipes: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedRecipe {
    pub category: String,
    /// Title with the course prefix already applied.
    pub title: String,
    pub history_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuSaveResponse {
    pub success: bool,
    pub message: String,
    pub saved_recipes: Vec<SavedRecipe>,
    pub total_saved: usize,
}

/// One saved recipe in the history listing. `category` is recovered from
/// the course prefix on the stored title; titles saved without a prefix
/// have no category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecipe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub title: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub history_id: String,
}

/// Saved recipes of one day, newest day first in the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `YYYY-MM-DD`.
    pub date: String,
    pub recipes: Vec<HistoryRecipe>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuHistoryResponse {
    pub success: bool,
    pub data: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_message() {
        let req = ChatRequest {
            message: String::new(),
            token: None,
            sse_session_id: None,
            confirm: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_oversized_message() {
        let req = ChatRequest {
            message: "あ".repeat(MAX_MESSAGE_CHARS + 1),
            token: None,
            sse_session_id: None,
            confirm: false,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn accepts_max_length_message() {
        let req = ChatRequest {
            message: "a".repeat(MAX_MESSAGE_CHARS),
            token: None,
            sse_session_id: None,
            confirm: false,
        };
        assert!(req.validate().is_ok());
    }
}
