use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire marker a backend uses when it cannot decide which of several
/// matching rows to act on without user input.
pub const AMBIGUITY_MARKER: &str = "AMBIGUITY_DETECTED";

/// Raw result envelope every backend tool returns:
/// `{"success": bool, "data": ..., "error": "...", ...}`.
///
/// Ambiguity arrives as `success=false, error="AMBIGUITY_DETECTED"` plus
/// an `items` array of the candidate rows. Convert to [`ToolOutcome`]
/// immediately after receipt; nothing downstream should compare the
/// marker string again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
}

/// Typed view of a tool reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// The tool did its work; the payload is the `data` field (null when
    /// the tool returned none).
    Success(Value),
    /// Multiple rows matched and the tool needs the user to pick.
    Ambiguity { message: String, items: Vec<Value> },
    /// Any other failure.
    Failure(String),
}

impl ToolEnvelope {
    pub fn into_outcome(self) -> ToolOutcome {
        if self.success {
            return ToolOutcome::Success(self.data.unwrap_or(Value::Null));
        }
        match self.error.as_deref() {
            Some(AMBIGUITY_MARKER) => ToolOutcome::Ambiguity {
                message: self
                    .message
                    .unwrap_or_else(|| "multiple matching items found".to_string()),
                items: self.items.unwrap_or_default(),
            },
            Some(err) => ToolOutcome::Failure(err.to_string()),
            None => ToolOutcome::Failure("unknown tool error".to_string()),
        }
    }
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }
}
