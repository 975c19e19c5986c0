//! Ambiguity handling: detection, the clarification question, and the
//! conversion of the user's reply into a concrete row-selection strategy.
//!
//! Ambiguity is not an error. It is a protocol step: the tool succeeded
//! at discovering that several rows match, the graph suspends, the user
//! answers, and the suspended task is rewritten and re-run.

use serde_json::Value;

use kondate_protocol::{TaskSpec, ToolOutcome};
use kondate_tools::ToolDescriptor;

/// What the detector reports when a tool result halts the graph.
#[derive(Debug, Clone)]
pub struct AmbiguityHalt {
    pub question: String,
    pub items: Vec<Value>,
    /// `"update"` or `"delete"`, from the suspended task's method.
    pub operation: String,
}

/// Inspect one tool result.
///
/// Only tools flagged `may_report_ambiguity` can halt the graph; a
/// proposal returning fewer candidates than hoped is not ambiguity, and
/// any other failure is an ordinary task failure.
pub fn inspect(descriptor: &ToolDescriptor, outcome: &ToolOutcome) -> Option<AmbiguityHalt> {
    if !descriptor.may_report_ambiguity {
        return None;
    }
    let ToolOutcome::Ambiguity { message, items } = outcome else {
        return None;
    };
    let operation = if descriptor.method.starts_with("delete") {
        "delete"
    } else {
        "update"
    };
    Some(AmbiguityHalt {
        question: build_question(message, items, operation),
        items: items.clone(),
        operation: operation.to_string(),
    })
}

/// Render the clarification question, listing the candidate rows.
fn build_question(message: &str, items: &[Value], operation: &str) -> String {
    let mut out = format!("{message}\n");
    for (index, item) in items.iter().enumerate() {
        let name = item
            .get("item_name")
            .and_then(Value::as_str)
            .unwrap_or("item");
        let quantity = item.get("quantity").map(render_number).unwrap_or_default();
        let unit = item.get("unit").and_then(Value::as_str).unwrap_or("");
        let created = item
            .get("created_at")
            .and_then(Value::as_str)
            .unwrap_or("unknown date");
        out.push_str(&format!(
            "  {}. {name} {quantity}{unit} (added {created})\n",
            index + 1
        ));
    }
    out.push_str(&format!(
        "Which one should I {operation}? You can say all of them, the oldest, \
         the latest, or give the item id."
    ));
    out
}

fn render_number(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// The user's answer to the clarification question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStrategy {
    All,
    Oldest,
    Latest,
    ById(String),
    /// The user backed out; the suspended graph is dropped.
    Cancel,
}

impl ReplyStrategy {
    /// Keyword mapping of the free-text reply. Unrecognized replies are
    /// treated as a cancel so the graph never acts on a guess.
    pub fn parse(reply: &str, items: &[Value]) -> ReplyStrategy {
        let lower = reply.to_lowercase();

        for cancel in ["cancel", "やめて", "やめる", "キャンセル", "no thanks"] {
            if lower.contains(cancel) {
                return ReplyStrategy::Cancel;
            }
        }
        for marker in ["全部", "すべて", "全て", "all"] {
            if lower.contains(marker) {
                return ReplyStrategy::All;
            }
        }
        for marker in ["古い", "oldest"] {
            if lower.contains(marker) {
                return ReplyStrategy::Oldest;
            }
        }
        for marker in ["最新", "新しい", "latest", "newest"] {
            if lower.contains(marker) {
                return ReplyStrategy::Latest;
            }
        }

        // An exact item id from the listed candidates.
        for item in items {
            if let Some(id) = item.get("id").and_then(Value::as_str) {
                if reply.contains(id) {
                    return ReplyStrategy::ById(id.to_string());
                }
            }
        }

        ReplyStrategy::Cancel
    }
}

/// Rewrite the suspended task to carry the user's decision.
pub fn rewrite_task(spec: &TaskSpec, strategy: &ReplyStrategy) -> TaskSpec {
    let mut spec = spec.clone();
    match strategy {
        ReplyStrategy::All => {
            spec.parameters
                .insert("strategy".into(), Value::from("by_name_all"));
        }
        ReplyStrategy::Oldest => {
            spec.parameters
                .insert("strategy".into(), Value::from("by_name_oldest"));
        }
        ReplyStrategy::Latest => {
            spec.parameters
                .insert("strategy".into(), Value::from("by_name_latest"));
        }
        ReplyStrategy::ById(id) => {
            spec.parameters
                .insert("strategy".into(), Value::from("by_id"));
            spec.parameters
                .insert("item_identifier".into(), Value::from(id.clone()));
        }
        ReplyStrategy::Cancel => {}
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use kondate_tools::ToolRegistry;
    use serde_json::json;

    fn milk_items() -> Vec<Value> {
        vec![
            json!({"id": "i-1", "item_name": "milk", "quantity": 1, "unit": "bottle", "created_at": "2026-07-01"}),
            json!({"id": "i-2", "item_name": "milk", "quantity": 2, "unit": "bottle", "created_at": "2026-07-10"}),
            json!({"id": "i-3", "item_name": "milk", "quantity": 1, "unit": "carton", "created_at": "2026-07-20"}),
        ]
    }

    #[test]
    fn ambiguity_on_flagged_tool_halts() {
        let registry = ToolRegistry::builtin();
        let update = registry.get("inventory_service.update_inventory").unwrap();
        let outcome = ToolOutcome::Ambiguity {
            message: "multiple rows match milk".into(),
            items: milk_items(),
        };
        let halt = inspect(update, &outcome).expect("should halt");
        assert_eq!(halt.operation, "update");
        assert_eq!(halt.items.len(), 3);
        assert!(halt.question.contains("1. milk 1bottle"));
        assert!(halt.question.contains("the oldest"));
    }

    #[test]
    fn unflagged_tools_never_halt() {
        let registry = ToolRegistry::builtin();
        let proposals = registry.get("recipe_service.generate_proposals").unwrap();
        let outcome = ToolOutcome::Ambiguity {
            message: "spurious".into(),
            items: vec![],
        };
        assert!(inspect(proposals, &outcome).is_none());
    }

    #[test]
    fn plain_failure_is_not_ambiguity() {
        let registry = ToolRegistry::builtin();
        let update = registry.get("inventory_service.update_inventory").unwrap();
        assert!(inspect(update, &ToolOutcome::Failure("No items found".into())).is_none());
    }

    #[test]
    fn reply_strategies() {
        let items = milk_items();
        assert_eq!(ReplyStrategy::parse("the oldest one", &items), ReplyStrategy::Oldest);
        assert_eq!(ReplyStrategy::parse("一番古いやつ", &items), ReplyStrategy::Oldest);
        assert_eq!(ReplyStrategy::parse("all of them", &items), ReplyStrategy::All);
        assert_eq!(ReplyStrategy::parse("最新ので", &items), ReplyStrategy::Latest);
        assert_eq!(
            ReplyStrategy::parse("use i-2 please", &items),
            ReplyStrategy::ById("i-2".into())
        );
        assert_eq!(ReplyStrategy::parse("やめて", &items), ReplyStrategy::Cancel);
        assert_eq!(ReplyStrategy::parse("umm", &items), ReplyStrategy::Cancel);
    }

    #[test]
    fn rewrite_swaps_the_strategy() {
        let spec: TaskSpec = serde_json::from_value(json!({
            "id": "task1",
            "description": "update milk",
            "service": "inventory_service",
            "method": "update_inventory",
            "parameters": {
                "item_identifier": "milk",
                "updates": {"quantity": 1},
                "strategy": "by_name"
            },
            "dependencies": [],
        }))
        .unwrap();

        let oldest = rewrite_task(&spec, &ReplyStrategy::Oldest);
        assert_eq!(oldest.parameters["strategy"], "by_name_oldest");
        // The rest of the call is untouched.
        assert_eq!(oldest.parameters["updates"], json!({"quantity": 1}));

        let by_id = rewrite_task(&spec, &ReplyStrategy::ById("i-3".into()));
        assert_eq!(by_id.parameters["strategy"], "by_id");
        assert_eq!(by_id.parameters["item_identifier"], "i-3");
    }
}
