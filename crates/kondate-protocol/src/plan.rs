use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of the planner's task graph, as exchanged with the chat model.
///
/// `parameters` values are either literals or reference strings
/// (`"taskK.result"`, `"taskK.result.path.to.field"`,
/// `"session.context.X"`, or the `a + b` union form); the executor parses
/// them lazily, the wire shape stays untyped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub id: String,
    pub description: String,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSpec {
    /// `"service.method"`, the registry lookup key.
    pub fn qualified_method(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }
}

/// The complete planner reply: `{"tasks": [...]}`.
///
/// Unknown top-level keys and unknown per-task keys are ignored; a missing
/// `tasks` array or a task missing a required key is a parse error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    pub tasks: Vec<TaskSpec>,
}

impl PlanDocument {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
