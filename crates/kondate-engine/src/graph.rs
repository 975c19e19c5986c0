use serde_json::{Map, Value};

use kondate_protocol::{PlanDocument, TaskSpec};

/// Runtime state of one graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub spec: TaskSpec,
    pub state: TaskState,
    /// The tool's result envelope, set on success.
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// A dependency-ordered task graph, consumed and mutated only by the
/// executor.
///
/// `preloaded` carries results of tasks completed before a suspension;
/// they satisfy dependencies and resolve references exactly as if the
/// tasks had run in this graph.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    preloaded: Map<String, Value>,
}

impl TaskGraph {
    pub fn new(doc: PlanDocument) -> Self {
        Self::with_preloaded(doc.tasks, Map::new())
    }

    /// Rebuild a graph from a suspension snapshot.
    pub fn with_preloaded(specs: Vec<TaskSpec>, preloaded: Map<String, Value>) -> Self {
        let nodes = specs
            .into_iter()
            .map(|spec| TaskNode {
                spec,
                state: TaskState::Pending,
                result: None,
                error: None,
            })
            .collect();
        Self { nodes, preloaded }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.iter().find(|n| n.spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        self.nodes.iter_mut().find(|n| n.spec.id == id)
    }

    fn dependency_succeeded(&self, dep: &str) -> bool {
        self.preloaded.contains_key(dep)
            || self
                .get(dep)
                .map(|n| n.state == TaskState::Succeeded)
                .unwrap_or(false)
    }

    /// Pending tasks whose dependencies have all succeeded.
    pub fn ready(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| n.state == TaskState::Pending)
            .filter(|n| {
                n.spec
                    .dependencies
                    .iter()
                    .all(|dep| self.dependency_succeeded(dep))
            })
            .map(|n| n.spec.id.clone())
            .collect()
    }

    pub fn mark_running(&mut self, id: &str) {
        if let Some(node) = self.get_mut(id) {
            node.state = TaskState::Running;
        }
    }

    pub fn record_success(&mut self, id: &str, envelope: Value) {
        if let Some(node) = self.get_mut(id) {
            node.state = TaskState::Succeeded;
            node.result = Some(envelope);
        }
    }

    pub fn record_failure(&mut self, id: &str, message: impl Into<String>) {
        if let Some(node) = self.get_mut(id) {
            node.state = TaskState::Failed;
            node.error = Some(message.into());
        }
    }

    /// Mark every not-yet-started task downstream of `failed_id` (directly
    /// or transitively) as skipped.
    pub fn skip_downstream(&mut self, failed_id: &str) {
        let mut tainted: Vec<String> = vec![failed_id.to_string()];
        loop {
            let next: Vec<String> = self
                .nodes
                .iter()
                .filter(|n| n.state == TaskState::Pending)
                .filter(|n| n.spec.dependencies.iter().any(|d| tainted.contains(d)))
                .map(|n| n.spec.id.clone())
                .collect();
            if next.is_empty() {
                break;
            }
            for id in &next {
                if let Some(node) = self.get_mut(id) {
                    node.state = TaskState::Skipped;
                }
                tainted.push(id.clone());
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == TaskState::Running)
            .count()
    }

    pub fn succeeded_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.state == TaskState::Succeeded)
            .count()
    }

    /// Result envelopes visible to resolvers: preloaded snapshot entries
    /// plus everything succeeded in this run.
    pub fn results(&self) -> Map<String, Value> {
        let mut out = self.preloaded.clone();
        for node in &self.nodes {
            if let Some(result) = &node.result {
                out.insert(node.spec.id.clone(), result.clone());
            }
        }
        out
    }

    /// Specs that have not succeeded, for a suspension snapshot. The
    /// `first` id is placed at the front (it is the task resumption will
    /// rewrite).
    pub fn unfinished_specs(&self, first: &str) -> Vec<TaskSpec> {
        let mut out = Vec::new();
        if let Some(node) = self.get(first) {
            out.push(node.spec.clone());
        }
        for node in &self.nodes {
            if node.spec.id != first && node.state != TaskState::Succeeded {
                out.push(node.spec.clone());
            }
        }
        out
    }

    /// Done when nothing is pending or running.
    pub fn is_done(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| !matches!(n.state, TaskState::Pending | TaskState::Running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: &str, deps: &[&str]) -> TaskSpec {
        serde_json::from_value(json!({
            "id": id,
            "description": id,
            "service": "inventory_service",
            "method": "get_inventory",
            "parameters": {},
            "dependencies": deps,
        }))
        .unwrap()
    }

    fn diamond() -> TaskGraph {
        TaskGraph::with_preloaded(
            vec![
                spec("task1", &[]),
                spec("task2", &["task1"]),
                spec("task3", &["task1"]),
                spec("task4", &["task2", "task3"]),
            ],
            Map::new(),
        )
    }

    #[test]
    fn ready_set_follows_dependencies() {
        let mut graph = diamond();
        assert_eq!(graph.ready(), vec!["task1"]);

        graph.record_success("task1", json!({"success": true}));
        assert_eq!(graph.ready(), vec!["task2", "task3"]);

        graph.record_success("task2", json!({"success": true}));
        assert_eq!(graph.ready(), vec!["task3"]);

        graph.record_success("task3", json!({"success": true}));
        assert_eq!(graph.ready(), vec!["task4"]);
    }

    #[test]
    fn failure_skips_transitive_downstream() {
        let mut graph = diamond();
        graph.record_success("task1", json!({"success": true}));
        graph.mark_running("task2");
        graph.record_failure("task2", "boom");
        graph.skip_downstream("task2");

        assert_eq!(graph.get("task4").unwrap().state, TaskState::Skipped);
        // task3 does not depend on task2 and stays runnable.
        assert_eq!(graph.ready(), vec!["task3"]);
    }

    #[test]
    fn preloaded_results_satisfy_dependencies() {
        let mut preloaded = Map::new();
        preloaded.insert("task1".to_string(), json!({"success": true, "data": []}));
        let graph = TaskGraph::with_preloaded(vec![spec("task2", &["task1"])], preloaded);

        assert_eq!(graph.ready(), vec!["task2"]);
        assert!(graph.results().contains_key("task1"));
    }

    #[test]
    fn unfinished_specs_put_the_named_task_first() {
        let mut graph = diamond();
        graph.record_success("task1", json!({"success": true}));
        graph.mark_running("task2");

        let specs = graph.unfinished_specs("task3");
        let ids: Vec<&str> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["task3", "task2", "task4"]);
    }
}
