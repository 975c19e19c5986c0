//! LLM-driven task planning.
//!
//! The planner sends the pattern prompt to the chat model, parses the
//! strict `{"tasks": [...]}` reply, and validates the result against the
//! tool registry before anything executes. One corrective retry is
//! allowed; a second bad reply surfaces as `PlanInvalid`.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use kondate_protocol::{ParamRef, PlanDocument};
use kondate_tools::ToolRegistry;

use crate::error::{AgentError, Result};
use crate::prompt::Prompt;
use crate::provider::{CompletionRequest, LlmProvider};

pub struct Planner {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Planner {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Produce a validated plan for the given prompt.
    pub async fn plan(&self, registry: &ToolRegistry, prompt: &Prompt) -> Result<PlanDocument> {
        match self.attempt(registry, &prompt.system, &prompt.user).await {
            Ok(doc) => Ok(doc),
            Err(first_failure) => {
                warn!(error = %first_failure, "plan rejected, retrying once with corrections");
                let corrective = format!(
                    "{}\n\nYour previous reply was rejected: {}\n\
                     Reply again with ONLY the corrected JSON document.",
                    prompt.user, first_failure
                );
                self.attempt(registry, &prompt.system, &corrective).await
            }
        }
    }

    async fn attempt(
        &self,
        registry: &ToolRegistry,
        system: &str,
        user: &str,
    ) -> Result<PlanDocument> {
        let request = CompletionRequest::new(&self.model, user).with_system(system);
        let response = self.provider.complete(&request).await?;

        let json = extract_json(&response.content)
            .ok_or_else(|| AgentError::MalformedPlan("no JSON document in reply".to_string()))?;
        let doc: PlanDocument =
            serde_json::from_str(json).map_err(|e| AgentError::MalformedPlan(e.to_string()))?;

        let violations = validate_plan(&doc, registry);
        if violations.is_empty() {
            info!(tasks = doc.tasks.len(), provider = self.provider.name(), "plan accepted");
            Ok(doc)
        } else {
            debug!(?violations, "plan rejected");
            Err(AgentError::PlanInvalid(violations.join("; ")))
        }
    }
}

/// Pull the JSON document out of the model reply, tolerating code fences
/// and surrounding prose.
fn extract_json(content: &str) -> Option<&str> {
    let trimmed = content.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }
    if let Some(fenced) = trimmed.split("```json").nth(1) {
        if let Some(body) = fenced.split("```").next() {
            return Some(body.trim());
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (start < end).then(|| &trimmed[start..=end])
}

/// Structural validation of a parsed plan.
///
/// Returns every violation found, so the corrective retry can name them
/// all at once.
pub fn validate_plan(doc: &PlanDocument, registry: &ToolRegistry) -> Vec<String> {
    let mut violations = Vec::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for (index, task) in doc.tasks.iter().enumerate() {
        let id = task.id.as_str();

        if !is_task_id(id) {
            violations.push(format!("task id '{id}' does not match task<N>"));
        }
        if !seen_ids.insert(id) {
            violations.push(format!("duplicate task id '{id}'"));
        }

        let qualified = task.qualified_method();
        if !registry.contains(&qualified) {
            violations.push(format!("{id}: unknown tool '{qualified}'"));
            continue;
        }

        // Dependencies must point at earlier tasks; earlier-only edges
        // cannot form a cycle.
        let earlier: HashSet<&str> = doc.tasks[..index].iter().map(|t| t.id.as_str()).collect();
        for dep in &task.dependencies {
            if dep == id {
                violations.push(format!("{id}: depends on itself"));
            } else if !earlier.contains(dep.as_str()) {
                violations.push(format!("{id}: dependency '{dep}' is not an earlier task"));
            }
        }

        // Every taskK reference must target a declared dependency.
        let declared: HashSet<&str> = task.dependencies.iter().map(String::as_str).collect();
        for (param, value) in &task.parameters {
            for referenced in ParamRef::parse(value).referenced_tasks() {
                if !declared.contains(referenced) {
                    violations.push(format!(
                        "{id}: parameter '{param}' references '{referenced}' \
                         which is not in dependencies"
                    ));
                }
            }
        }

        // Required parameter names must be present; types are checked at
        // resolution time.
        if let Ok(descriptor) = registry.get(&qualified) {
            for spec in descriptor.required_params() {
                if !task.parameters.contains_key(spec.name) {
                    violations.push(format!(
                        "{id}: missing required parameter '{}'",
                        spec.name
                    ));
                }
            }
        }
    }

    violations
}

fn is_task_id(id: &str) -> bool {
    id.strip_prefix("task")
        .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}
