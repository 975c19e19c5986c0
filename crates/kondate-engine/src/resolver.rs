//! Parameter resolution: reference strings to concrete values.
//!
//! A task's parameter map may contain reference strings pointing at
//! earlier results or at session context. References are parsed once into
//! [`ParamRef`] and resolved structurally; any failure fails the task
//! before the tool is ever called.

use serde_json::{Map, Value};

use kondate_protocol::{ParamRef, PathSeg, TaskSpec};
use kondate_sessions::SessionContext;
use kondate_tools::{ParamKind, ToolDescriptor};

use crate::error::{EngineError, Result};

/// Resolve every parameter of `spec` into a concrete call map.
pub fn resolve_parameters(
    spec: &TaskSpec,
    descriptor: &ToolDescriptor,
    results: &Map<String, Value>,
    context: &SessionContext,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for (name, raw) in &spec.parameters {
        let parsed = ParamRef::parse(raw);
        let value = resolve_ref(&parsed, results, context).map_err(|reason| {
            EngineError::ParameterResolution(format!(
                "{}.{name}: {reason}",
                spec.id
            ))
        })?;

        let value = match descriptor.param(name) {
            Some(param_spec) => {
                coerce(value, param_spec.kind, param_spec.required).map_err(|reason| {
                    EngineError::ParameterResolution(format!("{}.{name}: {reason}", spec.id))
                })?
            }
            // Parameters the descriptor does not declare pass through;
            // the backend validates its own extras.
            None => value,
        };

        out.insert(name.clone(), value);
    }
    Ok(out)
}

fn resolve_ref(
    parsed: &ParamRef,
    results: &Map<String, Value>,
    context: &SessionContext,
) -> std::result::Result<Value, String> {
    match parsed {
        ParamRef::Literal(value) => Ok(value.clone()),
        ParamRef::SessionRef { key } => context
            .get(key)
            .ok_or_else(|| format!("unknown session context key '{key}'")),
        ParamRef::TaskRef { task_id, path } => {
            let root = results
                .get(task_id)
                .ok_or_else(|| format!("no result recorded for '{task_id}'"))?;
            walk_path(root, path, task_id)
        }
        ParamRef::Union(left, right) => {
            let left = resolve_ref(left, results, context)?;
            let right = resolve_ref(right, results, context)?;
            union_sequences(left, right)
        }
    }
}

/// Walk dotted path segments into a result envelope.
///
/// One documented convenience: when the final segment is `candidates` and
/// it lands on a sequence of objects carrying a `title`, the resolver
/// extracts the titles. This is the contract behind
/// `"recipe_titles": "taskK.result.data.candidates"`.
fn walk_path(
    root: &Value,
    path: &[PathSeg],
    task_id: &str,
) -> std::result::Result<Value, String> {
    let mut current = root;
    for (position, seg) in path.iter().enumerate() {
        let is_last = position + 1 == path.len();
        match seg {
            PathSeg::Key(key) => {
                current = current.get(key).ok_or_else(|| {
                    format!("'{task_id}.result' has no field '{key}' on the path")
                })?;
                if is_last && key == "candidates" {
                    if let Some(titles) = extract_titles(current) {
                        return Ok(titles);
                    }
                }
            }
            PathSeg::Index(index) => {
                current = current.get(index).ok_or_else(|| {
                    format!("'{task_id}.result' has no element {index} on the path")
                })?;
            }
        }
    }
    Ok(current.clone())
}

fn extract_titles(value: &Value) -> Option<Value> {
    let entries = value.as_array()?;
    let titles: Option<Vec<Value>> = entries
        .iter()
        .map(|entry| entry.get("title").filter(|t| t.is_string()).cloned())
        .collect();
    titles.map(Value::Array)
}

/// `a + b`: both sides must be sequences; left first, duplicates removed
/// preserving first occurrence.
fn union_sequences(left: Value, right: Value) -> std::result::Result<Value, String> {
    let (Value::Array(left), Value::Array(right)) = (left, right) else {
        return Err("both sides of '+' must resolve to sequences".to_string());
    };
    let mut out: Vec<Value> = Vec::with_capacity(left.len() + right.len());
    for item in left.into_iter().chain(right) {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::Array(out))
}

/// Type check with one obvious coercion: a numeric string becomes a
/// number when the tool declares a number. Semantic mismatches stay
/// errors.
fn coerce(
    value: Value,
    kind: ParamKind,
    required: bool,
) -> std::result::Result<Value, String> {
    if value.is_null() && !required {
        return Ok(value);
    }
    match kind {
        ParamKind::Any => Ok(value),
        ParamKind::String => value
            .is_string()
            .then_some(value)
            .ok_or_else(|| "expected a string".to_string()),
        ParamKind::Boolean => value
            .is_boolean()
            .then_some(value)
            .ok_or_else(|| "expected a boolean".to_string()),
        ParamKind::Object => value
            .is_object()
            .then_some(value)
            .ok_or_else(|| "expected an object".to_string()),
        ParamKind::List => value
            .is_array()
            .then_some(value)
            .ok_or_else(|| "expected a sequence".to_string()),
        ParamKind::Number => {
            if value.is_number() {
                return Ok(value);
            }
            if let Some(s) = value.as_str() {
                if let Ok(n) = s.trim().parse::<i64>() {
                    return Ok(Value::from(n));
                }
                if let Ok(f) = s.trim().parse::<f64>() {
                    if let Some(n) = serde_json::Number::from_f64(f) {
                        return Ok(Value::Number(n));
                    }
                }
            }
            Err("expected a number".to_string())
        }
    }
}
