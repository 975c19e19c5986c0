use serde_json::Value;

/// One segment of a dotted result path: an object key or a sequence index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSeg {
    Key(String),
    Index(usize),
}

/// A parsed parameter value.
///
/// Reference strings are a duck-typed convention on the wire
/// (`"task2.result.data"`, `"session.context.inventory_items"`, the
/// `a + b` union form); they are parsed once into this sum and consumed
/// structurally from then on.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamRef {
    Literal(Value),
    TaskRef { task_id: String, path: Vec<PathSeg> },
    SessionRef { key: String },
    Union(Box<ParamRef>, Box<ParamRef>),
}

impl ParamRef {
    /// Parse a parameter value into its reference form.
    ///
    /// Anything that is not a string, or is a string without the
    /// `taskK.result` / `session.context.` shape, passes through as a
    /// literal.
    pub fn parse(value: &Value) -> ParamRef {
        let Some(s) = value.as_str() else {
            return ParamRef::Literal(value.clone());
        };
        Self::parse_str(s).unwrap_or_else(|| ParamRef::Literal(value.clone()))
    }

    fn parse_str(s: &str) -> Option<ParamRef> {
        let trimmed = s.trim();

        // Exactly one `+` union of two task references.
        if let Some((left, right)) = trimmed.split_once('+') {
            let left = Self::parse_str(left.trim())?;
            let right = Self::parse_str(right.trim())?;
            if matches!(left, ParamRef::TaskRef { .. }) && matches!(right, ParamRef::TaskRef { .. })
            {
                return Some(ParamRef::Union(Box::new(left), Box::new(right)));
            }
            return None;
        }

        if let Some(key) = trimmed.strip_prefix("session.context.") {
            if !key.is_empty() && !key.contains(char::is_whitespace) {
                return Some(ParamRef::SessionRef {
                    key: key.to_string(),
                });
            }
            return None;
        }

        // taskK.result[.path...]
        let rest = trimmed.strip_prefix("task")?;
        let digits_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits_len == 0 {
            return None;
        }
        let task_id = format!("task{}", &rest[..digits_len]);
        let after = &rest[digits_len..];
        let path_str = if after == ".result" {
            ""
        } else {
            after.strip_prefix(".result.")?
        };

        let path = path_str
            .split('.')
            .filter(|seg| !seg.is_empty())
            .map(|seg| match seg.parse::<usize>() {
                Ok(index) => PathSeg::Index(index),
                Err(_) => PathSeg::Key(seg.to_string()),
            })
            .collect();

        Some(ParamRef::TaskRef { task_id, path })
    }

    /// Task ids this value references, for dependency validation.
    pub fn referenced_tasks(&self) -> Vec<&str> {
        match self {
            ParamRef::Literal(_) | ParamRef::SessionRef { .. } => Vec::new(),
            ParamRef::TaskRef { task_id, .. } => vec![task_id.as_str()],
            ParamRef::Union(a, b) => {
                let mut out = a.referenced_tasks();
                out.extend(b.referenced_tasks());
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_values_are_literals() {
        assert_eq!(ParamRef::parse(&json!(4)), ParamRef::Literal(json!(4)));
        assert_eq!(
            ParamRef::parse(&json!("green pepper")),
            ParamRef::Literal(json!("green pepper"))
        );
        assert_eq!(
            ParamRef::parse(&json!(["a", "b"])),
            ParamRef::Literal(json!(["a", "b"]))
        );
    }

    #[test]
    fn bare_result_reference() {
        assert_eq!(
            ParamRef::parse(&json!("task1.result")),
            ParamRef::TaskRef {
                task_id: "task1".into(),
                path: vec![]
            }
        );
    }

    #[test]
    fn dotted_path_with_index() {
        assert_eq!(
            ParamRef::parse(&json!("task3.result.data.candidates.0")),
            ParamRef::TaskRef {
                task_id: "task3".into(),
                path: vec![
                    PathSeg::Key("data".into()),
                    PathSeg::Key("candidates".into()),
                    PathSeg::Index(0)
                ]
            }
        );
    }

    #[test]
    fn session_context_reference() {
        assert_eq!(
            ParamRef::parse(&json!("session.context.inventory_items")),
            ParamRef::SessionRef {
                key: "inventory_items".into()
            }
        );
    }

    #[test]
    fn union_of_two_task_refs() {
        let parsed = ParamRef::parse(&json!("task1.result.data + task2.result.data"));
        match parsed {
            ParamRef::Union(left, right) => {
                assert_eq!(left.referenced_tasks(), vec!["task1"]);
                assert_eq!(right.referenced_tasks(), vec!["task2"]);
            }
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn malformed_references_fall_back_to_literal() {
        for s in [
            "taskX.result",
            "task1.output",
            "session.context.",
            "task1.result.data + inventory",
        ] {
            assert!(
                matches!(ParamRef::parse(&json!(s)), ParamRef::Literal(_)),
                "expected literal for {s}"
            );
        }
    }

    #[test]
    fn task_word_is_a_literal() {
        // A string merely starting with "task" is not a reference.
        assert!(matches!(
            ParamRef::parse(&json!("task force")),
            ParamRef::Literal(_)
        ));
    }
}
