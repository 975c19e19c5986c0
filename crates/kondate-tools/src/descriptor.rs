use serde::{Deserialize, Serialize};

/// Which backend answers a tool call.
///
/// `Session` tools are answered in-process from the session store; the
/// other three go over the wire to their configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Inventory,
    Recipe,
    History,
    Session,
}

/// Declared type of a tool parameter.
///
/// Checked at resolution time, not at dispatch; `Number` additionally
/// permits a numeric string which the resolver coerces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    List,
    Object,
    Any,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub required: bool,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            required: true,
            kind,
        }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            required: false,
            kind,
        }
    }
}

/// One entry of the static tool catalog.
#[derive(Debug, Clone, Copy)]
pub struct ToolDescriptor {
    /// Logical service group, e.g. `"inventory_service"`.
    pub service: &'static str,
    /// Operation within the service, e.g. `"update_inventory"`.
    pub method: &'static str,
    pub server: ServerKind,
    pub params: &'static [ParamSpec],
    /// True for tools that may answer with the multiple-matches question
    /// instead of acting.
    pub may_report_ambiguity: bool,
    /// Mutating calls are at-most-once; only reads may be retried.
    pub mutating: bool,
}

impl ToolDescriptor {
    /// Registry lookup key, `"service.method"`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.method)
    }

    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }
}
