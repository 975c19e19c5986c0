use serde_json::Map;
use serde_json::Value;
use tracing::debug;

use kondate_core::types::AuthToken;
use kondate_protocol::ToolOutcome;

use crate::descriptor::{ParamKind, ParamSpec, ServerKind, ToolDescriptor};
use crate::error::{Result, ToolError};
use crate::transport::ToolTransport;

/// The complete tool catalog, fixed at startup.
///
/// Parameter contracts mirror the backend servers; the planner prompt is
/// rendered from these same descriptors so prompt and validation cannot
/// drift apart.
const CATALOG: &[ToolDescriptor] = &[
    // ── inventory_service ────────────────────────────────────────────────
    ToolDescriptor {
        service: "inventory_service",
        method: "get_inventory",
        server: ServerKind::Inventory,
        params: &[],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "inventory_service",
        method: "add_inventory",
        server: ServerKind::Inventory,
        params: &[
            ParamSpec::required("item_name", ParamKind::String),
            ParamSpec::required("quantity", ParamKind::Number),
            ParamSpec::optional("unit", ParamKind::String),
            ParamSpec::optional("storage_location", ParamKind::String),
            ParamSpec::optional("expiry_date", ParamKind::String),
        ],
        may_report_ambiguity: false,
        mutating: true,
    },
    ToolDescriptor {
        service: "inventory_service",
        method: "update_inventory",
        server: ServerKind::Inventory,
        params: &[
            ParamSpec::required("item_identifier", ParamKind::String),
            ParamSpec::required("updates", ParamKind::Object),
            ParamSpec::optional("strategy", ParamKind::String),
        ],
        may_report_ambiguity: true,
        mutating: true,
    },
    ToolDescriptor {
        service: "inventory_service",
        method: "delete_inventory",
        server: ServerKind::Inventory,
        params: &[
            ParamSpec::required("item_identifier", ParamKind::String),
            ParamSpec::optional("strategy", ParamKind::String),
        ],
        may_report_ambiguity: true,
        mutating: true,
    },
    // ── recipe_service ───────────────────────────────────────────────────
    ToolDescriptor {
        service: "recipe_service",
        method: "generate_proposals",
        server: ServerKind::Recipe,
        params: &[
            ParamSpec::required("inventory_items", ParamKind::List),
            ParamSpec::required("category", ParamKind::String),
            ParamSpec::optional("user_id", ParamKind::String),
            ParamSpec::optional("main_ingredient", ParamKind::Any),
            ParamSpec::optional("excluded_recipes", ParamKind::List),
            ParamSpec::optional("used_ingredients", ParamKind::List),
            ParamSpec::optional("menu_type", ParamKind::String),
            ParamSpec::optional("menu_category", ParamKind::String),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "recipe_service",
        method: "generate_menu_plan",
        server: ServerKind::Recipe,
        params: &[
            ParamSpec::required("inventory_items", ParamKind::List),
            ParamSpec::optional("user_id", ParamKind::String),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "recipe_service",
        method: "search_menu_from_rag",
        server: ServerKind::Recipe,
        params: &[
            ParamSpec::required("inventory_items", ParamKind::List),
            ParamSpec::optional("user_id", ParamKind::String),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "recipe_service",
        method: "search_recipes_from_web",
        server: ServerKind::Recipe,
        params: &[
            ParamSpec::required("recipe_titles", ParamKind::List),
            ParamSpec::optional("menu_categories", ParamKind::List),
            ParamSpec::optional("menu_source", ParamKind::String),
            ParamSpec::optional("num_results", ParamKind::Number),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "recipe_service",
        method: "get_recipe_history",
        server: ServerKind::Recipe,
        params: &[ParamSpec::optional("user_id", ParamKind::String)],
        may_report_ambiguity: false,
        mutating: false,
    },
    // ── history_service ──────────────────────────────────────────────────
    ToolDescriptor {
        service: "history_service",
        method: "history_get_recent_titles",
        server: ServerKind::History,
        params: &[
            ParamSpec::required("user_id", ParamKind::String),
            ParamSpec::required("category", ParamKind::String),
            ParamSpec::required("days", ParamKind::Number),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
    ToolDescriptor {
        service: "history_service",
        method: "history_add",
        server: ServerKind::History,
        params: &[
            ParamSpec::required("title", ParamKind::String),
            ParamSpec::required("source", ParamKind::String),
            ParamSpec::optional("url", ParamKind::String),
            ParamSpec::optional("ingredients", ParamKind::List),
        ],
        may_report_ambiguity: false,
        mutating: true,
    },
    // ── session_service (answered in-process) ────────────────────────────
    ToolDescriptor {
        service: "session_service",
        method: "session_get_proposed_titles",
        server: ServerKind::Session,
        params: &[
            ParamSpec::required("sse_session_id", ParamKind::String),
            ParamSpec::required("category", ParamKind::String),
        ],
        may_report_ambiguity: false,
        mutating: false,
    },
];

/// Read-only catalog of callable tools, loaded once at startup.
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    /// The built-in catalog.
    pub fn builtin() -> Self {
        Self {
            tools: CATALOG.to_vec(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Look up a tool by `"service.method"`.
    pub fn get(&self, qualified: &str) -> Result<&ToolDescriptor> {
        self.tools
            .iter()
            .find(|t| t.qualified_name() == qualified)
            .ok_or_else(|| ToolError::UnknownTool(qualified.to_string()))
    }

    pub fn contains(&self, qualified: &str) -> bool {
        self.get(qualified).is_ok()
    }

    /// Forward a call to the owning server over the transport.
    ///
    /// Parameter values must already be concrete (references resolved).
    /// Type enforcement happens at resolution; only existence is checked
    /// here.
    pub async fn dispatch(
        &self,
        transport: &dyn ToolTransport,
        qualified: &str,
        params: &Map<String, Value>,
        token: &AuthToken,
    ) -> Result<ToolOutcome> {
        let descriptor = self.get(qualified)?;
        debug!(tool = %qualified, server = ?descriptor.server, "dispatching tool");
        transport
            .call(descriptor.server, descriptor.method, params, token)
            .await
    }
}
