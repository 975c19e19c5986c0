use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18920;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Sessions idle longer than this are evicted.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
/// Simultaneous tool calls per graph.
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 4;
/// Wall-clock budget for a single tool dispatch.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 120;
/// Heartbeat cadence on an idle progress stream.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 30;
/// Progress events buffered per session while no subscriber is attached.
pub const DEFAULT_BACKLOG_CAP: usize = 64;

/// Top-level config (kondate.toml + KONDATE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KondateConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

/// Chat model used by the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
}

/// Base URLs of the backend tool servers.
///
/// Every tool dispatch goes to exactly one of these; the registry decides
/// which one owns a given tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub inventory_url: String,
    pub recipe_url: String,
    pub history_url: String,
    /// Identity provider endpoint that validates bearer tokens.
    pub auth_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_parallel")]
    pub max_parallel_tasks: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_backlog_cap")]
    pub backlog_cap: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            backlog_cap: DEFAULT_BACKLOG_CAP,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ttl() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}
fn default_parallel() -> usize {
    DEFAULT_MAX_PARALLEL_TASKS
}
fn default_tool_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}
fn default_heartbeat() -> u64 {
    DEFAULT_HEARTBEAT_SECS
}
fn default_backlog_cap() -> usize {
    DEFAULT_BACKLOG_CAP
}

impl KondateConfig {
    /// Load config from a TOML file with KONDATE_* env var overrides.
    ///
    /// Mandatory values (LLM key, backend service URLs) must be present
    /// after the merge; startup aborts otherwise.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: KondateConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KONDATE_").split("__"))
            .extract()
            .map_err(|e| crate::error::KondateError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::error::Result<()> {
        let mut missing = Vec::new();
        if self.llm.api_key.trim().is_empty() {
            missing.push("llm.api_key");
        }
        if self.services.inventory_url.trim().is_empty() {
            missing.push("services.inventory_url");
        }
        if self.services.recipe_url.trim().is_empty() {
            missing.push("services.recipe_url");
        }
        if self.services.history_url.trim().is_empty() {
            missing.push("services.history_url");
        }
        if self.services.auth_url.trim().is_empty() {
            missing.push("services.auth_url");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(crate::error::KondateError::Config(format!(
                "missing mandatory configuration: {}",
                missing.join(", ")
            )))
        }
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kondate/kondate.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> KondateConfig {
        KondateConfig {
            gateway: GatewayConfig::default(),
            llm: LlmConfig {
                api_key: "key".into(),
                model: default_model(),
                base_url: default_llm_base_url(),
            },
            services: ServicesConfig {
                inventory_url: "http://localhost:8101".into(),
                recipe_url: "http://localhost:8102".into(),
                history_url: "http://localhost:8103".into(),
                auth_url: "http://localhost:8100".into(),
            },
            session: SessionConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let mut cfg = minimal();
        cfg.llm.api_key = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("llm.api_key"));
    }

    #[test]
    fn missing_service_url_is_rejected() {
        let mut cfg = minimal();
        cfg.services.recipe_url = "  ".into();
        assert!(cfg.validate().is_err());
    }
}
