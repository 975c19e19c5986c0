use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use kondate_core::types::AuthToken;
use kondate_protocol::{ToolEnvelope, ToolOutcome};

use crate::descriptor::ServerKind;
use crate::error::{Result, ToolError};

/// Unified transport the registry dispatches through.
///
/// Implementations must be `Send + Sync`; the executor calls them from
/// several tasks at once.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn call(
        &self,
        server: ServerKind,
        tool: &str,
        params: &Map<String, Value>,
        token: &AuthToken,
    ) -> Result<ToolOutcome>;
}

/// JSON-RPC 2.0 `tools/call` over HTTP — the native protocol of the
/// backend tool servers.
///
/// One base URL per server kind; the bearer token travels in the
/// `Authorization` header so the backend can enforce row ownership.
pub struct JsonRpcTransport {
    client: reqwest::Client,
    inventory_url: String,
    recipe_url: String,
    history_url: String,
    timeout: Duration,
    request_seq: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(
        inventory_url: String,
        recipe_url: String,
        history_url: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            inventory_url,
            recipe_url,
            history_url,
            timeout,
            request_seq: AtomicU64::new(1),
        }
    }

    fn url_for(&self, server: ServerKind) -> Option<&str> {
        match server {
            ServerKind::Inventory => Some(&self.inventory_url),
            ServerKind::Recipe => Some(&self.recipe_url),
            ServerKind::History => Some(&self.history_url),
            // Session tools never reach the wire; the executor answers
            // them from the session store.
            ServerKind::Session => None,
        }
    }
}

#[async_trait]
impl ToolTransport for JsonRpcTransport {
    async fn call(
        &self,
        server: ServerKind,
        tool: &str,
        params: &Map<String, Value>,
        token: &AuthToken,
    ) -> Result<ToolOutcome> {
        let url = self.url_for(server).ok_or_else(|| ToolError::Transport {
            tool: tool.to_string(),
            reason: "session-served tool routed to the wire transport".to_string(),
        })?;

        let id = self.request_seq.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": tool, "arguments": Value::Object(params.clone()) }
        });

        debug!(tool, server = ?server, "calling backend tool");

        let request = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .json(&body)
            .timeout(self.timeout);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(ToolError::Timeout {
                    tool: tool.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
            Err(e) => {
                return Err(ToolError::Transport {
                    tool: tool.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(tool, status = status.as_u16(), body = %text, "tool server error");
            return Err(ToolError::Transport {
                tool: tool.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let reply: Value = response.json().await.map_err(|e| ToolError::MalformedReply {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

        if let Some(err) = reply.get("error") {
            return Err(ToolError::Transport {
                tool: tool.to_string(),
                reason: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("JSON-RPC error")
                    .to_string(),
            });
        }

        parse_rpc_result(tool, &reply)
    }
}

/// Unwrap the JSON-RPC result: the envelope JSON sits in
/// `result.content[0].text`.
fn parse_rpc_result(tool: &str, reply: &Value) -> Result<ToolOutcome> {
    let text = reply
        .get("result")
        .and_then(|r| r.get("content"))
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::MalformedReply {
            tool: tool.to_string(),
            reason: "missing result.content[0].text".to_string(),
        })?;

    let envelope: ToolEnvelope =
        serde_json::from_str(text).map_err(|e| ToolError::MalformedReply {
            tool: tool.to_string(),
            reason: e.to_string(),
        })?;

    Ok(envelope.into_outcome())
}
