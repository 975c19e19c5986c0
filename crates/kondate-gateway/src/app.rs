use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};

use kondate_agent::{Classifier, OpenAiProvider, Planner};
use kondate_channels::ProgressHub;
use kondate_core::config::KondateConfig;
use kondate_engine::{ChatPipeline, StageController};
use kondate_sessions::SessionStore;
use kondate_tools::{JsonRpcTransport, ToolRegistry, ToolTransport};

use crate::auth::{AuthVerifier, IdentityVerifier};

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: KondateConfig,
    pub store: Arc<SessionStore>,
    pub hub: Arc<ProgressHub>,
    pub pipeline: ChatPipeline,
    pub stage: StageController,
    pub auth: Arc<dyn AuthVerifier>,
}

impl AppState {
    /// Wire the production stack from configuration.
    pub fn from_config(config: KondateConfig) -> Self {
        let transport: Arc<dyn ToolTransport> = Arc::new(JsonRpcTransport::new(
            config.services.inventory_url.clone(),
            config.services.recipe_url.clone(),
            config.services.history_url.clone(),
            Duration::from_secs(config.session.tool_timeout_secs),
        ));
        let auth: Arc<dyn AuthVerifier> =
            Arc::new(IdentityVerifier::new(config.services.auth_url.clone()));
        let provider = Arc::new(OpenAiProvider::new(
            config.llm.api_key.clone(),
            Some(config.llm.base_url.clone()),
        ));
        Self::assemble(config, transport, auth, provider)
    }

    /// Wiring with substitutable seams (tests inject fakes here).
    pub fn assemble(
        config: KondateConfig,
        transport: Arc<dyn ToolTransport>,
        auth: Arc<dyn AuthVerifier>,
        provider: Arc<dyn kondate_agent::LlmProvider>,
    ) -> Self {
        let store = Arc::new(SessionStore::new(Duration::from_secs(
            config.session.ttl_secs,
        )));
        let hub = Arc::new(ProgressHub::new(
            config.session.backlog_cap,
            Duration::from_secs(config.session.heartbeat_secs),
        ));
        let registry = Arc::new(ToolRegistry::builtin());

        let pipeline = ChatPipeline::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            Arc::clone(&registry),
            Arc::clone(&transport),
            Classifier::default(),
            Planner::new(provider, config.llm.model.clone()),
            config.llm.model.clone(),
            config.session.max_parallel_tasks,
        );
        let stage = StageController::new(
            Arc::clone(&store),
            Arc::clone(&hub),
            registry,
            transport,
        );

        Self {
            config,
            store,
            hub,
            pipeline,
            stage,
            auth,
        }
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route(
            "/chat/stream/{sse_session_id}",
            get(crate::http::stream::stream_handler),
        )
        .route("/menu/select", post(crate::http::menu::select_handler))
        .route("/menu/save", post(crate::http::menu::save_handler))
        .route("/menu/history", get(crate::http::menu::history_handler))
        .route("/logout", post(crate::http::session::logout_handler))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Map, Value};
    use tower::util::ServiceExt;

    use kondate_agent::{CompletionRequest, CompletionResponse, LlmProvider};
    use kondate_core::config::{GatewayConfig, LlmConfig, ServicesConfig, SessionConfig};
    use kondate_core::types::{AuthToken, UserId};
    use kondate_protocol::ToolOutcome;
    use kondate_tools::{ServerKind, ToolError};

    struct StaticAuth;

    #[async_trait]
    impl AuthVerifier for StaticAuth {
        async fn verify(&self, token: &str) -> Option<UserId> {
            (token == "valid-token").then(|| UserId::from("u-1"))
        }
    }

    struct NullTransport;

    #[async_trait]
    impl ToolTransport for NullTransport {
        async fn call(
            &self,
            _server: ServerKind,
            _tool: &str,
            _params: &Map<String, Value>,
            _token: &AuthToken,
        ) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::Success(Value::Null))
        }
    }

    struct EmptyPlanProvider;

    #[async_trait]
    impl LlmProvider for EmptyPlanProvider {
        fn name(&self) -> &str {
            "empty"
        }

        async fn complete(
            &self,
            _req: &CompletionRequest,
        ) -> kondate_agent::Result<CompletionResponse> {
            Ok(CompletionResponse {
                content: r#"{"tasks": []}"#.into(),
                model: "empty".into(),
                tokens_in: 0,
                tokens_out: 0,
            })
        }
    }

    fn test_config() -> KondateConfig {
        KondateConfig {
            gateway: GatewayConfig::default(),
            llm: LlmConfig {
                api_key: "test".into(),
                model: "gpt-4o-mini".into(),
                base_url: "http://localhost:0".into(),
            },
            services: ServicesConfig {
                inventory_url: "http://localhost:0".into(),
                recipe_url: "http://localhost:0".into(),
                history_url: "http://localhost:0".into(),
                auth_url: "http://localhost:0".into(),
            },
            session: SessionConfig::default(),
        }
    }

    fn router() -> Router {
        let state = Arc::new(AppState::assemble(
            test_config(),
            Arc::new(NullTransport),
            Arc::new(StaticAuth),
            Arc::new(EmptyPlanProvider),
        ));
        build_router(state)
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn health_is_open() {
        let response = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_without_token_is_rejected() {
        let response = router()
            .oneshot(post_json("/chat", None, json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_with_bad_token_is_rejected() {
        let response = router()
            .oneshot(post_json("/chat", Some("forged"), json!({"message": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn greeting_round_trip() {
        let response = router()
            .oneshot(post_json(
                "/chat",
                Some("valid-token"),
                json!({"message": "hello", "sseSessionId": "s-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["model_used"], "gpt-4o-mini");
        assert_eq!(body["user_id"], "u-1");
    }

    #[tokio::test]
    async fn empty_message_is_a_bad_request() {
        let response = router()
            .oneshot(post_json(
                "/chat",
                Some("valid-token"),
                json!({"message": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn selection_on_unknown_session_is_not_found() {
        let response = router()
            .oneshot(post_json(
                "/menu/select",
                Some("valid-token"),
                json!({"task_id": "task3", "selection_index": 0, "sse_session_id": "nope"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
