//! The top-level chat turn.
//!
//! One call per inbound message: classify, plan (or resume a suspended
//! graph), execute, format, persist session changes. At most one graph is
//! active per session; a second message while one runs is refused with
//! `BusySession` unless the graph is suspended waiting for the user, in
//! which case the message IS the answer.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use kondate_agent::{
    build_prompt, Classified, Classifier, Planner, PromptContext, RequestPattern,
};
use kondate_channels::ProgressHub;
use kondate_core::types::{AuthToken, SessionId, UserId};
use kondate_protocol::{ChatResponse, ProgressEvent};
use kondate_sessions::{Confirmation, Session, SessionStore};
use kondate_tools::{ToolRegistry, ToolTransport};

use crate::ambiguity::{rewrite_task, ReplyStrategy};
use crate::error::{EngineError, Result};
use crate::executor::{Executor, RunOutcome};
use crate::formatter;
use crate::graph::TaskGraph;

/// Result of one chat turn.
#[derive(Debug)]
pub struct ChatTurn {
    pub session_id: String,
    pub response: ChatResponse,
}

pub struct ChatPipeline {
    store: Arc<SessionStore>,
    hub: Arc<ProgressHub>,
    registry: Arc<ToolRegistry>,
    classifier: Classifier,
    planner: Planner,
    executor: Executor,
    model: String,
    /// Sessions with a graph in flight; the token cancels it.
    active: DashMap<String, CancellationToken>,
}

impl ChatPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        hub: Arc<ProgressHub>,
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn ToolTransport>,
        classifier: Classifier,
        planner: Planner,
        model: impl Into<String>,
        max_parallel: usize,
    ) -> Self {
        let executor = Executor::new(
            Arc::clone(&registry),
            transport,
            Arc::clone(&hub),
            max_parallel,
        );
        Self {
            store,
            hub,
            registry,
            classifier,
            planner,
            executor,
            model: model.into(),
            active: DashMap::new(),
        }
    }

    /// Cancel the in-flight graph of a session, if any. Used on eviction.
    pub fn cancel_session(&self, session_id: &str) {
        if let Some((_, token)) = self.active.remove(session_id) {
            token.cancel();
        }
    }

    /// Process one user message.
    #[instrument(skip(self, message, token), fields(user = %user_id))]
    pub async fn handle(
        &self,
        message: &str,
        user_id: &UserId,
        token: &AuthToken,
        session_id: Option<String>,
    ) -> Result<ChatTurn> {
        let session_id = session_id.unwrap_or_else(|| SessionId::new().0);

        // One active graph per session. A suspended graph is not active
        // (its executor has returned), so a confirmation reply passes.
        let cancel = CancellationToken::new();
        match self.active.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(EngineError::BusySession),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }

        let result = self
            .handle_inner(message, user_id, token, &session_id, cancel)
            .await;
        self.active.remove(&session_id);

        result.map(|response| ChatTurn {
            session_id,
            response,
        })
    }

    async fn handle_inner(
        &self,
        message: &str,
        user_id: &UserId,
        token: &AuthToken,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<ChatResponse> {
        let handle = self.store.get_or_create(session_id, user_id).await?;

        let classified = {
            let session = handle.lock().await;
            self.classifier.classify(message, &session)
        };
        info!(pattern = ?classified.pattern, "message classified");

        let mut graph = match classified.pattern {
            RequestPattern::ConfirmationReply => {
                match self.resume_graph(message, &handle).await? {
                    Some(graph) => graph,
                    None => {
                        // The user backed out; the graph is dropped.
                        let response = ChatResponse {
                            response: "Okay, I cancelled that request.".to_string(),
                            success: true,
                            model_used: self.model.clone(),
                            user_id: user_id.to_string(),
                            ..Default::default()
                        };
                        self.publish_complete(session_id, &response);
                        return Ok(response);
                    }
                }
            }
            RequestPattern::GreetingOrUnknown => {
                let response = formatter::format_greeting(&self.model, user_id.as_str());
                self.publish_complete(session_id, &response);
                return Ok(response);
            }
            _ => self.plan_graph(message, user_id, session_id, &classified, &handle).await?,
        };

        if graph.is_empty() {
            // The planner decided no tools are needed.
            let response = formatter::format_greeting(&self.model, user_id.as_str());
            self.publish_complete(session_id, &response);
            return Ok(response);
        }

        let outcome = self
            .executor
            .run(&mut graph, Arc::clone(&handle), token.clone(), cancel)
            .await?;

        match outcome {
            RunOutcome::Completed => {
                let mut session = handle.lock().await;
                session.confirmation = None;
                let response = formatter::format_completed(
                    &graph,
                    &mut session,
                    &self.model,
                    user_id.as_str(),
                );
                drop(session);
                self.publish_complete(session_id, &response);
                Ok(response)
            }
            RunOutcome::Suspended {
                task_id,
                halt,
                remaining,
                completed,
            } => {
                let mut session = handle.lock().await;
                session.confirmation = Some(Confirmation::Ambiguity {
                    original_request: message.to_string(),
                    question: halt.question.clone(),
                    task_id,
                    items: halt.items,
                    operation: halt.operation,
                    remaining,
                    completed,
                    timestamp: Utc::now(),
                });
                let response = formatter::format_suspended(
                    &halt.question,
                    &session,
                    &self.model,
                    user_id.as_str(),
                );
                drop(session);
                // Terminal event so the stream closes; the client re-opens
                // it when the user answers.
                self.hub.publish(
                    session_id,
                    ProgressEvent::complete(json!({
                        "requires_user_input": true,
                        "question": response.response,
                    })),
                );
                Ok(response)
            }
            RunOutcome::Failed { task_id, message } => {
                warn!(task = %task_id, error = %message, "graph failed");
                // The executor already published the error event; the next
                // turn starts from a clean slate.
                handle.lock().await.confirmation = None;
                Ok(formatter::format_failed(&self.model, user_id.as_str()))
            }
        }
    }

    /// Plan a fresh graph for a non-resumption pattern.
    async fn plan_graph(
        &self,
        message: &str,
        user_id: &UserId,
        session_id: &str,
        classified: &Classified,
        handle: &Arc<Mutex<Session>>,
    ) -> Result<TaskGraph> {
        let context = {
            let mut session = handle.lock().await;
            if let Some(ingredient) = &classified.main_ingredient {
                session.context.main_ingredient = Some(ingredient.clone());
            }
            PromptContext {
                user_request: message.to_string(),
                user_id: user_id.to_string(),
                sse_session_id: session_id.to_string(),
                main_ingredient: classified.main_ingredient.clone(),
                used_ingredients: session.used_ingredients.clone(),
                menu_category: Some(session.menu_category),
            }
        };

        let prompt = build_prompt(classified.pattern, &self.registry, &context);
        let doc = self.planner.plan(&self.registry, &prompt).await?;
        Ok(TaskGraph::new(doc))
    }

    /// Turn a confirmation reply into the resumed graph, or `None` when
    /// the user cancelled.
    async fn resume_graph(
        &self,
        reply: &str,
        handle: &Arc<Mutex<Session>>,
    ) -> Result<Option<TaskGraph>> {
        let mut session = handle.lock().await;
        let Some(Confirmation::Ambiguity {
            items,
            remaining,
            completed,
            task_id,
            ..
        }) = session.confirmation.take()
        else {
            return Err(EngineError::Internal(
                "confirmation reply without a pending confirmation".to_string(),
            ));
        };

        let strategy = ReplyStrategy::parse(reply, &items);
        info!(task = %task_id, ?strategy, "resuming suspended graph");
        if strategy == ReplyStrategy::Cancel {
            return Ok(None);
        }

        let mut specs = remaining;
        if let Some(first) = specs.first_mut() {
            *first = rewrite_task(first, &strategy);
        }
        Ok(Some(TaskGraph::with_preloaded(specs, completed)))
    }

    fn publish_complete(&self, session_id: &str, response: &ChatResponse) {
        let payload = serde_json::to_value(response).unwrap_or(json!({}));
        self.hub
            .publish(session_id, ProgressEvent::complete(payload));
    }
}
