//! Topological execution of a task graph.
//!
//! Ready tasks run concurrently under a per-session parallelism cap; a
//! task observes the results of exactly its declared dependencies.
//! Progress events stream after each task. Ambiguity suspends the graph
//! for user confirmation; any other failure cancels the not-yet-started
//! downstream tasks and surfaces an error event.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kondate_channels::ProgressHub;
use kondate_core::types::AuthToken;
use kondate_protocol::{ProgressEvent, TaskSpec, ToolOutcome};
use kondate_sessions::{Session, Stage};
use kondate_tools::{ServerKind, ToolRegistry, ToolTransport};

use crate::ambiguity::{self, AmbiguityHalt};
use crate::error::{EngineError, Result};
use crate::graph::TaskGraph;
use crate::resolver;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every task succeeded; results are on the graph.
    Completed,
    /// An ambiguity halted the graph; the orchestrator persists the
    /// snapshot into the session and asks the user.
    Suspended {
        task_id: String,
        halt: AmbiguityHalt,
        /// Unfinished task specs, the suspended task first.
        remaining: Vec<TaskSpec>,
        /// Results completed before the suspension.
        completed: Map<String, Value>,
    },
    /// A task failed; downstream tasks were skipped.
    Failed { task_id: String, message: String },
}

pub struct Executor {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn ToolTransport>,
    hub: Arc<ProgressHub>,
    max_parallel: usize,
}

impl Executor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn ToolTransport>,
        hub: Arc<ProgressHub>,
        max_parallel: usize,
    ) -> Self {
        Self {
            registry,
            transport,
            hub,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Run one graph to completion, suspension, or failure.
    ///
    /// Exactly one graph runs per session at a time; the orchestrator
    /// enforces that. Cancellation aborts in-flight calls on a best-effort
    /// basis and publishes nothing further.
    pub async fn run(
        &self,
        graph: &mut TaskGraph,
        session: Arc<Mutex<Session>>,
        token: AuthToken,
        cancel: CancellationToken,
    ) -> Result<RunOutcome> {
        let session_id = session.lock().await.id.clone();
        let total = graph.len().max(1);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<(String, Result<ToolOutcome>)> = JoinSet::new();

        for id in graph.ready() {
            if let Err(failure) = self
                .spawn_task(graph, &id, &session, &session_id, &token, &cancel, &semaphore, &mut join_set, total)
                .await
            {
                return self.fail_stop(graph, &session_id, &id, failure, &mut join_set);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            let (id, outcome) = match joined {
                Ok(pair) => pair,
                // Aborted sibling tasks surface here after a fail-stop
                // decision was already taken; plain panics are internal.
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => return Err(EngineError::Internal(join_error.to_string())),
            };

            match outcome {
                Ok(ToolOutcome::Success(data)) => {
                    graph.record_success(&id, json!({ "success": true, "data": data }));
                    let percent = (graph.succeeded_count() * 100 / total) as u8;
                    let description = graph
                        .get(&id)
                        .map(|n| n.spec.description.clone())
                        .unwrap_or_default();
                    self.hub.publish(
                        &session_id,
                        ProgressEvent::progress(&id, percent, &format!("finished {description}")),
                    );
                    debug!(task = %id, percent, "task finished");

                    for ready in graph.ready() {
                        if let Err(failure) = self
                            .spawn_task(graph, &ready, &session, &session_id, &token, &cancel, &semaphore, &mut join_set, total)
                            .await
                        {
                            return self.fail_stop(graph, &session_id, &ready, failure, &mut join_set);
                        }
                    }
                }
                Ok(ambiguous @ ToolOutcome::Ambiguity { .. }) => {
                    let node = graph
                        .get(&id)
                        .ok_or_else(|| EngineError::Internal(format!("unknown task {id}")))?;
                    let descriptor = self.registry.get(&node.spec.qualified_method())?;
                    let Some(halt) = ambiguity::inspect(descriptor, &ambiguous) else {
                        // A tool not flagged for ambiguity answered with
                        // the marker anyway; treat as a plain failure.
                        let message = "unexpected ambiguity reply".to_string();
                        return self.fail_stop(
                            graph,
                            &session_id,
                            &id,
                            EngineError::TaskFailed { task: id.clone(), message },
                            &mut join_set,
                        );
                    };

                    // The tool itself succeeded: it found the conflict.
                    let ToolOutcome::Ambiguity { message, items } = ambiguous else {
                        unreachable!()
                    };
                    graph.record_success(
                        &id,
                        json!({
                            "success": false,
                            "error": kondate_protocol::tool::AMBIGUITY_MARKER,
                            "message": message,
                            "items": items,
                        }),
                    );

                    join_set.abort_all();
                    let remaining = graph.unfinished_specs(&id);
                    let mut completed = graph.results();
                    // The suspended task re-runs after the rewrite; its
                    // marker envelope must not satisfy dependencies.
                    completed.remove(&id);

                    info!(task = %id, "graph suspended for user confirmation");
                    return Ok(RunOutcome::Suspended {
                        task_id: id,
                        halt,
                        remaining,
                        completed,
                    });
                }
                Ok(ToolOutcome::Failure(message)) => {
                    let failure = EngineError::TaskFailed {
                        task: id.clone(),
                        message,
                    };
                    return self.fail_stop(graph, &session_id, &id, failure, &mut join_set);
                }
                Err(error) => {
                    return self.fail_stop(graph, &session_id, &id, error, &mut join_set);
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if !graph.is_done() {
            // A validated plan cannot strand tasks; reaching this means a
            // dependency edge was never satisfiable.
            return Err(EngineError::Internal(
                "graph stalled with unrunnable tasks".to_string(),
            ));
        }
        Ok(RunOutcome::Completed)
    }

    /// Resolve parameters and put one task in flight.
    #[allow(clippy::too_many_arguments)]
    async fn spawn_task(
        &self,
        graph: &mut TaskGraph,
        id: &str,
        session: &Arc<Mutex<Session>>,
        session_id: &str,
        token: &AuthToken,
        cancel: &CancellationToken,
        semaphore: &Arc<Semaphore>,
        join_set: &mut JoinSet<(String, Result<ToolOutcome>)>,
        total: usize,
    ) -> Result<()> {
        let node = graph
            .get(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown task {id}")))?;
        let spec = node.spec.clone();
        let descriptor = self.registry.get(&spec.qualified_method())?;

        let percent = (graph.succeeded_count() * 100 / total) as u8;
        self.hub.publish(
            session_id,
            ProgressEvent::progress(id, percent, &format!("starting {}", spec.description)),
        );

        let results = graph.results();
        let context = session.lock().await.context.clone();
        let params = resolver::resolve_parameters(&spec, descriptor, &results, &context)?;

        graph.mark_running(id);

        let task_id = id.to_string();
        let qualified = spec.qualified_method();
        let server = descriptor.server;
        let method = descriptor.method.to_string();
        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);
        let session = Arc::clone(session);
        let token = token.clone();
        let cancel = cancel.clone();
        let semaphore = Arc::clone(semaphore);

        join_set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (task_id, Err(EngineError::Cancelled)),
            };

            if server == ServerKind::Session {
                let outcome = session_tool(&method, &params, &session).await;
                return (task_id, outcome);
            }

            let call = registry.dispatch(transport.as_ref(), &qualified, &params, &token);
            tokio::select! {
                _ = cancel.cancelled() => (task_id, Err(EngineError::Cancelled)),
                result = call => (task_id, result.map_err(EngineError::from)),
            }
        });
        Ok(())
    }

    /// Fail-stop: record the failure, skip downstream, abort in-flight
    /// siblings, publish the error event.
    fn fail_stop(
        &self,
        graph: &mut TaskGraph,
        session_id: &str,
        task_id: &str,
        failure: EngineError,
        join_set: &mut JoinSet<(String, Result<ToolOutcome>)>,
    ) -> Result<RunOutcome> {
        if matches!(failure, EngineError::Cancelled) {
            return Err(EngineError::Cancelled);
        }

        let message = failure.to_string();
        warn!(task = %task_id, error = %message, "task failed, cancelling downstream");

        graph.record_failure(task_id, &message);
        graph.skip_downstream(task_id);
        join_set.abort_all();

        let description = graph
            .get(task_id)
            .map(|n| n.spec.description.clone())
            .unwrap_or_default();
        // User-facing error text never exposes internal detail.
        self.hub.publish(
            session_id,
            ProgressEvent::error(&format!("Could not complete: {description}")),
        );

        Ok(RunOutcome::Failed {
            task_id: task_id.to_string(),
            message,
        })
    }
}

/// Answer a session-served tool from the live session state.
async fn session_tool(
    method: &str,
    params: &Map<String, Value>,
    session: &Arc<Mutex<Session>>,
) -> Result<ToolOutcome> {
    match method {
        "session_get_proposed_titles" => {
            let category = params
                .get("category")
                .and_then(Value::as_str)
                .and_then(|s| Stage::from_str(s).ok())
                .ok_or_else(|| {
                    EngineError::ParameterResolution(
                        "session_get_proposed_titles.category: expected main|sub|soup".to_string(),
                    )
                })?;
            let session = session.lock().await;
            let titles: Vec<String> = session.proposed_titles.get(category).to_vec();
            Ok(ToolOutcome::Success(json!(titles)))
        }
        other => Err(EngineError::Internal(format!(
            "unhandled session tool: {other}"
        ))),
    }
}
