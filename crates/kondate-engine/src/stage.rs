//! The menu-selection state machine driver.
//!
//! A selection post records the picked candidate for the current stage,
//! maps its ingredients into the used set, advances the stage, and tells
//! the client whether another proposal round follows. When the dialog
//! completes, the composed menu can be saved to the history backend with
//! a course prefix on each title.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use kondate_channels::ProgressHub;
use kondate_core::types::{AuthToken, UserId};
use kondate_protocol::{
    HistoryEntry, HistoryRecipe, MenuHistoryResponse, MenuSaveRequest, MenuSaveResponse,
    ProgressEvent, SavedRecipe, SelectionRequest, SelectionResponse, ToolOutcome,
};
use kondate_sessions::{SessionError, SessionStore, Stage};
use kondate_tools::{ToolRegistry, ToolTransport};

use crate::error::{EngineError, Result};

/// Course prefix applied to saved titles.
fn stage_prefix(stage: Stage) -> &'static str {
    match stage {
        Stage::Main => "main: ",
        Stage::Sub => "sub: ",
        Stage::Soup => "soup: ",
        Stage::Completed => "",
    }
}

/// The history backend stores proposals under their retrieval source;
/// generated and hand-entered recipes both land as "web".
fn map_source(source: &str) -> &'static str {
    match source {
        "rag" => "rag",
        _ => "web",
    }
}

pub struct StageController {
    store: Arc<SessionStore>,
    hub: Arc<ProgressHub>,
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn ToolTransport>,
}

impl StageController {
    pub fn new(
        store: Arc<SessionStore>,
        hub: Arc<ProgressHub>,
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn ToolTransport>,
    ) -> Self {
        Self {
            store,
            hub,
            registry,
            transport,
        }
    }

    /// Apply one selection post.
    pub async fn select(
        &self,
        user_id: &UserId,
        request: &SelectionRequest,
    ) -> Result<SelectionResponse> {
        let session_id = request.sse_session_id.clone();
        let index = request.selection_index;

        let response = self
            .store
            .update(&session_id, user_id, |session| {
                let stage = session.stage;
                if stage == Stage::Completed {
                    return Err(SessionError::InvalidSelection(
                        "the menu is already complete".to_string(),
                    ));
                }
                let candidate = session
                    .candidates
                    .get(stage)
                    .get(index)
                    .cloned()
                    .ok_or(SessionError::NoSuchCandidate {
                        stage: stage.to_string(),
                        index,
                    })?;

                info!(session = %session.id, stage = %stage, title = %candidate.title, "recipe selected");
                session.set_selected_recipe(stage, candidate);

                let next = session.stage;
                let remaining = session.remaining_ingredients();
                Ok(SelectionResponse {
                    success: true,
                    message: format!("Selected for the {stage} course."),
                    current_stage: Some(next.to_string()),
                    requires_next_stage: next != Stage::Completed,
                    used_ingredients: (!remaining.is_empty()).then_some(remaining),
                    menu_category: Some(session.menu_category.to_string()),
                })
            })
            .await??;

        if response.current_stage.as_deref() == Some("completed") {
            self.hub.publish(
                &session_id,
                ProgressEvent::complete(json!({
                    "menu_completed": true,
                    "message": "All three courses are chosen. Save the menu when ready."
                })),
            );
        }

        Ok(response)
    }

    /// Persist the composed menu into the history store.
    ///
    /// Recipes in the request body win over the session's selections so a
    /// client can save an edited menu.
    pub async fn save_menu(
        &self,
        user_id: &UserId,
        token: &AuthToken,
        request: &MenuSaveRequest,
    ) -> Result<MenuSaveResponse> {
        let recipes = match (&request.recipes, &request.sse_session_id) {
            (Some(recipes), _) => recipes.clone(),
            (None, Some(session_id)) => {
                let handle = self.store.get(session_id, user_id).await?;
                let session = handle.lock().await;
                serde_json::to_value(&session.selected).unwrap_or(Value::Null)
            }
            (None, None) => {
                return Ok(MenuSaveResponse {
                    success: false,
                    message: "Either recipes or a session id is required.".to_string(),
                    saved_recipes: Vec::new(),
                    total_saved: 0,
                })
            }
        };

        let mut saved = Vec::new();
        let mut failed = 0usize;

        for stage in Stage::COURSES {
            let Some(recipe) = recipes.get(stage.as_str()).filter(|r| !r.is_null()) else {
                continue;
            };
            let Some(title) = recipe.get("title").and_then(Value::as_str) else {
                continue;
            };
            let prefixed = format!("{}{}", stage_prefix(stage), title);
            let source = recipe
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("manual");

            let mut params = Map::new();
            params.insert("title".into(), Value::from(prefixed.clone()));
            params.insert("source".into(), Value::from(map_source(source)));
            if let Some(url) = recipe.get("url").filter(|u| !u.is_null()) {
                params.insert("url".into(), url.clone());
            }
            if let Some(ingredients) = recipe.get("ingredients").filter(|i| i.is_array()) {
                params.insert("ingredients".into(), ingredients.clone());
            }

            match self
                .registry
                .dispatch(
                    self.transport.as_ref(),
                    "history_service.history_add",
                    &params,
                    token,
                )
                .await
            {
                Ok(ToolOutcome::Success(data)) => {
                    let history_id = data
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    saved.push(SavedRecipe {
                        category: stage.to_string(),
                        title: prefixed,
                        history_id,
                    });
                }
                Ok(other) => {
                    warn!(course = %stage, outcome = ?other, "history save rejected");
                    failed += 1;
                }
                Err(error) => {
                    warn!(course = %stage, error = %error, "history save failed");
                    failed += 1;
                }
            }
        }

        let total_saved = saved.len();
        let (success, message) = match (total_saved, failed) {
            (0, _) => (false, "No recipes were saved.".to_string()),
            (n, 0) => (true, format!("{n} recipe(s) saved to your history.")),
            (n, f) => (true, format!("{n} recipe(s) saved ({f} failed).")),
        };

        Ok(MenuSaveResponse {
            success,
            message,
            saved_recipes: saved,
            total_saved,
        })
    }

    /// The saved-menu history, grouped by day, newest day first.
    ///
    /// The course is recovered from the prefix that `save_menu` put on
    /// each title; an optional category filter keeps only that course.
    pub async fn menu_history(
        &self,
        user_id: &UserId,
        token: &AuthToken,
        days: i64,
        category: Option<&str>,
    ) -> Result<MenuHistoryResponse> {
        let mut params = Map::new();
        params.insert("user_id".into(), Value::from(user_id.as_str()));

        let outcome = self
            .registry
            .dispatch(
                self.transport.as_ref(),
                "recipe_service.get_recipe_history",
                &params,
                token,
            )
            .await?;
        let data = match outcome {
            ToolOutcome::Success(data) => data,
            other => {
                warn!(outcome = ?other, "history listing failed");
                return Err(EngineError::TaskFailed {
                    task: "menu_history".to_string(),
                    message: "history backend refused the listing".to_string(),
                });
            }
        };

        let cutoff = Utc::now() - chrono::Duration::days(days.max(0));
        let mut by_date: BTreeMap<String, Vec<HistoryRecipe>> = BTreeMap::new();

        for row in data.as_array().map(Vec::as_slice).unwrap_or(&[]) {
            let Some(title) = row.get("title").and_then(Value::as_str) else {
                continue;
            };
            let Some(cooked_at) = row
                .get("cooked_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            else {
                continue;
            };
            if cooked_at.with_timezone(&Utc) < cutoff {
                continue;
            }

            let recipe_category = title_category(title);
            if category.is_some() && recipe_category != category {
                continue;
            }

            let date = cooked_at.date_naive().to_string();
            by_date.entry(date).or_default().push(HistoryRecipe {
                category: recipe_category.map(str::to_string),
                title: title.to_string(),
                source: row
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("web")
                    .to_string(),
                url: row
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                history_id: row
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            });
        }

        // BTreeMap iterates ascending; the listing wants newest first.
        let data = by_date
            .into_iter()
            .rev()
            .map(|(date, recipes)| HistoryEntry { date, recipes })
            .collect();
        Ok(MenuHistoryResponse {
            success: true,
            data,
        })
    }
}

/// Recover the course from the title prefix `save_menu` applies.
fn title_category(title: &str) -> Option<&'static str> {
    for stage in Stage::COURSES {
        let prefix = stage_prefix(stage);
        if !prefix.is_empty() && title.starts_with(prefix) {
            return Some(stage.as_str());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use kondate_sessions::Candidate;
    use kondate_tools::{ServerKind, ToolError};

    struct RecordingTransport {
        calls: StdMutex<Vec<(String, Map<String, Value>)>>,
    }

    #[async_trait]
    impl ToolTransport for RecordingTransport {
        async fn call(
            &self,
            _server: ServerKind,
            tool: &str,
            params: &Map<String, Value>,
            _token: &AuthToken,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((tool.to_string(), params.clone()));
            Ok(ToolOutcome::Success(
                json!({"id": format!("h-{}", self.calls.lock().unwrap().len())}),
            ))
        }
    }

    fn controller() -> (StageController, Arc<SessionStore>, Arc<RecordingTransport>) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(3600)));
        let transport = Arc::new(RecordingTransport {
            calls: StdMutex::new(Vec::new()),
        });
        let controller = StageController::new(
            Arc::clone(&store),
            Arc::new(ProgressHub::new(64, Duration::from_secs(30))),
            Arc::new(ToolRegistry::builtin()),
            transport.clone(),
        );
        (controller, store, transport)
    }

    fn candidate(title: &str, ingredients: &[&str]) -> Candidate {
        Candidate {
            title: title.to_string(),
            ingredients: ingredients.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    async fn seeded_store(store: &SessionStore) -> UserId {
        let user = UserId::from("u-1");
        let handle = store.get_or_create("s-1", &user).await.unwrap();
        {
            let mut session = handle.lock().await;
            session.context.inventory_items =
                vec!["milk".into(), "egg".into(), "spinach".into(), "ham".into()];
            session.set_candidates(
                Stage::Main,
                vec![
                    candidate("omelette", &["egg", "milk"]),
                    candidate("ham steak", &["ham"]),
                ],
            );
        }
        user
    }

    fn select_request(index: usize) -> SelectionRequest {
        SelectionRequest {
            task_id: "task3".into(),
            selection_index: index,
            sse_session_id: "s-1".into(),
        }
    }

    #[tokio::test]
    async fn selection_advances_and_accounts_ingredients() {
        let (controller, store, _) = controller();
        let user = seeded_store(&store).await;

        let response = controller.select(&user, &select_request(0)).await.unwrap();
        assert!(response.success);
        assert_eq!(response.current_stage.as_deref(), Some("sub"));
        assert!(response.requires_next_stage);
        assert_eq!(
            response.used_ingredients,
            Some(vec!["spinach".to_string(), "ham".to_string()])
        );

        let handle = store.get("s-1", &user).await.unwrap();
        let session = handle.lock().await;
        assert_eq!(session.stage, Stage::Sub);
        assert_eq!(
            session.selected.main.as_ref().unwrap().title,
            "omelette"
        );
        assert_eq!(session.used_ingredients, vec!["egg", "milk"]);
    }

    #[tokio::test]
    async fn out_of_range_selection_is_rejected() {
        let (controller, store, _) = controller();
        let user = seeded_store(&store).await;

        let err = controller.select(&user, &select_request(5)).await.unwrap_err();
        assert!(err.to_string().contains("index 5"));

        // Nothing moved.
        let handle = store.get("s-1", &user).await.unwrap();
        assert_eq!(handle.lock().await.stage, Stage::Main);
    }

    #[tokio::test]
    async fn full_walk_reaches_completed_once() {
        let (controller, store, _) = controller();
        let user = seeded_store(&store).await;

        controller.select(&user, &select_request(0)).await.unwrap();
        {
            let handle = store.get("s-1", &user).await.unwrap();
            handle
                .lock()
                .await
                .set_candidates(Stage::Sub, vec![candidate("ohitashi", &["spinach"])]);
        }
        controller.select(&user, &select_request(0)).await.unwrap();
        {
            let handle = store.get("s-1", &user).await.unwrap();
            handle
                .lock()
                .await
                .set_candidates(Stage::Soup, vec![candidate("miso soup", &[])]);
        }
        let last = controller.select(&user, &select_request(0)).await.unwrap();
        assert_eq!(last.current_stage.as_deref(), Some("completed"));
        assert!(!last.requires_next_stage);

        // A fourth selection is refused: the stage never rewinds.
        let err = controller.select(&user, &select_request(0)).await.unwrap_err();
        assert!(err.to_string().contains("already complete"));
    }

    #[tokio::test]
    async fn save_menu_prefixes_titles_and_maps_sources() {
        let (controller, store, transport) = controller();
        let user = seeded_store(&store).await;
        {
            let handle = store.get("s-1", &user).await.unwrap();
            let mut session = handle.lock().await;
            let mut main = candidate("omelette", &["egg"]);
            main.source = kondate_sessions::RecipeSource::Llm;
            let mut sub = candidate("pickles", &[]);
            sub.source = kondate_sessions::RecipeSource::Rag;
            session.set_selected_recipe(Stage::Main, main);
            session.set_selected_recipe(Stage::Sub, sub);
        }

        let response = controller
            .save_menu(
                &user,
                &AuthToken::from("t"),
                &MenuSaveRequest {
                    sse_session_id: Some("s-1".into()),
                    recipes: None,
                },
            )
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.total_saved, 2);
        assert_eq!(response.saved_recipes[0].title, "main: omelette");
        assert_eq!(response.saved_recipes[1].title, "sub: pickles");
        assert!(!response.saved_recipes[0].history_id.is_empty());

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, "history_add");
        // Generated recipes land as "web", retrieval hits stay "rag".
        assert_eq!(calls[0].1["source"], "web");
        assert_eq!(calls[1].1["source"], "rag");
    }

    #[tokio::test]
    async fn save_menu_prefers_request_body() {
        let (controller, store, transport) = controller();
        let user = seeded_store(&store).await;

        let response = controller
            .save_menu(
                &user,
                &AuthToken::from("t"),
                &MenuSaveRequest {
                    sse_session_id: Some("s-1".into()),
                    recipes: Some(json!({
                        "main": {"title": "curry", "source": "web", "url": "https://e.example/c"},
                        "soup": {"title": "consomme", "source": "llm"}
                    })),
                },
            )
            .await
            .unwrap();

        assert_eq!(response.total_saved, 2);
        assert_eq!(response.saved_recipes[0].title, "main: curry");
        assert_eq!(response.saved_recipes[1].title, "soup: consomme");
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].1["url"], "https://e.example/c");
    }

    struct HistoryTransport {
        rows: Value,
    }

    #[async_trait]
    impl ToolTransport for HistoryTransport {
        async fn call(
            &self,
            _server: ServerKind,
            tool: &str,
            _params: &Map<String, Value>,
            _token: &AuthToken,
        ) -> std::result::Result<ToolOutcome, ToolError> {
            assert_eq!(tool, "get_recipe_history");
            Ok(ToolOutcome::Success(self.rows.clone()))
        }
    }

    fn history_controller(rows: Value) -> (StageController, Arc<SessionStore>) {
        let store = Arc::new(SessionStore::new(Duration::from_secs(3600)));
        let controller = StageController::new(
            Arc::clone(&store),
            Arc::new(ProgressHub::new(64, Duration::from_secs(30))),
            Arc::new(ToolRegistry::builtin()),
            Arc::new(HistoryTransport { rows }),
        );
        (controller, store)
    }

    fn history_row(title: &str, days_ago: i64) -> Value {
        let cooked = Utc::now() - chrono::Duration::days(days_ago);
        json!({
            "id": format!("h-{title}"),
            "title": title,
            "source": "web",
            "url": "https://recipes.example/x",
            "cooked_at": cooked.to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn history_groups_by_day_newest_first() {
        let (controller, _) = history_controller(json!([
            history_row("main: omelette", 1),
            history_row("sub: pickles", 1),
            history_row("soup: miso soup", 3),
        ]));

        let listing = controller
            .menu_history(&UserId::from("u-1"), &AuthToken::from("t"), 14, None)
            .await
            .unwrap();

        assert!(listing.success);
        assert_eq!(listing.data.len(), 2);
        // Newest day first, both of its courses present.
        assert_eq!(listing.data[0].recipes.len(), 2);
        assert_eq!(listing.data[0].recipes[0].category.as_deref(), Some("main"));
        assert_eq!(listing.data[1].recipes[0].title, "soup: miso soup");
        assert!(listing.data[0].date > listing.data[1].date);
    }

    #[tokio::test]
    async fn history_filters_by_category_and_cutoff() {
        let (controller, _) = history_controller(json!([
            history_row("main: omelette", 1),
            history_row("sub: pickles", 1),
            history_row("main: old curry", 30),
            history_row("unprefixed dish", 1),
        ]));

        let listing = controller
            .menu_history(&UserId::from("u-1"), &AuthToken::from("t"), 14, Some("main"))
            .await
            .unwrap();

        let titles: Vec<&str> = listing
            .data
            .iter()
            .flat_map(|e| e.recipes.iter().map(|r| r.title.as_str()))
            .collect();
        assert_eq!(titles, vec!["main: omelette"]);
    }

    #[tokio::test]
    async fn save_menu_with_nothing_selected_fails_softly() {
        let (controller, store, _) = controller();
        let user = seeded_store(&store).await;

        let response = controller
            .save_menu(
                &user,
                &AuthToken::from("t"),
                &MenuSaveRequest {
                    sse_session_id: Some("s-1".into()),
                    recipes: None,
                },
            )
            .await
            .unwrap();
        assert!(!response.success);
        assert_eq!(response.total_saved, 0);
    }
}
