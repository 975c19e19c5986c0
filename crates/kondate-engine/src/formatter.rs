//! Turns raw task results into the user-visible response.
//!
//! Inventory results become short human summaries; menu plans become a
//! readable bill of fare; proposals become a structured selection payload
//! the client renders as a picker. The formatter is also where the session
//! learns what was offered: inventory cache, proposed titles, and the
//! candidate list the next selection post validates against.

use std::str::FromStr;

use serde_json::Value;
use tracing::debug;

use kondate_protocol::ChatResponse;
use kondate_sessions::{Candidate, RecipeSource, Session, Stage, UrlRef};

use crate::graph::{TaskGraph, TaskState};

/// Render a fully completed graph.
pub fn format_completed(
    graph: &TaskGraph,
    session: &mut Session,
    model_used: &str,
    user_id: &str,
) -> ChatResponse {
    let mut parts: Vec<String> = Vec::new();
    let mut proposal_task: Option<(String, Stage, Vec<Candidate>)> = None;
    let mut llm_menu: Option<Value> = None;
    let mut rag_menu: Option<Value> = None;
    let mut menu_task_id: Option<String> = None;
    let mut web_results: Vec<Value> = Vec::new();
    let mut web_task_id: Option<String> = None;

    for node in graph.nodes() {
        if node.state != TaskState::Succeeded {
            continue;
        }
        let Some(envelope) = &node.result else {
            continue;
        };
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);

        match node.spec.qualified_method().as_str() {
            "inventory_service.get_inventory" => {
                let names = inventory_names(&data);
                // Cache for follow-up rounds that skip the refetch.
                session.context.inventory_items = names.clone();
                parts.push(format_inventory_list(&data, &names));
            }
            "inventory_service.add_inventory" => parts.push(format_added(&data)),
            "inventory_service.update_inventory" => parts.push(format_updated(&data)),
            "inventory_service.delete_inventory" => parts.push(format_deleted(&data)),
            "recipe_service.generate_menu_plan" => {
                parts.push(format_menu_section("A new idea", &data));
                llm_menu = Some(data);
                menu_task_id.get_or_insert_with(|| node.spec.id.clone());
            }
            "recipe_service.search_menu_from_rag" => {
                parts.push(format_menu_section("From your cooking history", &data));
                rag_menu = Some(data);
                menu_task_id.get_or_insert_with(|| node.spec.id.clone());
            }
            "recipe_service.generate_proposals" => {
                let stage = proposal_stage(node.spec.parameters.get("category"), session.stage);
                let candidates = parse_candidates(&data);
                proposal_task = Some((node.spec.id.clone(), stage, candidates));
            }
            "recipe_service.search_recipes_from_web" => {
                web_results = web_result_list(&data);
                web_task_id = Some(node.spec.id.clone());
            }
            _ => {
                debug!(task = %node.spec.id, "no formatter for task result");
            }
        }
    }

    let mut response = ChatResponse {
        success: true,
        model_used: model_used.to_string(),
        user_id: user_id.to_string(),
        ..Default::default()
    };

    if let Some((task_id, stage, candidates)) = proposal_task {
        // A proposal round: URL metadata joins by position, titles dedup
        // keeping the first occurrence.
        let candidates = integrate_urls_by_position(dedup_by_title(candidates), &web_results);
        attach_selection(&mut response, session, stage, &task_id, candidates);
    } else if llm_menu.is_some() || rag_menu.is_some() {
        // A menu plan: the main-dish pair (creative first, history second)
        // becomes the selectable candidate list for the main stage.
        let candidates = menu_candidates(llm_menu.as_ref(), rag_menu.as_ref(), &web_results);
        let task_id = web_task_id.or(menu_task_id).unwrap_or_default();
        attach_selection(&mut response, session, Stage::Main, &task_id, candidates);
    }

    if parts.is_empty() && !response.requires_selection {
        parts.push("Done.".to_string());
    }
    response.response = parts.join("\n");
    response
}

/// Render a graph suspended on an ambiguity question.
pub fn format_suspended(
    question: &str,
    session: &Session,
    model_used: &str,
    user_id: &str,
) -> ChatResponse {
    ChatResponse {
        response: question.to_string(),
        success: true,
        model_used: model_used.to_string(),
        user_id: user_id.to_string(),
        requires_confirmation: true,
        confirmation_session_id: Some(session.id.clone()),
        ..Default::default()
    }
}

/// Render a failed run. Internal detail stays in the logs.
pub fn format_failed(model_used: &str, user_id: &str) -> ChatResponse {
    ChatResponse {
        response: "Something went wrong while processing your request. Please try again."
            .to_string(),
        success: false,
        model_used: model_used.to_string(),
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

/// Canned reply for greetings; no tools were called.
pub fn format_greeting(model_used: &str, user_id: &str) -> ChatResponse {
    ChatResponse {
        response: "Hello! I can manage your kitchen inventory or put together a menu \
                   from what you have. What would you like to do?"
            .to_string(),
        success: true,
        model_used: model_used.to_string(),
        user_id: user_id.to_string(),
        ..Default::default()
    }
}

fn attach_selection(
    response: &mut ChatResponse,
    session: &mut Session,
    stage: Stage,
    task_id: &str,
    candidates: Vec<Candidate>,
) {
    session.add_proposed_titles(stage, candidates.iter().map(|c| c.title.clone()));
    session.set_candidates(stage, candidates.clone());

    response.requires_selection = true;
    response.task_id = Some(task_id.to_string());
    response.candidates = Some(
        candidates
            .iter()
            .map(|c| serde_json::to_value(c).unwrap_or(Value::Null))
            .collect(),
    );
    response.current_stage = Some(session.stage.to_string());
    response.menu_category = Some(session.menu_category.to_string());
    let remaining = session.remaining_ingredients();
    if !remaining.is_empty() {
        response.used_ingredients = Some(remaining);
    }
}

/// Names out of an inventory listing; rows are objects with `item_name`
/// or plain strings.
fn inventory_names(data: &Value) -> Vec<String> {
    let Some(rows) = data.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            row.get("item_name")
                .and_then(Value::as_str)
                .or_else(|| row.as_str())
                .map(str::to_string)
        })
        .collect()
}

fn format_inventory_list(data: &Value, names: &[String]) -> String {
    if names.is_empty() {
        return "Your inventory is empty.".to_string();
    }
    let mut lines = vec![format!("You have {} item(s) in stock:", names.len())];
    if let Some(rows) = data.as_array() {
        for row in rows {
            match (
                row.get("item_name").and_then(Value::as_str),
                row.get("quantity"),
                row.get("unit").and_then(Value::as_str),
            ) {
                (Some(name), Some(quantity), unit) => lines.push(format!(
                    "- {name}: {}{}",
                    render_quantity(quantity),
                    unit.unwrap_or("")
                )),
                _ => {
                    if let Some(name) = row.as_str() {
                        lines.push(format!("- {name}"));
                    }
                }
            }
        }
    }
    lines.join("\n")
}

fn format_added(data: &Value) -> String {
    let name = data.get("item_name").and_then(Value::as_str).unwrap_or("item");
    match (data.get("quantity"), data.get("unit").and_then(Value::as_str)) {
        (Some(quantity), Some(unit)) => {
            format!("Added {name} ({}{unit}).", render_quantity(quantity))
        }
        _ => format!("Added {name}."),
    }
}

fn format_updated(data: &Value) -> String {
    match data {
        Value::Array(rows) => format!("Updated {} item(s).", rows.len()),
        Value::Object(row) => {
            let name = row.get("item_name").and_then(Value::as_str).unwrap_or("item");
            format!("Updated {name}.")
        }
        _ => "Updated the inventory.".to_string(),
    }
}

fn format_deleted(data: &Value) -> String {
    match data {
        Value::Array(rows) => format!("Deleted {} item(s).", rows.len()),
        Value::Object(row) => {
            let name = row.get("item_name").and_then(Value::as_str).unwrap_or("item");
            format!("Deleted {name}.")
        }
        _ => "Deleted the item.".to_string(),
    }
}

fn format_menu_section(heading: &str, data: &Value) -> String {
    let dish = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .unwrap_or("(none)")
            .to_string()
    };
    format!(
        "{heading}:\n- Main: {}\n- Side: {}\n- Soup: {}",
        dish("main_dish"),
        dish("side_dish"),
        dish("soup")
    )
}

fn render_quantity(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn proposal_stage(category: Option<&Value>, fallback: Stage) -> Stage {
    category
        .and_then(Value::as_str)
        .and_then(|s| Stage::from_str(s).ok())
        .unwrap_or(fallback)
}

fn parse_candidates(data: &Value) -> Vec<Candidate> {
    data.get("candidates")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// The web task's result list, positionally aligned with the titles it
/// was asked to search.
fn web_result_list(data: &Value) -> Vec<Value> {
    data.get("results")
        .and_then(Value::as_array)
        .or_else(|| data.as_array())
        .cloned()
        .unwrap_or_default()
}

fn dedup_by_title(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.title.clone()))
        .collect()
}

fn integrate_urls_by_position(
    mut candidates: Vec<Candidate>,
    web_results: &[Value],
) -> Vec<Candidate> {
    for (candidate, web) in candidates.iter_mut().zip(web_results) {
        apply_url(candidate, web);
    }
    candidates
}

fn apply_url(candidate: &mut Candidate, web: &Value) {
    let Some(url) = web.get("url").and_then(Value::as_str) else {
        return;
    };
    let title = web
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or(&candidate.title)
        .to_string();
    candidate.url = Some(url.to_string());
    candidate.urls = vec![UrlRef {
        title,
        url: url.to_string(),
        domain: extract_domain(url),
    }];
}

/// Main-stage candidates for the menu scenario: the creative menu's main
/// dish first, the history menu's second. URL metadata joins by title,
/// falling back to nothing when the web round missed a dish.
fn menu_candidates(
    llm_menu: Option<&Value>,
    rag_menu: Option<&Value>,
    web_results: &[Value],
) -> Vec<Candidate> {
    let mut out = Vec::new();
    let mut push = |menu: Option<&Value>, source: RecipeSource| {
        let Some(menu) = menu else { return };
        let Some(title) = menu.get("main_dish").and_then(Value::as_str) else {
            return;
        };
        if title.is_empty() {
            return;
        }
        let ingredients = menu
            .get("ingredients_used")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let mut candidate = Candidate {
            title: title.to_string(),
            category: Some(Stage::Main.to_string()),
            source,
            ingredients,
            ..Default::default()
        };
        if let Some(web) = web_results
            .iter()
            .find(|w| w.get("title").and_then(Value::as_str) == Some(title))
        {
            apply_url(&mut candidate, web);
        }
        out.push(candidate);
    };
    push(llm_menu, RecipeSource::Llm);
    push(rag_menu, RecipeSource::Rag);
    dedup_by_title(out)
}

fn extract_domain(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kondate_core::types::UserId;
    use kondate_protocol::PlanDocument;
    use serde_json::json;

    fn session() -> Session {
        Session::new("s-1", UserId::from("u-1"))
    }

    fn graph_with_results(doc: &str, results: &[(&str, Value)]) -> TaskGraph {
        let doc: PlanDocument = serde_json::from_str(doc).unwrap();
        let mut graph = TaskGraph::new(doc);
        for (id, envelope) in results {
            graph.record_success(id, envelope.clone());
        }
        graph
    }

    #[test]
    fn add_result_becomes_a_confirmation_sentence() {
        let graph = graph_with_results(
            r#"{"tasks": [{"id": "task1", "description": "add",
                "service": "inventory_service", "method": "add_inventory",
                "parameters": {"item_name": "green pepper", "quantity": 4},
                "dependencies": []}]}"#,
            &[(
                "task1",
                json!({"success": true, "data": {"item_name": "green pepper", "quantity": 4, "unit": "piece"}}),
            )],
        );
        let mut session = session();
        let response = format_completed(&graph, &mut session, "gpt-4o-mini", "u-1");
        assert!(response.success);
        assert_eq!(response.response, "Added green pepper (4piece).");
        assert!(!response.requires_selection);
    }

    #[test]
    fn inventory_listing_is_cached_into_the_session() {
        let graph = graph_with_results(
            r#"{"tasks": [{"id": "task1", "description": "list",
                "service": "inventory_service", "method": "get_inventory",
                "parameters": {}, "dependencies": []}]}"#,
            &[(
                "task1",
                json!({"success": true, "data": [
                    {"item_name": "milk", "quantity": 2, "unit": "bottle"},
                    {"item_name": "egg", "quantity": 6, "unit": "piece"}
                ]}),
            )],
        );
        let mut session = session();
        let response = format_completed(&graph, &mut session, "m", "u-1");
        assert!(response.response.contains("2 item(s)"));
        assert!(response.response.contains("- milk: 2bottle"));
        assert_eq!(session.context.inventory_items, vec!["milk", "egg"]);
    }

    const PROPOSAL_GRAPH: &str = r#"{"tasks": [
        {"id": "task3", "description": "proposals",
         "service": "recipe_service", "method": "generate_proposals",
         "parameters": {"inventory_items": ["x"], "category": "main"},
         "dependencies": []},
        {"id": "task4", "description": "web",
         "service": "recipe_service", "method": "search_recipes_from_web",
         "parameters": {"recipe_titles": "task3.result.data.candidates"},
         "dependencies": ["task3"]}
    ]}"#;

    #[test]
    fn proposals_become_a_selection_payload() {
        let graph = graph_with_results(
            PROPOSAL_GRAPH,
            &[
                (
                    "task3",
                    json!({"success": true, "data": {"category": "main", "candidates": [
                        {"title": "omelette", "source": "llm", "ingredients": ["egg"]},
                        {"title": "french toast", "source": "llm", "ingredients": ["bread", "milk"]},
                        {"title": "omelette", "source": "rag", "ingredients": ["egg"]}
                    ]}}),
                ),
                (
                    "task4",
                    json!({"success": true, "data": {"results": [
                        {"title": "omelette", "url": "https://cookpad.example/om"},
                        {"title": "french toast", "url": "https://cookpad.example/ft"}
                    ]}}),
                ),
            ],
        );
        let mut session = session();
        session.context.inventory_items = vec!["egg".into(), "bread".into(), "milk".into(), "ham".into()];

        let response = format_completed(&graph, &mut session, "m", "u-1");
        assert!(response.requires_selection);
        assert_eq!(response.task_id.as_deref(), Some("task3"));
        let candidates = response.candidates.unwrap();
        // Duplicate title dropped, first occurrence kept.
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["title"], "omelette");
        assert_eq!(candidates[0]["urls"][0]["url"], "https://cookpad.example/om");
        assert_eq!(candidates[0]["urls"][0]["domain"], "cookpad.example");

        // The session remembers what was offered.
        assert_eq!(session.candidates.get(Stage::Main).len(), 2);
        assert_eq!(session.proposed_titles.get(Stage::Main), ["omelette", "french toast"]);
        assert_eq!(response.current_stage.as_deref(), Some("main"));
        assert_eq!(
            response.used_ingredients,
            Some(vec!["egg".to_string(), "bread".to_string(), "milk".to_string(), "ham".to_string()])
        );
    }

    const MENU_GRAPH: &str = r#"{"tasks": [
        {"id": "task2", "description": "llm menu",
         "service": "recipe_service", "method": "generate_menu_plan",
         "parameters": {"inventory_items": ["x"], "user_id": "u-1"},
         "dependencies": []},
        {"id": "task3", "description": "rag menu",
         "service": "recipe_service", "method": "search_menu_from_rag",
         "parameters": {"inventory_items": ["x"], "user_id": "u-1"},
         "dependencies": []},
        {"id": "task4", "description": "web",
         "service": "recipe_service", "method": "search_recipes_from_web",
         "parameters": {"recipe_titles": ["a"]},
         "dependencies": ["task2", "task3"]}
    ]}"#;

    #[test]
    fn menu_plan_offers_the_main_dish_pair() {
        let graph = graph_with_results(
            MENU_GRAPH,
            &[
                (
                    "task2",
                    json!({"success": true, "data": {"main_dish": "french toast", "side_dish": "spinach salad", "soup": "milk soup", "ingredients_used": ["bread", "milk", "egg"]}}),
                ),
                (
                    "task3",
                    json!({"success": true, "data": {"main_dish": "ham omelette", "side_dish": "coleslaw", "soup": "miso soup", "ingredients_used": ["ham", "egg"]}}),
                ),
                (
                    "task4",
                    json!({"success": true, "data": {"results": [
                        {"title": "french toast", "url": "https://recipes.example/ft"},
                        {"title": "ham omelette", "url": "https://recipes.example/ho"}
                    ]}}),
                ),
            ],
        );
        let mut session = session();
        session.context.inventory_items =
            vec!["milk".into(), "egg".into(), "bread".into(), "ham".into()];

        let response = format_completed(&graph, &mut session, "m", "u-1");
        // Bill of fare text from both menus.
        assert!(response.response.contains("- Main: french toast"));
        assert!(response.response.contains("- Main: ham omelette"));
        // Selectable main-dish pair with URLs.
        assert!(response.requires_selection);
        let candidates = response.candidates.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0]["source"], "llm");
        assert_eq!(candidates[1]["source"], "rag");
        assert_eq!(candidates[0]["urls"][0]["url"], "https://recipes.example/ft");
        assert_eq!(session.candidates.get(Stage::Main).len(), 2);
    }

    #[test]
    fn suspension_renders_the_question() {
        let session = session();
        let response = format_suspended("Which milk?", &session, "m", "u-1");
        assert!(response.requires_confirmation);
        assert_eq!(response.confirmation_session_id.as_deref(), Some("s-1"));
        assert_eq!(response.response, "Which milk?");
    }

    #[test]
    fn failure_hides_internal_detail() {
        let response = format_failed("m", "u-1");
        assert!(!response.success);
        assert!(!response.response.contains("timeout"));
    }
}
