use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

use kondate_core::types::UserId;
use kondate_protocol::TaskSpec;

use crate::mapper;

/// Position in the menu-selection dialog.
///
/// Advances main → sub → soup → completed and never rewinds within one
/// menu cycle; the stage controller is the only writer after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Main,
    Sub,
    Soup,
    Completed,
}

impl Stage {
    pub fn advance(self) -> Stage {
        match self {
            Stage::Main => Stage::Sub,
            Stage::Sub => Stage::Soup,
            Stage::Soup | Stage::Completed => Stage::Completed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Main => "main",
            Stage::Sub => "sub",
            Stage::Soup => "soup",
            Stage::Completed => "completed",
        }
    }

    /// The three proposal stages, in dialog order.
    pub const COURSES: [Stage; 3] = [Stage::Main, Stage::Sub, Stage::Soup];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "main" => Ok(Stage::Main),
            "sub" => Ok(Stage::Sub),
            "soup" => Ok(Stage::Soup),
            "completed" => Ok(Stage::Completed),
            other => Err(format!("unknown stage: {other}")),
        }
    }
}

/// Cuisine category of the menu being composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MenuCategory {
    #[default]
    Japanese,
    Western,
    Chinese,
}

impl MenuCategory {
    /// Infer the category from a recipe's declared cuisine tag.
    /// Unrecognized tags fall back to japanese.
    pub fn infer(menu_type: &str) -> Self {
        let lower = menu_type.to_lowercase();
        if ["洋食", "western", "西洋"].iter().any(|m| lower.contains(m)) {
            MenuCategory::Western
        } else if ["中華", "chinese"].iter().any(|m| lower.contains(m)) {
            MenuCategory::Chinese
        } else {
            MenuCategory::Japanese
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MenuCategory::Japanese => "japanese",
            MenuCategory::Western => "western",
            MenuCategory::Chinese => "chinese",
        }
    }
}

impl fmt::Display for MenuCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which component produced a recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeSource {
    Llm,
    Rag,
    Web,
    Manual,
}

impl Default for RecipeSource {
    fn default() -> Self {
        RecipeSource::Manual
    }
}

/// URL metadata attached to a candidate from the web-search task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlRef {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub domain: String,
}

/// One recipe choice offered to the user during a proposal round.
///
/// The loose defaults mirror what the proposal backends actually send;
/// only the title is guaranteed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Candidate {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub source: RecipeSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub ingredients: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<UrlRef>,
    /// Cuisine tag from the proposing backend, used to infer the menu
    /// category when a main dish is chosen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// A pending clarification the session is suspended on.
///
/// Non-null confirmation means the next user message is interpreted as
/// the reply, never as a new request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Confirmation {
    /// An inventory update/delete matched several rows; the graph is
    /// frozen until the user says which one to act on.
    Ambiguity {
        original_request: String,
        question: String,
        /// The task that reported the ambiguity; resumption rewrites it.
        task_id: String,
        /// Candidate rows reported by the tool.
        items: Vec<Value>,
        /// `"update"` or `"delete"`.
        operation: String,
        /// Tasks that had not run when the graph was suspended, pending
        /// task first.
        remaining: Vec<TaskSpec>,
        /// Results of tasks completed before the suspension, re-injected
        /// on resumption so references resolve identically.
        completed: Map<String, Value>,
        timestamp: DateTime<Utc>,
    },
}

impl Confirmation {
    pub fn question(&self) -> &str {
        match self {
            Confirmation::Ambiguity { question, .. } => question,
        }
    }
}

/// Free-form per-session context the planner and executor read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    /// Inventory names cached on the last `get_inventory`, reused by
    /// additional-proposal rounds without refetching.
    #[serde(default)]
    pub inventory_items: Vec<String>,
    #[serde(default)]
    pub main_ingredient: Option<String>,
    #[serde(default)]
    pub menu_type: String,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl SessionContext {
    /// Resolve a `session.context.X` reference.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "inventory_items" => Some(Value::from(self.inventory_items.clone())),
            "main_ingredient" => Some(
                self.main_ingredient
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "menu_type" => Some(Value::String(self.menu_type.clone())),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// Recipes selected so far, one slot per course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectedRecipes {
    pub main: Option<Candidate>,
    pub sub: Option<Candidate>,
    pub soup: Option<Candidate>,
}

impl SelectedRecipes {
    pub fn get(&self, stage: Stage) -> Option<&Candidate> {
        match stage {
            Stage::Main => self.main.as_ref(),
            Stage::Sub => self.sub.as_ref(),
            Stage::Soup => self.soup.as_ref(),
            Stage::Completed => None,
        }
    }

    fn set(&mut self, stage: Stage, candidate: Candidate) {
        match stage {
            Stage::Main => self.main = Some(candidate),
            Stage::Sub => self.sub = Some(candidate),
            Stage::Soup => self.soup = Some(candidate),
            Stage::Completed => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.sub.is_none() && self.soup.is_none()
    }
}

/// Per-stage collections (proposed titles, offered candidates).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerStage<T> {
    pub main: Vec<T>,
    pub sub: Vec<T>,
    pub soup: Vec<T>,
}

impl<T> PerStage<T> {
    pub fn get(&self, stage: Stage) -> &[T] {
        match stage {
            Stage::Main => &self.main,
            Stage::Sub => &self.sub,
            Stage::Soup => &self.soup,
            Stage::Completed => &[],
        }
    }

    pub fn get_mut(&mut self, stage: Stage) -> Option<&mut Vec<T>> {
        match stage {
            Stage::Main => Some(&mut self.main),
            Stage::Sub => Some(&mut self.sub),
            Stage::Soup => Some(&mut self.soup),
            Stage::Completed => None,
        }
    }
}

/// One conversation's state, keyed by session id, owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub stage: Stage,
    pub selected: SelectedRecipes,
    /// Inventory names consumed by selected recipes, in selection order.
    pub used_ingredients: Vec<String>,
    pub menu_category: MenuCategory,
    /// Titles offered in earlier rounds, excluded from the next round.
    pub proposed_titles: PerStage<String>,
    /// The last offered choices, validated against on selection.
    pub candidates: PerStage<Candidate>,
    pub context: SessionContext,
    pub confirmation: Option<Confirmation>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            created_at: now,
            last_accessed: now,
            stage: Stage::Main,
            selected: SelectedRecipes::default(),
            used_ingredients: Vec::new(),
            menu_category: MenuCategory::default(),
            proposed_titles: PerStage::default(),
            candidates: PerStage::default(),
            context: SessionContext::default(),
            confirmation: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    pub fn is_waiting_for_confirmation(&self) -> bool {
        self.confirmation.is_some()
    }

    /// Record titles offered to the user so later rounds can exclude them.
    pub fn add_proposed_titles(&mut self, stage: Stage, titles: impl IntoIterator<Item = String>) {
        if let Some(slot) = self.proposed_titles.get_mut(stage) {
            for title in titles {
                if !slot.contains(&title) {
                    slot.push(title);
                }
            }
        }
    }

    pub fn set_candidates(&mut self, stage: Stage, candidates: Vec<Candidate>) {
        if let Some(slot) = self.candidates.get_mut(stage) {
            *slot = candidates;
        }
    }

    /// Record the user's pick for the current stage and advance.
    ///
    /// Maps the recipe's ingredients onto the cached inventory and unions
    /// them into `used_ingredients`; a main-dish pick also fixes the menu
    /// category from the recipe's cuisine tag.
    pub fn set_selected_recipe(&mut self, stage: Stage, candidate: Candidate) {
        let mapped =
            mapper::map_recipe_to_inventory(&candidate.ingredients, &self.context.inventory_items);
        self.used_ingredients = mapper::union_used(&self.used_ingredients, mapped);

        if stage == Stage::Main {
            if let Some(menu_type) = &candidate.menu_type {
                self.menu_category = MenuCategory::infer(menu_type);
            }
        }

        self.selected.set(stage, candidate);
        self.stage = self.stage.advance();
    }

    /// Inventory items not yet consumed by selected recipes.
    ///
    /// Comparison is on normalized names so surface variants of the same
    /// item do not survive; the original inventory spelling is returned.
    pub fn remaining_ingredients(&self) -> Vec<String> {
        let used: std::collections::HashSet<String> = self
            .used_ingredients
            .iter()
            .map(|i| mapper::normalize(i))
            .collect();

        let mut seen = std::collections::HashSet::new();
        self.context
            .inventory_items
            .iter()
            .filter(|item| {
                let key = mapper::normalize(item);
                !used.contains(&key) && seen.insert(key)
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(title: &str, ingredients: &[&str]) -> Candidate {
        Candidate {
            title: title.to_string(),
            ingredients: ingredients.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn session_with_inventory(items: &[&str]) -> Session {
        let mut s = Session::new("s-1", UserId::from("u-1"));
        s.context.inventory_items = items.iter().map(|s| s.to_string()).collect();
        s
    }

    #[test]
    fn stage_advances_monotonically() {
        assert_eq!(Stage::Main.advance(), Stage::Sub);
        assert_eq!(Stage::Sub.advance(), Stage::Soup);
        assert_eq!(Stage::Soup.advance(), Stage::Completed);
        assert_eq!(Stage::Completed.advance(), Stage::Completed);
    }

    #[test]
    fn selection_records_used_ingredients_and_advances() {
        let mut s = session_with_inventory(&["milk", "egg", "spinach", "ham"]);
        s.set_selected_recipe(Stage::Main, candidate("omelette", &["egg", "milk"]));

        assert_eq!(s.stage, Stage::Sub);
        assert_eq!(s.used_ingredients, vec!["egg", "milk"]);
        assert_eq!(s.remaining_ingredients(), vec!["spinach", "ham"]);
    }

    #[test]
    fn main_selection_infers_menu_category() {
        let mut s = session_with_inventory(&["pasta"]);
        let mut c = candidate("carbonara", &["pasta"]);
        c.menu_type = Some("洋食".to_string());
        s.set_selected_recipe(Stage::Main, c);
        assert_eq!(s.menu_category, MenuCategory::Western);
    }

    #[test]
    fn sub_selection_keeps_menu_category() {
        let mut s = session_with_inventory(&["rice"]);
        let mut c = candidate("fried rice", &["rice"]);
        c.menu_type = Some("中華".to_string());
        s.set_selected_recipe(Stage::Sub, c);
        // Only the main dish fixes the category.
        assert_eq!(s.menu_category, MenuCategory::Japanese);
    }

    #[test]
    fn used_ingredients_accumulate_across_stages() {
        let mut s = session_with_inventory(&["milk", "egg", "spinach", "sesame", "cabbage"]);
        s.set_selected_recipe(Stage::Main, candidate("omelette", &["egg", "milk"]));
        s.set_selected_recipe(Stage::Sub, candidate("ohitashi", &["spinach", "sesame", "egg"]));

        assert_eq!(s.used_ingredients, vec!["egg", "milk", "spinach", "sesame"]);
        assert_eq!(s.remaining_ingredients(), vec!["cabbage"]);
        assert_eq!(s.stage, Stage::Soup);
    }

    #[test]
    fn remaining_dedups_surface_variants() {
        let mut s = session_with_inventory(&["レンコン", "れんこん", "卵"]);
        s.set_selected_recipe(Stage::Main, candidate("tamagoyaki", &["卵"]));
        // Both spellings normalize to the same key; one survives.
        assert_eq!(s.remaining_ingredients(), vec!["レンコン"]);
    }

    #[test]
    fn proposed_titles_dedup() {
        let mut s = session_with_inventory(&[]);
        s.add_proposed_titles(Stage::Main, ["a".to_string(), "b".to_string()]);
        s.add_proposed_titles(Stage::Main, ["b".to_string(), "c".to_string()]);
        assert_eq!(s.proposed_titles.get(Stage::Main), ["a", "b", "c"]);
    }

    #[test]
    fn menu_category_inference_table() {
        assert_eq!(MenuCategory::infer("洋食"), MenuCategory::Western);
        assert_eq!(MenuCategory::infer("Western style"), MenuCategory::Western);
        assert_eq!(MenuCategory::infer("中華"), MenuCategory::Chinese);
        assert_eq!(MenuCategory::infer("和食"), MenuCategory::Japanese);
        assert_eq!(MenuCategory::infer(""), MenuCategory::Japanese);
    }
}
