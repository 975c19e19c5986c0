//! Keyword-driven request classification.
//!
//! Routes a user message to one of the request patterns, each of which has
//! a dedicated planning prompt and expected task shape. Classification is
//! rule-driven and deterministic: the same message and session state always
//! produce the same pattern. The trigger-token tables are data, not code,
//! so deployments can tune them without a rebuild.

use serde::{Deserialize, Serialize};

use kondate_sessions::{Session, Stage};

/// The request classes the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPattern {
    InventoryOp,
    MenuPlan,
    MainProposal,
    SubProposal,
    SoupProposal,
    MainAdditional,
    SubAdditional,
    SoupAdditional,
    ConfirmationReply,
    GreetingOrUnknown,
}

/// Inventory operation the verbs point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryOp {
    Add,
    Update,
    Delete,
    List,
}

/// Row-selection strategy extracted from qualifier words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyHint {
    ByName,
    ByNameAll,
    ByNameOldest,
    ByNameLatest,
}

impl StrategyHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyHint::ByName => "by_name",
            StrategyHint::ByNameAll => "by_name_all",
            StrategyHint::ByNameOldest => "by_name_oldest",
            StrategyHint::ByNameLatest => "by_name_latest",
        }
    }
}

/// Classification result plus the parameters extracted along the way.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    pub pattern: RequestPattern,
    pub inventory_op: Option<InventoryOp>,
    pub strategy: Option<StrategyHint>,
    pub main_ingredient: Option<String>,
}

impl Classified {
    fn pattern(pattern: RequestPattern) -> Self {
        Self {
            pattern,
            inventory_op: None,
            strategy: None,
            main_ingredient: None,
        }
    }
}

/// Trigger-token tables, bilingual by default.
///
/// The token sets are deployment configuration; the defaults cover the
/// Japanese phrasing the assistant was built around plus English
/// equivalents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRules {
    pub additional_markers: Vec<String>,
    pub main_markers: Vec<String>,
    pub sub_markers: Vec<String>,
    pub soup_markers: Vec<String>,
    pub menu_markers: Vec<String>,
    pub update_verbs: Vec<String>,
    pub delete_verbs: Vec<String>,
    pub add_verbs: Vec<String>,
    pub list_verbs: Vec<String>,
    pub all_qualifiers: Vec<String>,
    pub oldest_qualifiers: Vec<String>,
    pub latest_qualifiers: Vec<String>,
}

fn words(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ClassifierRules {
    fn default() -> Self {
        Self {
            additional_markers: words(&[
                "もっと", "もう", "他の", "別の", "追加で", "more", "other", "another",
                "additional",
            ]),
            main_markers: words(&["主菜", "メイン", "main dish", "main course", "main"]),
            sub_markers: words(&["副菜", "サイド", "side dish", "side"]),
            soup_markers: words(&["汁物", "スープ", "味噌汁", "soup"]),
            menu_markers: words(&[
                "献立", "メニュー", "レシピ", "作れる", "menu", "recipes", "what can i make",
            ]),
            update_verbs: words(&[
                "変えて", "変更", "修正", "更新", "にして", "change", "update",
            ]),
            delete_verbs: words(&["削除", "消して", "捨てて", "delete", "remove"]),
            add_verbs: words(&["追加", "入れて", "買った", "add"]),
            list_verbs: words(&["在庫", "一覧", "何がある", "inventory", "list"]),
            all_qualifiers: words(&["全部", "すべて", "全て", "all"]),
            oldest_qualifiers: words(&["古い", "oldest"]),
            latest_qualifiers: words(&["最新", "新しい", "latest", "newest"]),
        }
    }
}

impl ClassifierRules {
    fn matches(markers: &[String], message: &str) -> bool {
        markers.iter().any(|m| message.contains(m.as_str()))
    }
}

/// Rule-driven message classifier.
pub struct Classifier {
    rules: ClassifierRules,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierRules::default())
    }
}

impl Classifier {
    pub fn new(rules: ClassifierRules) -> Self {
        Self { rules }
    }

    /// Classify one message in the context of its session.
    ///
    /// Precedence, top to bottom: pending confirmation, additional
    /// proposal, explicit course proposal, menu plan, inventory verbs,
    /// fallback. More specific patterns win ties.
    pub fn classify(&self, message: &str, session: &Session) -> Classified {
        let lower = message.to_lowercase();

        if session.is_waiting_for_confirmation() {
            return Classified::pattern(RequestPattern::ConfirmationReply);
        }

        if ClassifierRules::matches(&self.rules.additional_markers, &lower)
            && session.stage != Stage::Completed
        {
            let pattern = match session.stage {
                Stage::Main => RequestPattern::MainAdditional,
                Stage::Sub => RequestPattern::SubAdditional,
                Stage::Soup => RequestPattern::SoupAdditional,
                Stage::Completed => unreachable!(),
            };
            return Classified::pattern(pattern);
        }

        if ClassifierRules::matches(&self.rules.main_markers, &lower) {
            let mut classified = Classified::pattern(RequestPattern::MainProposal);
            classified.main_ingredient = extract_main_ingredient(message);
            return classified;
        }
        if ClassifierRules::matches(&self.rules.sub_markers, &lower) {
            return Classified::pattern(RequestPattern::SubProposal);
        }
        if ClassifierRules::matches(&self.rules.soup_markers, &lower) {
            return Classified::pattern(RequestPattern::SoupProposal);
        }

        if ClassifierRules::matches(&self.rules.menu_markers, &lower) {
            return Classified::pattern(RequestPattern::MenuPlan);
        }

        if let Some(op) = self.detect_inventory_op(&lower) {
            let mut classified = Classified::pattern(RequestPattern::InventoryOp);
            classified.strategy = Some(self.detect_strategy(&lower));
            classified.inventory_op = Some(op);
            return classified;
        }

        Classified::pattern(RequestPattern::GreetingOrUnknown)
    }

    /// Update verbs are checked first: a "change to" request is a single
    /// update, never a delete plus an add.
    fn detect_inventory_op(&self, lower: &str) -> Option<InventoryOp> {
        if ClassifierRules::matches(&self.rules.update_verbs, lower) {
            return Some(InventoryOp::Update);
        }
        if ClassifierRules::matches(&self.rules.delete_verbs, lower) {
            return Some(InventoryOp::Delete);
        }
        if ClassifierRules::matches(&self.rules.add_verbs, lower) {
            return Some(InventoryOp::Add);
        }
        if ClassifierRules::matches(&self.rules.list_verbs, lower) {
            return Some(InventoryOp::List);
        }
        None
    }

    fn detect_strategy(&self, lower: &str) -> StrategyHint {
        if ClassifierRules::matches(&self.rules.all_qualifiers, lower) {
            StrategyHint::ByNameAll
        } else if ClassifierRules::matches(&self.rules.oldest_qualifiers, lower) {
            StrategyHint::ByNameOldest
        } else if ClassifierRules::matches(&self.rules.latest_qualifiers, lower) {
            StrategyHint::ByNameLatest
        } else {
            StrategyHint::ByName
        }
    }
}

/// Pull the requested main ingredient out of a main-dish request.
///
/// Handles the two phrasings that actually occur: `Xを使った/使って` and
/// English `with X` / `using X`. Anything else yields `None` and the
/// proposal falls back to the whole inventory.
fn extract_main_ingredient(message: &str) -> Option<String> {
    if let Some(idx) = message.find("を使っ") {
        let before = &message[..idx];
        // Take the run since the last separator, stepping past it.
        let start = before
            .rfind(['、', '。', ' ', '　'])
            .map(|i| {
                let sep_len = before[i..].chars().next().map(char::len_utf8).unwrap_or(0);
                i + sep_len
            })
            .unwrap_or(0);
        let candidate = before[start..].trim();
        if !candidate.is_empty() {
            return Some(candidate.to_string());
        }
    }

    let lower = message.to_lowercase();
    for marker in ["using ", "with "] {
        if let Some(idx) = lower.find(marker) {
            let rest = &message[idx + marker.len()..];
            let candidate = rest
                .split(|c: char| c == '.' || c == ',' || c == '!' || c == '?')
                .next()
                .unwrap_or("")
                .trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kondate_core::types::UserId;
    use kondate_protocol::TaskSpec;
    use kondate_sessions::Confirmation;

    fn session() -> Session {
        Session::new("s-1", UserId::from("u-1"))
    }

    fn classify(message: &str) -> Classified {
        Classifier::default().classify(message, &session())
    }

    #[test]
    fn classification_is_deterministic() {
        let s = session();
        let c = Classifier::default();
        let first = c.classify("牛乳を1本に変えて", &s);
        for _ in 0..5 {
            assert_eq!(c.classify("牛乳を1本に変えて", &s), first);
        }
    }

    #[test]
    fn pending_confirmation_wins_over_everything() {
        let mut s = session();
        s.confirmation = Some(Confirmation::Ambiguity {
            original_request: "change milk to 1 bottle".into(),
            question: "which milk?".into(),
            task_id: "task1".into(),
            items: vec![],
            operation: "update".into(),
            remaining: Vec::<TaskSpec>::new(),
            completed: serde_json::Map::new(),
            timestamp: Utc::now(),
        });
        let c = Classifier::default().classify("献立を教えて", &s);
        assert_eq!(c.pattern, RequestPattern::ConfirmationReply);
    }

    #[test]
    fn additional_follows_the_current_stage() {
        let c = Classifier::default();
        let mut s = session();
        assert_eq!(
            c.classify("もう5件提案して", &s).pattern,
            RequestPattern::MainAdditional
        );
        s.stage = Stage::Sub;
        assert_eq!(
            c.classify("他の提案を見せて", &s).pattern,
            RequestPattern::SubAdditional
        );
        s.stage = Stage::Soup;
        assert_eq!(
            c.classify("show me more", &s).pattern,
            RequestPattern::SoupAdditional
        );
    }

    #[test]
    fn additional_is_ignored_when_completed() {
        let mut s = session();
        s.stage = Stage::Completed;
        let c = Classifier::default().classify("もっと教えて", &s);
        assert_ne!(c.pattern, RequestPattern::SoupAdditional);
    }

    #[test]
    fn stage_proposals_beat_menu() {
        assert_eq!(classify("主菜を提案して").pattern, RequestPattern::MainProposal);
        assert_eq!(classify("Suggest a side dish").pattern, RequestPattern::SubProposal);
        assert_eq!(classify("汁物のレシピは？").pattern, RequestPattern::SoupProposal);
    }

    #[test]
    fn menu_plan_markers() {
        assert_eq!(classify("Suggest a menu.").pattern, RequestPattern::MenuPlan);
        assert_eq!(classify("献立を教えて").pattern, RequestPattern::MenuPlan);
        assert_eq!(
            classify("What can I make from my inventory?").pattern,
            RequestPattern::MenuPlan
        );
    }

    #[test]
    fn main_ingredient_extraction() {
        let c = classify("レンコンを使った主菜を教えて");
        assert_eq!(c.pattern, RequestPattern::MainProposal);
        assert_eq!(c.main_ingredient.as_deref(), Some("レンコン"));

        let c = classify("Suggest a main dish with chicken");
        assert_eq!(c.main_ingredient.as_deref(), Some("chicken"));
    }

    #[test]
    fn add_operation() {
        let c = classify("Add 4 green peppers");
        assert_eq!(c.pattern, RequestPattern::InventoryOp);
        assert_eq!(c.inventory_op, Some(InventoryOp::Add));
        assert_eq!(c.strategy, Some(StrategyHint::ByName));
    }

    #[test]
    fn change_to_is_a_single_update() {
        let c = classify("牛乳を1本に変えて");
        assert_eq!(c.inventory_op, Some(InventoryOp::Update));
        assert_eq!(c.strategy, Some(StrategyHint::ByName));
    }

    #[test]
    fn all_qualifier_regardless_of_word_order() {
        for msg in ["牛乳を全部削除して", "全部の牛乳を削除して", "delete all milk"] {
            let c = classify(msg);
            assert_eq!(c.inventory_op, Some(InventoryOp::Delete), "{msg}");
            assert_eq!(c.strategy, Some(StrategyHint::ByNameAll), "{msg}");
        }
    }

    #[test]
    fn oldest_and_latest_qualifiers() {
        assert_eq!(
            classify("古い牛乳を捨てて").strategy,
            Some(StrategyHint::ByNameOldest)
        );
        assert_eq!(
            classify("最新の牛乳を2本に変えて").strategy,
            Some(StrategyHint::ByNameLatest)
        );
    }

    #[test]
    fn greeting_falls_through() {
        assert_eq!(classify("hello").pattern, RequestPattern::GreetingOrUnknown);
        assert_eq!(classify("こんにちは").pattern, RequestPattern::GreetingOrUnknown);
    }
}
