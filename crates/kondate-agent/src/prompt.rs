//! Pattern-specific planning prompts.
//!
//! Each request pattern gets its own builder so the chat model sees the
//! exact task chain expected for that pattern. The tool catalog section is
//! rendered from the live registry descriptors, which keeps the prompt and
//! the planner's validation in lockstep. Builders are pure functions of
//! their arguments; nothing here reads external state.

use kondate_sessions::{MenuCategory, Stage};
use kondate_tools::{ParamKind, ToolRegistry};

use crate::classify::RequestPattern;

/// Everything a builder may interpolate.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub user_request: String,
    pub user_id: String,
    pub sse_session_id: String,
    pub main_ingredient: Option<String>,
    pub used_ingredients: Vec<String>,
    pub menu_category: Option<MenuCategory>,
}

/// A planning prompt, split into the system and user halves.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Build the planning prompt for a classified pattern.
pub fn build_prompt(pattern: RequestPattern, registry: &ToolRegistry, ctx: &PromptContext) -> Prompt {
    let system = system_section(registry);
    let user = match pattern {
        RequestPattern::InventoryOp => inventory_section(ctx),
        RequestPattern::MenuPlan => menu_section(ctx),
        RequestPattern::MainProposal => proposal_section(ctx, Stage::Main),
        RequestPattern::SubProposal => proposal_section(ctx, Stage::Sub),
        RequestPattern::SoupProposal => proposal_section(ctx, Stage::Soup),
        RequestPattern::MainAdditional => additional_section(ctx, Stage::Main),
        RequestPattern::SubAdditional => additional_section(ctx, Stage::Sub),
        RequestPattern::SoupAdditional => additional_section(ctx, Stage::Soup),
        // Confirmation replies never reach the planner; the orchestrator
        // resumes the suspended graph instead. Treated like greetings if
        // one ever slips through.
        RequestPattern::ConfirmationReply | RequestPattern::GreetingOrUnknown => {
            greeting_section(ctx)
        }
    };
    Prompt { system, user }
}

/// Shared system half: catalog, injection rules, output contract.
fn system_section(registry: &ToolRegistry) -> String {
    let mut out = String::from(
        "Decompose the user request into calls against the services below. \
         Reply with a single JSON document and nothing else.\n\nAvailable tools:\n",
    );

    for tool in registry.iter() {
        out.push_str(&format!("- `{}.{}(", tool.service, tool.method));
        let params: Vec<String> = tool
            .params
            .iter()
            .map(|p| {
                let kind = match p.kind {
                    ParamKind::String => "string",
                    ParamKind::Number => "number",
                    ParamKind::Boolean => "boolean",
                    ParamKind::List => "list",
                    ParamKind::Object => "object",
                    ParamKind::Any => "any",
                };
                if p.required {
                    format!("{}: {}", p.name, kind)
                } else {
                    format!("{}?: {}", p.name, kind)
                }
            })
            .collect();
        out.push_str(&params.join(", "));
        out.push_str(")`\n");
    }

    out.push_str(
        "\nParameter injection rules:\n\
         - Use \"taskK.result\" to inject the full result of an earlier task.\n\
         - Use \"taskK.result.path.to.field\" to inject one field.\n\
         - Proposal exclusions always use \"taskK.result.data\" (never the bare result).\n\
         - Web search titles always use \"taskK.result.data.candidates\".\n\
         - Use \"session.context.X\" to inject a session context value.\n\
         - \"taskA.result.data + taskB.result.data\" concatenates two lists, left first.\n\
         - Only reference tasks listed in the referencing task's dependencies.\n\
         \nStrategy rules for update_inventory / delete_inventory:\n\
         - The user said all of them: strategy=\"by_name_all\" (any word order).\n\
         - The user said the oldest: strategy=\"by_name_oldest\".\n\
         - The user said the latest: strategy=\"by_name_latest\".\n\
         - No qualifier: strategy=\"by_name\"; the system detects ambiguity itself.\n\
         - A request to change an item is ONE update_inventory task. Never emit a \
         delete plus an add for a change request.\n\
         \nOutput shape (strict, no comments):\n\
         {\"tasks\": [{\"id\": \"task1\", \"description\": \"...\", \
         \"service\": \"...\", \"method\": \"...\", \"parameters\": {}, \
         \"dependencies\": []}]}\n\
         Task ids are task1, task2, ... in order. dependencies lists the ids that \
         must complete first; [] when independent. For greetings or anything that \
         needs no tool, reply {\"tasks\": []}.\n",
    );
    out
}

fn inventory_section(ctx: &PromptContext) -> String {
    format!(
        "User request: \"{}\"\n\n\
         This is an inventory operation. Emit exactly the tasks the request \
         needs, usually one:\n\
         - adding an item: one `inventory_service.add_inventory` task\n\
         - changing an item: one `inventory_service.update_inventory` task\n\
         - deleting an item: one `inventory_service.delete_inventory` task\n\
         - showing the inventory: one `inventory_service.get_inventory` task\n",
        ctx.user_request
    )
}

fn menu_section(ctx: &PromptContext) -> String {
    format!(
        "User request: \"{}\"\n\n\
         This is a menu-plan request. Use the 4-task chain:\n\
         a. task1: `inventory_service.get_inventory()` fetches the full inventory.\n\
         b. task2: `recipe_service.generate_menu_plan(inventory_items=\"task1.result\", \
         user_id=\"{uid}\")`, dependencies [\"task1\"].\n\
         c. task3: `recipe_service.search_menu_from_rag(inventory_items=\"task1.result\", \
         user_id=\"{uid}\")`, dependencies [\"task1\"].\n\
         d. task4: `recipe_service.search_recipes_from_web(recipe_titles=[\"task2.result.main_dish\", \
         \"task2.result.side_dish\", \"task2.result.soup\", \"task3.result.main_dish\", \
         \"task3.result.side_dish\", \"task3.result.soup\"])`, dependencies [\"task2\", \"task3\"].\n",
        ctx.user_request,
        uid = ctx.user_id
    )
}

fn proposal_section(ctx: &PromptContext, stage: Stage) -> String {
    let course = stage.as_str();
    let mut out = format!(
        "User request: \"{}\"\n\nMain ingredient: {}\n",
        ctx.user_request,
        ctx.main_ingredient.as_deref().unwrap_or("none (propose from inventory)"),
    );
    if !ctx.used_ingredients.is_empty() {
        out.push_str(&format!(
            "Ingredients already used by earlier courses: {}\n",
            ctx.used_ingredients.join(", ")
        ));
    }
    if let Some(category) = ctx.menu_category {
        out.push_str(&format!("Menu category: {category}\n"));
    }
    out.push_str(&format!(
        "\nThis is a {course}-course proposal. Use the 4-task chain:\n\
         a. task1: `inventory_service.get_inventory()`.\n\
         b. task2: `history_service.history_get_recent_titles(user_id=\"{uid}\", \
         category=\"{course}\", days=14)`, dependencies [\"task1\"].\n\
         c. task3: `recipe_service.generate_proposals(inventory_items=\"task1.result\", \
         excluded_recipes=\"task2.result.data\", category=\"{course}\"{extra})`, \
         dependencies [\"task1\", \"task2\"].\n\
         d. task4: `recipe_service.search_recipes_from_web(recipe_titles=\
         \"task3.result.data.candidates\")`, dependencies [\"task3\"].\n\
         excluded_recipes must be \"task2.result.data\", not \"task2.result\".\n",
        uid = ctx.user_id,
        course = course,
        extra = proposal_extras(ctx, stage),
    ));
    out
}

fn proposal_extras(ctx: &PromptContext, stage: Stage) -> String {
    let mut extra = String::new();
    match &ctx.main_ingredient {
        Some(ingredient) if stage == Stage::Main => {
            extra.push_str(&format!(", main_ingredient=\"{ingredient}\""));
        }
        _ if stage == Stage::Main => extra.push_str(", main_ingredient=null"),
        _ => {}
    }
    if !ctx.used_ingredients.is_empty() {
        extra.push_str(&format!(
            ", used_ingredients={}",
            serde_json::to_string(&ctx.used_ingredients).unwrap_or_else(|_| "[]".into())
        ));
    }
    if let (Some(category), Stage::Soup) = (ctx.menu_category, stage) {
        extra.push_str(&format!(", menu_category=\"{category}\""));
    }
    extra
}

fn additional_section(ctx: &PromptContext, stage: Stage) -> String {
    let course = stage.as_str();
    format!(
        "User request: \"{}\"\n\nCurrent session id: {sid}\n\n\
         This is an additional {course}-course proposal round. Do NOT fetch the \
         inventory again; reuse the session context. Use the 4-task chain:\n\
         a. task1: `history_service.history_get_recent_titles(user_id=\"{uid}\", \
         category=\"{course}\", days=14)`.\n\
         b. task2: `session_service.session_get_proposed_titles(sse_session_id=\"{sid}\", \
         category=\"{course}\")`. Use the session id shown above, never a placeholder.\n\
         c. task3: `recipe_service.generate_proposals(\
         inventory_items=\"session.context.inventory_items\", \
         excluded_recipes=\"task1.result.data + task2.result.data\", \
         main_ingredient=\"session.context.main_ingredient\", \
         menu_type=\"session.context.menu_type\", category=\"{course}\")`, \
         dependencies [\"task1\", \"task2\"].\n\
         d. task4: `recipe_service.search_recipes_from_web(recipe_titles=\
         \"task3.result.data.candidates\")`, dependencies [\"task3\"].\n",
        ctx.user_request,
        sid = ctx.sse_session_id,
        uid = ctx.user_id,
        course = course,
    )
}

fn greeting_section(ctx: &PromptContext) -> String {
    format!(
        "User request: \"{}\"\n\n\
         This is a greeting or general conversation. Produce no tasks: reply \
         exactly {{\"tasks\": []}}.\n",
        ctx.user_request
    )
}
