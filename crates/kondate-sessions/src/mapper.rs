//! Ingredient name normalization and recipe-to-inventory mapping.
//!
//! Recipe ingredients arrive as free text from three different sources
//! (generative, retrieval, web); inventory rows are user-typed. Both sides
//! are normalized before comparison so that width variants, katakana vs
//! hiragana, and stray punctuation do not break the match.
//!
//! Pure functions, no I/O.

use tracing::debug;

/// Normalize an ingredient name for comparison.
///
/// Full-width ASCII digits and letters become half-width, full-width
/// katakana becomes hiragana, whitespace and the common punctuation set
/// are stripped, and ASCII is lowercased. Idempotent.
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let ch = match ch {
            // Full-width digits and letters to half-width.
            '\u{FF10}'..='\u{FF19}' | '\u{FF21}'..='\u{FF3A}' | '\u{FF41}'..='\u{FF5A}' => {
                char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch)
            }
            // Full-width katakana to hiragana.
            '\u{30A1}'..='\u{30F6}' => char::from_u32(ch as u32 - 0x60).unwrap_or(ch),
            _ => ch,
        };
        if ch.is_whitespace() {
            continue;
        }
        if matches!(
            ch,
            '-' | '\u{FF0D}'            // hyphen variants
                | '(' | ')' | '（' | '）' // parentheses variants
                | '・'                    // middle dot
                | ',' | '，' | '、'       // comma variants
                | '。' | '．' | '.'       // period variants
        ) {
            continue;
        }
        out.extend(ch.to_lowercase());
    }
    out
}

/// Map recipe ingredient names onto the user's inventory names.
///
/// Exact normalized match wins; otherwise the first inventory entry whose
/// normalized form contains, or is contained by, the recipe ingredient's
/// normalized form. Unmatched recipe ingredients are dropped. The output
/// preserves insertion order and removes duplicates.
pub fn map_recipe_to_inventory(recipe_ingredients: &[String], inventory: &[String]) -> Vec<String> {
    if recipe_ingredients.is_empty() || inventory.is_empty() {
        return Vec::new();
    }

    let inventory_normalized: Vec<(String, &String)> = inventory
        .iter()
        .map(|name| (normalize(name), name))
        .collect();

    let mut mapped: Vec<String> = Vec::new();
    for recipe_ingredient in recipe_ingredients {
        let needle = normalize(recipe_ingredient);
        if needle.is_empty() {
            continue;
        }

        let exact = inventory_normalized
            .iter()
            .find(|(norm, _)| *norm == needle);
        let hit = exact.or_else(|| {
            inventory_normalized
                .iter()
                .find(|(norm, _)| norm.contains(&needle) || needle.contains(norm.as_str()))
        });

        match hit {
            Some((_, original)) => {
                if !mapped.iter().any(|m| m == *original) {
                    mapped.push((*original).clone());
                }
            }
            None => {
                debug!(ingredient = %recipe_ingredient, "no inventory match for recipe ingredient");
            }
        }
    }
    mapped
}

/// Append newly mapped ingredients to the running used list, preserving
/// order and dropping duplicates.
pub fn union_used(existing: &[String], mapped: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = existing.to_vec();
    for item in mapped {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
