//! Token-budgeted digest of gathered planning context
//!
//! Token counts are estimates: one token per CJK character, one per four
//! other characters. Each section is truncated to its own allowance.

use super::content::CharacterProfile;
use super::tools::tool_name;
use crate::config::DigestBudget;
use crate::graph::{EntityData, GraphEntity};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const ELLIPSIS: char = '…';

/// Everything the planner has gathered so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatheredContext {
    pub core_narrative: Option<String>,
    pub character_profiles: Vec<CharacterProfile>,
    /// Latest result per tool name
    pub tool_results: BTreeMap<String, Value>,
}

impl GatheredContext {
    pub fn result(&self, tool: &str) -> Option<&Value> {
        self.tool_results.get(tool)
    }

    /// Entities under `key` in a tool's result; malformed items are skipped
    pub fn entities(&self, tool: &str, key: &str) -> Vec<GraphEntity> {
        self.result(tool)
            .and_then(|r| r.get(key))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{3000}'..='\u{303F}'
        | '\u{FF00}'..='\u{FFEF}')
}

/// Cost in quarter tokens
fn char_cost(c: char) -> usize {
    if is_cjk(c) {
        4
    } else {
        1
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    let quarters: usize = text.chars().map(char_cost).sum();
    quarters.div_ceil(4)
}

/// Cut `text` to fit `budget` tokens, marking the cut with an ellipsis
pub fn truncate_to_tokens(text: &str, budget: usize) -> String {
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    let allowance = budget.saturating_mul(4).saturating_sub(char_cost(ELLIPSIS));
    let mut spent = 0;
    let mut out = String::new();
    for c in text.chars() {
        spent += char_cost(c);
        if spent > allowance {
            break;
        }
        out.push(c);
    }
    let mut out = out.trim_end().to_string();
    out.push(ELLIPSIS);
    out
}

fn section(out: &mut String, title: &str, body: &str, budget: usize) {
    let body = body.trim();
    if body.is_empty() || budget == 0 {
        return;
    }
    out.push_str("## ");
    out.push_str(title);
    out.push('\n');
    out.push_str(&truncate_to_tokens(body, budget));
    out.push_str("\n\n");
}

fn recent_chapters_text(ctx: &GatheredContext) -> String {
    let Some(chapters) = ctx
        .result(tool_name::GET_RECENT_CHAPTERS)
        .and_then(|r| r.get("chapters"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    chapters
        .iter()
        .map(|c| {
            let number = c.get("chapterNumber").and_then(Value::as_u64).unwrap_or_default();
            let title = c.get("title").and_then(Value::as_str).unwrap_or_default();
            let body = c
                .get("summary")
                .and_then(Value::as_str)
                .or_else(|| c.get("content").and_then(Value::as_str))
                .unwrap_or_default();
            format!("- Ch{} {}: {}", number, title, body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn events_text(ctx: &GatheredContext) -> String {
    ctx.entities(tool_name::GET_RELEVANT_EVENTS, "events")
        .iter()
        .filter_map(|e| match &e.data {
            EntityData::Event { summary, importance, .. } => {
                Some(format!("- [Ch{}] {} (importance {:.2})", e.chapter_number, summary, importance))
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn foreshadowing_text(ctx: &GatheredContext) -> String {
    ctx.entities(tool_name::GET_UNRESOLVED_FORESHADOWING, "foreshadowing")
        .iter()
        .filter_map(|e| match &e.data {
            EntityData::Foreshadowing { content, tier, .. } => Some(format!(
                "- [{:?}] {} (planted Ch{}, id {})",
                tier, content, e.chapter_number, e.id
            )),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn profiles_text(profiles: &[CharacterProfile]) -> String {
    profiles
        .iter()
        .map(|p| {
            let role = p.role.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default();
            format!("- {}{}: {}", p.name, role, p.highlights.join("; "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn plain(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render the digest used in every step prompt
pub fn build_digest(ctx: &GatheredContext, budget: &DigestBudget) -> String {
    let mut out = String::new();
    let outline = plain(ctx.result(tool_name::GET_OUTLINE).and_then(|r| r.get("outline")));
    let blueprint = plain(
        ctx.result(tool_name::GET_VOLUME_BLUEPRINT)
            .and_then(|r| r.get("blueprint")),
    );

    section(&mut out, "Outline", &outline, budget.outline);
    section(&mut out, "Volume blueprint", &blueprint, budget.blueprint);
    section(
        &mut out,
        "Story so far",
        ctx.core_narrative.as_deref().unwrap_or_default(),
        budget.core_narrative,
    );
    section(&mut out, "Recent chapters", &recent_chapters_text(ctx), budget.recent_chapters);
    section(&mut out, "Key events", &events_text(ctx), budget.events);
    section(&mut out, "Open foreshadowing", &foreshadowing_text(ctx), budget.foreshadowing);
    section(
        &mut out,
        "Characters",
        &profiles_text(&ctx.character_profiles),
        budget.character_profiles,
    );
    out.trim_end().to_string()
}
