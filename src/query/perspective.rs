//! Viewpoint history and dominance detection

use crate::graph::{EntityData, GraphEntity};
use serde_json::json;

/// Consecutive same-character entries that trigger a switch suggestion
pub const DOMINANCE_RUN: usize = 3;

/// Source tag on synthesized recommendation entities
pub const RECOMMENDATION_SOURCE: &str = "perspective_history";

fn viewpoint(entity: &GraphEntity) -> Option<&str> {
    match &entity.data {
        EntityData::PerspectiveUsage { character_name, .. } => Some(character_name),
        _ => None,
    }
}

/// Last `window` perspective records, newest first.
///
/// When one character holds the viewpoint for the newest
/// [`DOMINANCE_RUN`] or more entries, a recommendation entity is prepended.
pub fn perspective_history(
    records: &[GraphEntity],
    novel_id: &str,
    current_chapter: u32,
    window: usize,
) -> Vec<GraphEntity> {
    let mut recent: Vec<GraphEntity> = records
        .iter()
        .filter(|e| viewpoint(e).is_some())
        .cloned()
        .collect();
    recent.sort_by(|a, b| {
        b.chapter_number
            .cmp(&a.chapter_number)
            .then_with(|| b.id.cmp(&a.id))
    });
    recent.truncate(window);

    let Some(dominant) = recent.first().and_then(viewpoint).map(str::to_string) else {
        return recent;
    };
    let run = recent
        .iter()
        .take_while(|e| viewpoint(e) == Some(dominant.as_str()))
        .count();

    if run >= DOMINANCE_RUN {
        let message = format!(
            "{} has held the viewpoint for {} consecutive chapters; consider switching perspective",
            dominant, run
        );
        let recommendation = GraphEntity::new(
            format!("rec-pov-{}", current_chapter),
            novel_id,
            current_chapter,
            EntityData::Recommendation { message },
        )
        .with_source(RECOMMENDATION_SOURCE)
        .with_extra("suggestedAction", json!("switch_perspective"))
        .with_extra("dominantCharacter", json!(dominant))
        .with_extra("consecutive", json!(run));
        recent.insert(0, recommendation);
    }
    recent
}
