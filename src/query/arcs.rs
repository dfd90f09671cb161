//! Active conflict and character arcs

use crate::graph::{EntityData, GraphEntity};
use std::collections::HashMap;

const TERMINAL_STAGES: &[&str] = &["解决", "已解决", "resolved", "完结", "已完结", "completed"];

/// Whether an arc stage marks the arc as finished.
///
/// Matches whole stage names only, so "未解决" or "unresolved" stay active.
pub fn is_terminal_stage(stage: &str) -> bool {
    let lower = stage.trim().to_lowercase();
    TERMINAL_STAGES.iter().any(|t| lower == *t)
}

/// A `total_beats` of 0 means the total is unknown, not that the arc is spent
fn is_active(stage: &str, progress: u32, total_beats: u32) -> bool {
    let exhausted = total_beats > 0 && progress >= total_beats;
    !is_terminal_stage(stage) && !exhausted
}

/// Keep only the newest record per key; ties go to the later id
fn latest_per_key<'a, F>(arcs: &'a [GraphEntity], key_of: F) -> Vec<&'a GraphEntity>
where
    F: Fn(&GraphEntity) -> Option<String>,
{
    let mut latest: HashMap<String, &GraphEntity> = HashMap::new();
    for arc in arcs {
        let Some(key) = key_of(arc) else {
            continue;
        };
        let newer = latest.get(&key).map_or(true, |existing| {
            (arc.chapter_number, &arc.id) >= (existing.chapter_number, &existing.id)
        });
        if newer {
            latest.insert(key, arc);
        }
    }
    latest.into_values().collect()
}

/// Conflict arcs still in play, most urgent first
pub fn active_conflict_arcs(arcs: &[GraphEntity], limit: usize) -> Vec<GraphEntity> {
    let mut active: Vec<(f64, GraphEntity)> = latest_per_key(arcs, |e| match &e.data {
        EntityData::ConflictArc { name, .. } => Some(name.to_lowercase()),
        _ => None,
    })
    .into_iter()
    .filter_map(|e| match &e.data {
        EntityData::ConflictArc {
            stage,
            progress,
            total_beats,
            urgency,
            ..
        } if is_active(stage, *progress, *total_beats) => Some((*urgency, e.clone().with_score(*urgency))),
        _ => None,
    })
    .collect();

    active.sort_by(|(ua, a), (ub, b)| {
        ub.total_cmp(ua)
            .then_with(|| b.chapter_number.cmp(&a.chapter_number))
            .then_with(|| a.id.cmp(&b.id))
    });
    active.into_iter().take(limit).map(|(_, e)| e).collect()
}

/// Character arcs still in play, highest priority first
pub fn active_character_arcs(arcs: &[GraphEntity], limit: usize) -> Vec<GraphEntity> {
    let mut active: Vec<(f64, GraphEntity)> = latest_per_key(arcs, |e| match &e.data {
        EntityData::CharacterArc {
            character_name,
            arc_name,
            ..
        } => Some(format!("{}\u{1f}{}", character_name.to_lowercase(), arc_name.to_lowercase())),
        _ => None,
    })
    .into_iter()
    .filter_map(|e| match &e.data {
        EntityData::CharacterArc {
            stage,
            progress,
            total_beats,
            priority,
            ..
        } if is_active(stage, *progress, *total_beats) => Some((*priority, e.clone().with_score(*priority))),
        _ => None,
    })
    .collect();

    active.sort_by(|(pa, a), (pb, b)| {
        pb.total_cmp(pa)
            .then_with(|| b.chapter_number.cmp(&a.chapter_number))
            .then_with(|| a.id.cmp(&b.id))
    });
    active.into_iter().take(limit).map(|(_, e)| e).collect()
}

/// Next planned action recorded on an arc entity
pub fn next_action(arc: &GraphEntity) -> Option<&str> {
    match &arc.data {
        EntityData::ConflictArc { next_action, .. } | EntityData::CharacterArc { next_action, .. } => {
            next_action.as_deref().filter(|s| !s.trim().is_empty())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conflict(id: &str, chapter: u32, name: &str, stage: &str, progress: u32, total: u32, urgency: f64) -> GraphEntity {
        GraphEntity::new(
            id,
            "n",
            chapter,
            EntityData::ConflictArc {
                name: name.to_string(),
                stage: stage.to_string(),
                progress,
                total_beats: total,
                urgency,
                next_action: Some(format!("push {}", name)),
                parties: vec![],
            },
        )
    }

    fn character_arc(id: &str, chapter: u32, who: &str, stage: &str, priority: f64) -> GraphEntity {
        GraphEntity::new(
            id,
            "n",
            chapter,
            EntityData::CharacterArc {
                character_name: who.to_string(),
                arc_name: "growth".to_string(),
                stage: stage.to_string(),
                progress: 1,
                total_beats: 5,
                priority,
                next_action: None,
            },
        )
    }

    #[test]
    fn terminal_stages() {
        assert!(is_terminal_stage("已解决"));
        assert!(is_terminal_stage("Resolved"));
        assert!(is_terminal_stage("completed"));
        assert!(is_terminal_stage(" 完结 "));
        assert!(!is_terminal_stage("escalating"));
    }

    #[test]
    fn negated_stages_stay_active() {
        assert!(!is_terminal_stage("未解决"));
        assert!(!is_terminal_stage("unresolved"));
        assert!(!is_terminal_stage("未完结"));
        assert!(!is_terminal_stage("nearly completed"));

        let arcs = vec![
            conflict("a", 1, "Blood Debt", "未解决", 1, 5, 0.7),
            conflict("b", 2, "Border Raid", "unresolved", 2, 5, 0.6),
            conflict("c", 3, "Old Grudge", "rising", 1, 5, 0.5),
        ];
        let ids: Vec<String> = active_conflict_arcs(&arcs, 10).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let characters = vec![character_arc("x", 1, "Lin Chen", "unresolved", 0.4)];
        assert_eq!(active_character_arcs(&characters, 10).len(), 1);
    }

    #[test]
    fn unknown_total_beats_keep_arc_active() {
        let arcs = vec![
            conflict("fresh", 2, "Rumor", "rising", 0, 0, 0.3),
            conflict("spent", 2, "Siege", "rising", 5, 5, 0.9),
        ];
        let ids: Vec<String> = active_conflict_arcs(&arcs, 10).into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["fresh"]);
    }

    #[test]
    fn conflict_arcs_filtered_and_ordered() {
        let arcs = vec![
            conflict("a", 1, "Sect War", "escalating", 2, 6, 0.4),
            conflict("b", 2, "Duel", "climax", 1, 3, 0.9),
            conflict("c", 3, "Feud", "resolved", 1, 3, 1.0),
            conflict("d", 4, "Heist", "rising", 4, 4, 0.8),
            conflict("e", 4, "Open", "rising", 4, 0, 0.1),
        ];
        let active = active_conflict_arcs(&arcs, 10);
        let ids: Vec<&str> = active.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "e"]);
        assert_eq!(next_action(&active[0]), Some("push Duel"));
    }

    #[test]
    fn latest_record_decides_arc_status() {
        let arcs = vec![
            conflict("war-1", 1, "Sect War", "rising", 1, 6, 0.5),
            conflict("war-2", 7, "sect war", "resolved", 6, 6, 0.5),
        ];
        assert!(active_conflict_arcs(&arcs, 10).is_empty());
    }

    #[test]
    fn character_arcs_by_priority() {
        let arcs = vec![
            character_arc("x", 1, "Lin Chen", "awakening", 0.3),
            character_arc("y", 2, "Su Yan", "doubt", 0.9),
            character_arc("z", 3, "Old Wu", "完结", 1.0),
        ];
        let active = active_character_arcs(&arcs, 1);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "y");
        assert_eq!(active[0].relevance_score, Some(0.9));
    }
}
