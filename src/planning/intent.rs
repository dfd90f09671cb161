//! Chapter intent: what the next chapter should emphasize

use crate::graph::{EntityData, GraphEntity};
use crate::query::{next_action, BeatClass, NarrativeRhythm};
use serde::{Deserialize, Serialize};

pub const MAX_FOCUS_NOTES: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrimaryFocus {
    CharacterRelief,
    ConflictEscalation,
    CharacterDevelopment,
    PlotAdvancement,
}

impl PrimaryFocus {
    pub fn target_beat(&self) -> BeatClass {
        match self {
            Self::CharacterRelief => BeatClass::Relief,
            Self::ConflictEscalation => BeatClass::Conflict,
            Self::CharacterDevelopment => BeatClass::Character,
            Self::PlotAdvancement => BeatClass::Plot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterIntent {
    pub primary_focus: PrimaryFocus,
    pub target_beat_type: BeatClass,
    pub focus_notes: Vec<String>,
}

/// Signals the intent is derived from
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentSignals<'a> {
    pub rhythm: Option<&'a NarrativeRhythm>,
    /// Active conflict arcs, most urgent first
    pub conflict_arcs: &'a [GraphEntity],
    /// Active character arcs, highest priority first
    pub character_arcs: &'a [GraphEntity],
    /// Perspective history, newest first, possibly led by a recommendation
    pub perspective: &'a [GraphEntity],
}

fn arc_note(arc: &GraphEntity) -> Option<String> {
    let action = next_action(arc)?;
    let label = match &arc.data {
        EntityData::CharacterArc {
            character_name,
            arc_name,
            ..
        } => format!("{} / {}", character_name, arc_name),
        other => other.label().to_string(),
    };
    Some(format!("{}: {}", label, action))
}

fn perspective_note(history: &[GraphEntity]) -> Option<String> {
    history.iter().find_map(|e| match &e.data {
        EntityData::Recommendation { message } => Some(message.clone()),
        _ => None,
    })
}

/// Pick the focus by priority: fatigue → relief, conflict arc → escalation,
/// character arc → development, otherwise plot advancement
pub fn derive_intent(signals: IntentSignals<'_>) -> ChapterIntent {
    let fatigued = signals.rhythm.is_some_and(|r| r.conflict_fatigue);
    let primary_focus = if fatigued {
        PrimaryFocus::CharacterRelief
    } else if !signals.conflict_arcs.is_empty() {
        PrimaryFocus::ConflictEscalation
    } else if !signals.character_arcs.is_empty() {
        PrimaryFocus::CharacterDevelopment
    } else {
        PrimaryFocus::PlotAdvancement
    };

    let rhythm_notes: Vec<String> = signals
        .rhythm
        .map(|r| r.recommendations.clone())
        .unwrap_or_default();
    let conflict_notes: Vec<String> = signals.conflict_arcs.iter().filter_map(arc_note).collect();
    let character_notes: Vec<String> = signals.character_arcs.iter().filter_map(arc_note).collect();

    // Notes backing the chosen focus lead
    let ordered: Vec<Vec<String>> = match primary_focus {
        PrimaryFocus::CharacterRelief => vec![rhythm_notes, character_notes, conflict_notes],
        PrimaryFocus::ConflictEscalation => vec![conflict_notes, character_notes, rhythm_notes],
        PrimaryFocus::CharacterDevelopment | PrimaryFocus::PlotAdvancement => {
            vec![character_notes, conflict_notes, rhythm_notes]
        }
    };

    let mut focus_notes: Vec<String> = Vec::new();
    for note in ordered
        .into_iter()
        .flatten()
        .chain(perspective_note(signals.perspective))
    {
        if !focus_notes.contains(&note) {
            focus_notes.push(note);
        }
    }
    // Keep the perspective hint even when other notes fill the list
    if let Some(hint) = perspective_note(signals.perspective) {
        if focus_notes.len() > MAX_FOCUS_NOTES {
            focus_notes.truncate(MAX_FOCUS_NOTES - 1);
            focus_notes.push(hint);
        }
    }
    focus_notes.truncate(MAX_FOCUS_NOTES);

    ChapterIntent {
        primary_focus,
        target_beat_type: primary_focus.target_beat(),
        focus_notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{BeatSample, NarrativeRhythm};

    fn conflict_arc(name: &str, action: &str) -> GraphEntity {
        GraphEntity::new(
            format!("ca-{}", name),
            "n",
            4,
            EntityData::ConflictArc {
                name: name.to_string(),
                stage: "rising".to_string(),
                progress: 1,
                total_beats: 4,
                urgency: 0.8,
                next_action: Some(action.to_string()),
                parties: vec![],
            },
        )
    }

    fn character_arc(who: &str, action: &str) -> GraphEntity {
        GraphEntity::new(
            format!("arc-{}", who),
            "n",
            4,
            EntityData::CharacterArc {
                character_name: who.to_string(),
                arc_name: "growth".to_string(),
                stage: "doubt".to_string(),
                progress: 1,
                total_beats: 5,
                priority: 0.7,
                next_action: Some(action.to_string()),
            },
        )
    }

    fn fatigued() -> NarrativeRhythm {
        let samples = [BeatClass::Plot, BeatClass::Conflict, BeatClass::Conflict, BeatClass::Conflict]
            .into_iter()
            .enumerate()
            .map(|(i, class)| BeatSample {
                chapter_number: i as u32 + 1,
                class,
            })
            .collect();
        NarrativeRhythm::from_classes(samples)
    }

    #[test]
    fn fatigue_takes_priority() {
        let rhythm = fatigued();
        let arcs = [conflict_arc("sect war", "ambush the envoy")];
        let intent = derive_intent(IntentSignals {
            rhythm: Some(&rhythm),
            conflict_arcs: &arcs,
            ..Default::default()
        });
        assert_eq!(intent.primary_focus, PrimaryFocus::CharacterRelief);
        assert_eq!(intent.target_beat_type, BeatClass::Relief);
        assert_eq!(intent.focus_notes[0], rhythm.recommendations[0]);
        assert!(intent.focus_notes.contains(&"sect war: ambush the envoy".to_string()));
    }

    #[test]
    fn conflict_arc_then_character_arc_then_plot() {
        let conflicts = [conflict_arc("sect war", "ambush the envoy")];
        let characters = [character_arc("Lin Chen", "confront his master")];

        let intent = derive_intent(IntentSignals {
            conflict_arcs: &conflicts,
            character_arcs: &characters,
            ..Default::default()
        });
        assert_eq!(intent.primary_focus, PrimaryFocus::ConflictEscalation);
        assert_eq!(intent.focus_notes[0], "sect war: ambush the envoy");

        let intent = derive_intent(IntentSignals {
            character_arcs: &characters,
            ..Default::default()
        });
        assert_eq!(intent.primary_focus, PrimaryFocus::CharacterDevelopment);
        assert_eq!(intent.focus_notes, vec!["Lin Chen / growth: confront his master".to_string()]);

        let intent = derive_intent(IntentSignals::default());
        assert_eq!(intent.primary_focus, PrimaryFocus::PlotAdvancement);
        assert_eq!(intent.target_beat_type, BeatClass::Plot);
        assert!(intent.focus_notes.is_empty());
    }

    #[test]
    fn notes_are_capped_and_keep_perspective_hint() {
        let conflicts: Vec<GraphEntity> = (0..8).map(|i| conflict_arc(&format!("c{}", i), "push")).collect();
        let hint = GraphEntity::new(
            "rec-pov-9",
            "n",
            9,
            EntityData::Recommendation {
                message: "switch viewpoint".to_string(),
            },
        );
        let intent = derive_intent(IntentSignals {
            conflict_arcs: &conflicts,
            perspective: std::slice::from_ref(&hint),
            ..Default::default()
        });
        assert_eq!(intent.focus_notes.len(), MAX_FOCUS_NOTES);
        assert_eq!(intent.focus_notes.last().unwrap(), "switch viewpoint");
    }
}
