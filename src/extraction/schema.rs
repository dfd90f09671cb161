//! Extraction response schema
//!
//! Each section is decoded item by item so one malformed entry does not
//! discard the rest of the chapter's facts.

use crate::graph::{CharacterStateDelta, RelationshipDelta};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "title", alias = "name")]
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub importance: Option<Value>,
    #[serde(default, alias = "characters")]
    pub participants: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub plotline: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeshadowRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "description", alias = "text")]
    pub content: String,
    #[serde(default)]
    pub importance: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "expected_payoff_chapter", alias = "payoffChapter")]
    pub expected_payoff_chapter: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotlineRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldRuleRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(alias = "rule", alias = "content")]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// A character or location given either as a bare name or as an object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NameRecord {
    Plain(String),
    Detailed {
        name: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl NameRecord {
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(name) | Self::Detailed { name, .. } => name.trim(),
        }
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Detailed { role, .. } => role.as_deref(),
            Self::Plain(_) => None,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Detailed { description, .. } => description.as_deref(),
            Self::Plain(_) => None,
        }
    }
}

/// Causal link between two events, referenced by id or summary
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CausalRecord {
    #[serde(alias = "cause", alias = "source")]
    pub from: String,
    #[serde(alias = "effect", alias = "target")]
    pub to: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// Characters joining or leaving a faction
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactionDelta {
    #[serde(alias = "name")]
    pub faction: String,
    #[serde(default, alias = "characters")]
    pub members: Vec<String>,
}

/// A character moving to a location
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationDelta {
    #[serde(alias = "name", alias = "characterName")]
    pub character: String,
    #[serde(alias = "to", alias = "destination")]
    pub location: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(alias = "title")]
    pub description: String,
    #[serde(default, alias = "due_by_chapter", alias = "deadline")]
    pub due_by_chapter: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct StateDeltas {
    pub characters: Vec<CharacterStateDelta>,
    pub factions: Vec<FactionDelta>,
    pub locations: Vec<LocationDelta>,
    pub quests_opened: Vec<QuestRecord>,
    /// Quest ids or descriptions
    pub quests_resolved: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeatRecord {
    #[serde(alias = "type", alias = "beat_type")]
    pub beat_type: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tension: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictArcRecord {
    #[serde(alias = "title")]
    pub name: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default, alias = "total_beats", alias = "totalSteps")]
    pub total_beats: Option<Value>,
    #[serde(default)]
    pub urgency: Option<Value>,
    #[serde(default, alias = "next_action", alias = "nextStep")]
    pub next_action: Option<String>,
    #[serde(default)]
    pub parties: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterArcRecord {
    #[serde(alias = "character", alias = "character_name")]
    pub character_name: String,
    #[serde(alias = "arc", alias = "name", alias = "arc_name")]
    pub arc_name: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default, alias = "total_beats", alias = "totalSteps")]
    pub total_beats: Option<Value>,
    #[serde(default)]
    pub priority: Option<Value>,
    #[serde(default, alias = "next_action", alias = "nextStep")]
    pub next_action: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveRecord {
    #[serde(alias = "character", alias = "character_name", alias = "pov")]
    pub character_name: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Everything one extraction pass proposes for a chapter
#[derive(Debug, Clone, Default)]
pub struct ExtractionResponse {
    pub events: Vec<EventRecord>,
    pub foreshadows: Vec<ForeshadowRecord>,
    pub plotlines: Vec<PlotlineRecord>,
    pub world_rules: Vec<WorldRuleRecord>,
    pub characters: Vec<NameRecord>,
    pub locations: Vec<NameRecord>,
    pub causal_relations: Vec<CausalRecord>,
    pub character_relations: Vec<RelationshipDelta>,
    pub state_deltas: StateDeltas,
    pub narrative_beat: Option<BeatRecord>,
    pub conflict_arcs: Vec<ConflictArcRecord>,
    pub character_arcs: Vec<CharacterArcRecord>,
    pub perspective: Option<PerspectiveRecord>,
}

fn lookup<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| root.get(*k)).filter(|v| !v.is_null())
}

/// Decode a list section; a single object is accepted as a one-item list
fn section<T: DeserializeOwned>(root: &Value, keys: &[&str]) -> Vec<T> {
    let items: Vec<&Value> = match lookup(root, keys) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!(section = keys[0], error = %e, "skipping malformed extraction item");
                None
            }
        })
        .collect()
}

fn single<T: DeserializeOwned>(root: &Value, keys: &[&str]) -> Option<T> {
    match lookup(root, keys)? {
        Value::Array(items) => items
            .iter()
            .find_map(|item| serde_json::from_value(item.clone()).ok()),
        other => serde_json::from_value(other.clone()).ok(),
    }
}

impl ExtractionResponse {
    pub fn from_value(root: &Value) -> Self {
        let deltas_root = lookup(root, &["stateDeltas", "state_deltas", "stateChanges"]);
        let state_deltas = deltas_root
            .map(|d| StateDeltas {
                characters: section(d, &["characters", "characterStates", "character_states"]),
                factions: section(d, &["factions", "factionChanges"]),
                locations: section(d, &["locations", "locationChanges", "movements"]),
                quests_opened: section(d, &["questsOpened", "quests_opened", "newQuests"]),
                quests_resolved: section(d, &["questsResolved", "quests_resolved", "resolvedQuests"]),
            })
            .unwrap_or_default();

        Self {
            events: section(root, &["events"]),
            foreshadows: section(root, &["foreshadows", "foreshadowing", "foreshadowings"]),
            plotlines: section(root, &["plotlines", "plotLines", "plot_lines"]),
            world_rules: section(root, &["worldRules", "world_rules", "rules"]),
            characters: section(root, &["characters"]),
            locations: section(root, &["locations"]),
            causal_relations: section(root, &["causalRelations", "causal_relations", "causalLinks"]),
            character_relations: section(
                root,
                &["characterRelations", "character_relations", "relationships"],
            ),
            state_deltas,
            narrative_beat: single(root, &["narrativeBeat", "narrative_beat", "beat"]),
            conflict_arcs: section(root, &["conflictArcs", "conflict_arcs"]),
            character_arcs: section(root, &["characterArcs", "character_arcs"]),
            perspective: single(root, &["perspective", "perspectiveUsage", "perspective_usage"]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.foreshadows.is_empty()
            && self.plotlines.is_empty()
            && self.world_rules.is_empty()
            && self.characters.is_empty()
            && self.locations.is_empty()
            && self.causal_relations.is_empty()
            && self.character_relations.is_empty()
            && self.state_deltas.characters.is_empty()
            && self.state_deltas.factions.is_empty()
            && self.state_deltas.locations.is_empty()
            && self.state_deltas.quests_opened.is_empty()
            && self.state_deltas.quests_resolved.is_empty()
            && self.narrative_beat.is_none()
            && self.conflict_arcs.is_empty()
            && self.character_arcs.is_empty()
            && self.perspective.is_none()
    }
}

/// Read a number given as JSON number or numeric string
pub fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Non-negative whole count from a lenient number
pub fn count(value: Option<&Value>) -> u32 {
    number(value)
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| n.round().min(f64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}
