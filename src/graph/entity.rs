//! Entity representation in the narrative memory graph

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Forward-compatible extra fields carried alongside an entity's typed data
pub type ExtraFields = HashMap<String, Value>;

/// Kind discriminant for [`EntityData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Event,
    Foreshadowing,
    Plotline,
    WorldRule,
    Character,
    Location,
    NarrativeBeat,
    ConflictArc,
    CharacterArc,
    PerspectiveUsage,
    Recommendation,
}

impl EntityKind {
    /// Stable string form, used as the storage column value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Foreshadowing => "foreshadowing",
            Self::Plotline => "plotline",
            Self::WorldRule => "world_rule",
            Self::Character => "character",
            Self::Location => "location",
            Self::NarrativeBeat => "narrative_beat",
            Self::ConflictArc => "conflict_arc",
            Self::CharacterArc => "character_arc",
            Self::PerspectiveUsage => "perspective_usage",
            Self::Recommendation => "recommendation",
        }
    }

    /// Short prefix used when synthesizing ids
    fn id_prefix(&self) -> &'static str {
        match self {
            Self::Event => "evt",
            Self::Foreshadowing => "fs",
            Self::Plotline => "plot",
            Self::WorldRule => "rule",
            Self::Character => "char",
            Self::Location => "loc",
            Self::NarrativeBeat => "beat",
            Self::ConflictArc => "carc",
            Self::CharacterArc => "harc",
            Self::PerspectiveUsage => "pov",
            Self::Recommendation => "rec",
        }
    }

    /// Synthesize a random id for an entity whose source omitted one.
    ///
    /// Two extraction passes describing the same fact without a stable id
    /// produce two distinct entities.
    pub fn synthesize_id(&self) -> String {
        format!("{}-{}", self.id_prefix(), Uuid::new_v4().simple())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "event" => Self::Event,
            "foreshadowing" => Self::Foreshadowing,
            "plotline" => Self::Plotline,
            "world_rule" => Self::WorldRule,
            "character" => Self::Character,
            "location" => Self::Location,
            "narrative_beat" => Self::NarrativeBeat,
            "conflict_arc" => Self::ConflictArc,
            "character_arc" => Self::CharacterArc,
            "perspective_usage" => Self::PerspectiveUsage,
            "recommendation" => Self::Recommendation,
            other => return Err(format!("unknown entity kind: {}", other)),
        })
    }
}

/// Importance tier for foreshadowing ordering (`high=3, medium=2, low=1`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportanceTier {
    Low,
    Medium,
    High,
}

impl ImportanceTier {
    pub fn rank(&self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }

    /// Bucket a normalized importance in [0, 1] into a tier
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl Default for ImportanceTier {
    fn default() -> Self {
        Self::Medium
    }
}

/// Lifecycle of a planted foreshadow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForeshadowStatus {
    Planted,
    Hinted,
    Revealed,
}

impl Default for ForeshadowStatus {
    fn default() -> Self {
        Self::Planted
    }
}

/// Negated status words ("unresolved", "未回收") that must not match their positive stem
fn is_negated(lower: &str) -> bool {
    const NEGATIONS: &[&str] = &["unresolv", "unreveal", "incomplet", "not ", "未", "没"];
    NEGATIONS.iter().any(|n| lower.contains(n))
}

impl ForeshadowStatus {
    /// Lenient parse of a model-provided status string
    pub fn parse_lenient(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if is_negated(&lower) {
            Self::Planted
        } else if lower.contains("reveal")
            || lower.contains("resolv")
            || lower.contains("回收")
            || lower.contains("揭")
        {
            Self::Revealed
        } else if lower.contains("hint") || lower.contains("暗示") {
            Self::Hinted
        } else {
            Self::Planted
        }
    }
}

/// Status of a plotline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlotlineStatus {
    Active,
    Dormant,
    Resolved,
}

impl Default for PlotlineStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl PlotlineStatus {
    pub fn parse_lenient(raw: &str) -> Self {
        let lower = raw.trim().to_lowercase();
        if is_negated(&lower) {
            Self::Active
        } else if lower.contains("resolv") || lower.contains("complet") || lower.contains("完结") || lower.contains("解决") {
            Self::Resolved
        } else if lower.contains("dormant") || lower.contains("paused") || lower.contains("搁置") {
            Self::Dormant
        } else {
            Self::Active
        }
    }
}

/// Typed payload per entity kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityData {
    Event {
        summary: String,
        #[serde(default)]
        description: Option<String>,
        /// Normalized importance in [0, 1]
        #[serde(default)]
        importance: f64,
        #[serde(default)]
        participants: Vec<String>,
        #[serde(default)]
        location: Option<String>,
        /// Name or id of the plotline this event advances
        #[serde(default)]
        plotline: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Foreshadowing {
        content: String,
        #[serde(default)]
        tier: ImportanceTier,
        #[serde(default)]
        status: ForeshadowStatus,
        #[serde(default)]
        resolved_chapter: Option<u32>,
        #[serde(default)]
        expected_payoff_chapter: Option<u32>,
    },
    Plotline {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        priority: f64,
        #[serde(default)]
        status: PlotlineStatus,
    },
    WorldRule {
        name: String,
        description: String,
        #[serde(default)]
        category: Option<String>,
    },
    Character {
        name: String,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
    Location {
        name: String,
        #[serde(default)]
        description: Option<String>,
    },
    NarrativeBeat {
        beat_type: String,
        #[serde(default)]
        summary: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        tension: Option<f64>,
    },
    ConflictArc {
        name: String,
        stage: String,
        #[serde(default)]
        progress: u32,
        #[serde(default)]
        total_beats: u32,
        #[serde(default)]
        urgency: f64,
        #[serde(default)]
        next_action: Option<String>,
        #[serde(default)]
        parties: Vec<String>,
    },
    CharacterArc {
        character_name: String,
        arc_name: String,
        stage: String,
        #[serde(default)]
        progress: u32,
        #[serde(default)]
        total_beats: u32,
        #[serde(default)]
        priority: f64,
        #[serde(default)]
        next_action: Option<String>,
    },
    PerspectiveUsage {
        character_name: String,
        #[serde(default)]
        mode: Option<String>,
    },
    Recommendation {
        message: String,
    },
}

impl EntityData {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Event { .. } => EntityKind::Event,
            Self::Foreshadowing { .. } => EntityKind::Foreshadowing,
            Self::Plotline { .. } => EntityKind::Plotline,
            Self::WorldRule { .. } => EntityKind::WorldRule,
            Self::Character { .. } => EntityKind::Character,
            Self::Location { .. } => EntityKind::Location,
            Self::NarrativeBeat { .. } => EntityKind::NarrativeBeat,
            Self::ConflictArc { .. } => EntityKind::ConflictArc,
            Self::CharacterArc { .. } => EntityKind::CharacterArc,
            Self::PerspectiveUsage { .. } => EntityKind::PerspectiveUsage,
            Self::Recommendation { .. } => EntityKind::Recommendation,
        }
    }

    /// Human-readable label used in digests and logs
    pub fn label(&self) -> &str {
        match self {
            Self::Event { summary, .. } => summary,
            Self::Foreshadowing { content, .. } => content,
            Self::Plotline { name, .. }
            | Self::WorldRule { name, .. }
            | Self::Character { name, .. }
            | Self::Location { name, .. }
            | Self::ConflictArc { name, .. } => name,
            Self::NarrativeBeat { beat_type, .. } => beat_type,
            Self::CharacterArc { arc_name, .. } => arc_name,
            Self::PerspectiveUsage { character_name, .. } => character_name,
            Self::Recommendation { message } => message,
        }
    }
}

/// A typed record stored in the narrative memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEntity {
    /// Unique per novel
    pub id: String,
    pub novel_id: String,
    /// Chapter in which this entity was introduced (or, for per-chapter
    /// signals, the chapter it describes)
    pub chapter_number: u32,
    pub data: EntityData,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: ExtraFields,
    /// Populated by ranked queries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    /// Origin of the record (e.g. "extraction", "manual")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl GraphEntity {
    pub fn new(
        id: impl Into<String>,
        novel_id: impl Into<String>,
        chapter_number: u32,
        data: EntityData,
    ) -> Self {
        Self {
            id: id.into(),
            novel_id: novel_id.into(),
            chapter_number,
            data,
            extra: HashMap::new(),
            relevance_score: None,
            source: None,
        }
    }

    /// Create an entity with a synthesized id
    pub fn with_random_id(novel_id: impl Into<String>, chapter_number: u32, data: EntityData) -> Self {
        let id = data.kind().synthesize_id();
        Self::new(id, novel_id, chapter_number, data)
    }

    pub fn kind(&self) -> EntityKind {
        self.data.kind()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.relevance_score = Some(score);
        self
    }

    /// Normalized importance for events; tier-derived for foreshadowing
    pub fn importance(&self) -> f64 {
        match &self.data {
            EntityData::Event { importance, .. } => *importance,
            EntityData::Foreshadowing { tier, .. } => match tier {
                ImportanceTier::High => 0.85,
                ImportanceTier::Medium => 0.6,
                ImportanceTier::Low => 0.35,
            },
            _ => 0.0,
        }
    }
}
