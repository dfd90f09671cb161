//! Planning tools and the registry the planner dispatches through
//!
//! A tool takes a JSON argument object and returns a JSON result. The
//! built-in tools read the narrative store and the content source; hosts
//! may register their own alongside them.

use super::content::ContentSource;
use crate::config::PlanningSettings;
use crate::store::NarrativeStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Names of the built-in tools
pub mod tool_name {
    pub const GET_OUTLINE: &str = "getOutline";
    pub const GET_VOLUME_BLUEPRINT: &str = "getVolumeBlueprint";
    pub const GET_RECENT_CHAPTERS: &str = "getRecentChapters";
    pub const GET_RELEVANT_EVENTS: &str = "getRelevantEvents";
    pub const GET_WORLD_RULES: &str = "getWorldRules";
    pub const GET_UNRESOLVED_FORESHADOWING: &str = "getUnresolvedForeshadowing";
    pub const GET_NARRATIVE_RHYTHM: &str = "getNarrativeRhythm";
    pub const GET_PLOTLINE_STATUS: &str = "getPlotlineStatus";
    pub const GET_CONFLICT_ARC_STATUS: &str = "getConflictArcStatus";
    pub const GET_CHARACTER_ARC_STATUS: &str = "getCharacterArcStatus";
    pub const GET_PERSPECTIVE_HISTORY: &str = "getPerspectiveHistory";
    pub const GET_CAUSAL_CHAIN: &str = "getCausalChain";
    pub const GET_CHARACTER_STATES: &str = "getCharacterStates";
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    #[error("tool failed: {0}")]
    Failed(String),
    #[error("content unavailable: {0}")]
    Unavailable(String),
}

/// The contract planning tools implement.
#[async_trait]
pub trait PlanningTool: Send + Sync {
    /// Name the model uses to call this tool
    fn name(&self) -> &str;

    /// One-line description shown in the step prompt
    fn description(&self) -> &str;

    async fn execute(&self, args: &Value) -> Result<Value, ToolError>;
}

/// Tools by name. Iteration is in name order so prompts are stable.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn PlanningTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool
    pub fn with_builtin(
        store: Arc<NarrativeStore>,
        content: Arc<dyn ContentSource>,
        settings: PlanningSettings,
    ) -> Self {
        let mut registry = Self::new();
        let shared = Arc::new(ToolDeps {
            store,
            content,
            settings,
        });
        for kind in BuiltinKind::ALL {
            registry.register(Arc::new(BuiltinTool {
                kind,
                deps: shared.clone(),
            }));
        }
        registry
    }

    /// Add a tool; a tool with the same name is replaced
    pub fn register(&mut self, tool: Arc<dyn PlanningTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PlanningTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// `- name: description` lines for the step prompt
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

pub fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArgs(format!("'{}' is required", key)))
}

/// Non-negative integer given as a number or numeric string
pub fn optional_u64(args: &Value, key: &str) -> Result<Option<u64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .map(Some)
            .ok_or_else(|| ToolError::InvalidArgs(format!("'{}' must be non-negative", key))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ToolError::InvalidArgs(format!("'{}' is not a number", key))),
        Some(_) => Err(ToolError::InvalidArgs(format!("'{}' is not a number", key))),
    }
}

pub fn require_chapter(args: &Value) -> Result<u32, ToolError> {
    optional_u64(args, "chapterNumber")?
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| ToolError::InvalidArgs("'chapterNumber' is required".to_string()))
}

fn limit_or(args: &Value, key: &str, default: usize) -> Result<usize, ToolError> {
    Ok(optional_u64(args, key)?.map_or(default, |n| n as usize))
}

// ---------------------------------------------------------------------------
// Built-in tools
// ---------------------------------------------------------------------------

struct ToolDeps {
    store: Arc<NarrativeStore>,
    content: Arc<dyn ContentSource>,
    settings: PlanningSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuiltinKind {
    Outline,
    VolumeBlueprint,
    RecentChapters,
    RelevantEvents,
    WorldRules,
    UnresolvedForeshadowing,
    NarrativeRhythm,
    PlotlineStatus,
    ConflictArcStatus,
    CharacterArcStatus,
    PerspectiveHistory,
    CausalChain,
    CharacterStates,
}

impl BuiltinKind {
    const ALL: [BuiltinKind; 13] = [
        Self::Outline,
        Self::VolumeBlueprint,
        Self::RecentChapters,
        Self::RelevantEvents,
        Self::WorldRules,
        Self::UnresolvedForeshadowing,
        Self::NarrativeRhythm,
        Self::PlotlineStatus,
        Self::ConflictArcStatus,
        Self::CharacterArcStatus,
        Self::PerspectiveHistory,
        Self::CausalChain,
        Self::CharacterStates,
    ];

    fn name(&self) -> &'static str {
        match self {
            Self::Outline => tool_name::GET_OUTLINE,
            Self::VolumeBlueprint => tool_name::GET_VOLUME_BLUEPRINT,
            Self::RecentChapters => tool_name::GET_RECENT_CHAPTERS,
            Self::RelevantEvents => tool_name::GET_RELEVANT_EVENTS,
            Self::WorldRules => tool_name::GET_WORLD_RULES,
            Self::UnresolvedForeshadowing => tool_name::GET_UNRESOLVED_FORESHADOWING,
            Self::NarrativeRhythm => tool_name::GET_NARRATIVE_RHYTHM,
            Self::PlotlineStatus => tool_name::GET_PLOTLINE_STATUS,
            Self::ConflictArcStatus => tool_name::GET_CONFLICT_ARC_STATUS,
            Self::CharacterArcStatus => tool_name::GET_CHARACTER_ARC_STATUS,
            Self::PerspectiveHistory => tool_name::GET_PERSPECTIVE_HISTORY,
            Self::CausalChain => tool_name::GET_CAUSAL_CHAIN,
            Self::CharacterStates => tool_name::GET_CHARACTER_STATES,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Outline => "Novel outline text",
            Self::VolumeBlueprint => "Structured plan for the current volume",
            Self::RecentChapters => "Recent chapters: full text for the nearest, summaries for the rest",
            Self::RelevantEvents => "Earlier events ranked by recency, importance and causal proximity (args: limit)",
            Self::WorldRules => "Established world rules (args: limit)",
            Self::UnresolvedForeshadowing => "Planted foreshadowing not yet revealed, most important first (args: limit)",
            Self::NarrativeRhythm => "Recent beat mix, conflict fatigue and pacing advice (args: window)",
            Self::PlotlineStatus => "Plotlines with idle time and supporting events (args: limit)",
            Self::ConflictArcStatus => "Active conflict arcs by urgency (args: limit)",
            Self::CharacterArcStatus => "Active character arcs by priority (args: limit)",
            Self::PerspectiveHistory => "Recent viewpoint characters and switch hints (args: window)",
            Self::CausalChain => "Events causally linked to an event (args: eventId, depth)",
            Self::CharacterStates => "Current character states, relationships and open quests",
        }
    }
}

struct BuiltinTool {
    kind: BuiltinKind,
    deps: Arc<ToolDeps>,
}

#[async_trait]
impl PlanningTool for BuiltinTool {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    async fn execute(&self, args: &Value) -> Result<Value, ToolError> {
        let novel_id = require_str(args, "novelId")?;
        let chapter = require_chapter(args)?;
        let ToolDeps {
            store,
            content,
            settings,
        } = self.deps.as_ref();

        let result = match self.kind {
            BuiltinKind::Outline => json!({ "outline": content.outline(novel_id).await? }),
            BuiltinKind::VolumeBlueprint => {
                json!({ "blueprint": content.volume_blueprint(novel_id, chapter).await? })
            }
            BuiltinKind::RecentChapters => {
                let window = limit_or(args, "window", settings.recent_summary_window)?;
                let mut chapters = content.recent_chapters(novel_id, chapter, window).await?;
                // Only the nearest chapters keep their full text
                let keep_from = chapters.len().saturating_sub(settings.recent_full_text);
                for older in chapters.iter_mut().take(keep_from) {
                    if older.summary.is_some() {
                        older.content = None;
                    }
                }
                json!({ "chapters": chapters })
            }
            BuiltinKind::RelevantEvents => {
                let limit = limit_or(args, "limit", settings.event_limit)?;
                json!({ "events": store.relevant_events(novel_id, chapter, limit) })
            }
            BuiltinKind::WorldRules => {
                let limit = limit_or(args, "limit", settings.event_limit)?;
                json!({ "rules": store.world_rules(novel_id, chapter, limit) })
            }
            BuiltinKind::UnresolvedForeshadowing => {
                let limit = limit_or(args, "limit", settings.foreshadow_limit)?;
                json!({ "foreshadowing": store.unresolved_foreshadowing(novel_id, chapter, limit) })
            }
            BuiltinKind::NarrativeRhythm => {
                let window = limit_or(args, "window", settings.rhythm_window)?;
                serde_json::to_value(store.narrative_rhythm(novel_id, chapter, window))
                    .map_err(|e| ToolError::Failed(e.to_string()))?
            }
            BuiltinKind::PlotlineStatus => {
                let limit = limit_or(args, "limit", settings.plotline_limit)?;
                json!({ "plotlines": store.plotline_status(novel_id, chapter, limit) })
            }
            BuiltinKind::ConflictArcStatus => {
                let limit = limit_or(args, "limit", settings.arc_limit)?;
                json!({ "arcs": store.active_conflict_arcs(novel_id, chapter, limit) })
            }
            BuiltinKind::CharacterArcStatus => {
                let limit = limit_or(args, "limit", settings.arc_limit)?;
                json!({ "arcs": store.active_character_arcs(novel_id, chapter, limit) })
            }
            BuiltinKind::PerspectiveHistory => {
                let window = limit_or(args, "window", settings.perspective_window)?;
                json!({ "history": store.perspective_history(novel_id, chapter, window) })
            }
            BuiltinKind::CausalChain => {
                let origin = require_str(args, "eventId").or_else(|_| require_str(args, "originId"))?;
                let depth = limit_or(args, "depth", 3)?;
                json!({ "origin": origin, "chain": store.causal_chain(novel_id, origin, depth) })
            }
            BuiltinKind::CharacterStates => json!({
                "characters": store.character_states(novel_id),
                "relationships": store.relationship_states(novel_id),
                "openQuests": store.open_quests(novel_id),
            }),
        };
        Ok(result)
    }
}
