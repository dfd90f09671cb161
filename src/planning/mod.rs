//! Chapter planning: prefetch, bounded ReAct loop, chapter intent
//!
//! The loop is strictly sequential within one invocation; each prompt
//! depends on every earlier observation.

mod content;
mod decision;
mod digest;
mod intent;
mod orchestrator;
mod recommend;
mod tools;

pub use content::{ChapterText, CharacterProfile, ContentSource, InMemoryContentSource};
pub use decision::{parse_decision, Decision, WRITE_ACTION};
pub use digest::{build_digest, estimate_tokens, truncate_to_tokens, GatheredContext};
pub use intent::{derive_intent, ChapterIntent, IntentSignals, PrimaryFocus, MAX_FOCUS_NOTES};
pub use orchestrator::{
    CallOrigin, ChapterPlanner, LoopState, PlanningOutcome, PlanningRequest, PlanningStep, ToolCall,
};
pub use recommend::{RecommendationRule, RecommendationRules};
pub use tools::{
    optional_u64, require_chapter, require_str, tool_name, PlanningTool, ToolError, ToolRegistry,
};
