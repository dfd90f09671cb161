//! Novelgraph: narrative memory graph and chapter planning engine
//!
//! Keeps long-form AI fiction consistent across hundreds of chapters.
//!
//! # Core Concepts
//!
//! - **NarrativeStore**: versioned story facts (events, foreshadowing,
//!   plotlines, arcs) plus character/relationship/quest ledgers with
//!   chapter-indexed history and rewrite-safe rollback
//! - **EntityExtractor**: the only writer into the ledgers; turns chapter
//!   text into facts through one model call
//! - **ExtractionRetryCoordinator**: bounded automatic retry of failed extractions
//! - **ChapterPlanner**: a bounded ReAct loop that gathers context through
//!   tools and derives a chapter intent
//!
//! # Example
//!
//! ```
//! use novelgraph::{MemoryBackend, NarrativeStore};
//! use std::sync::Arc;
//!
//! let store = NarrativeStore::new(Arc::new(MemoryBackend::new()));
//! assert!(store.character_states("novel-1").is_empty());
//! ```

pub mod config;
pub mod extraction;
pub mod graph;
pub mod llm;
pub mod planning;
pub mod query;
pub mod retry;
pub mod storage;
pub mod store;

pub use config::{EngineConfig, ExtractionSettings, PlanningSettings, RetrySettings, StorageConfig};
pub use extraction::{
    ChapterExtractor, EntityExtractor, ExtractionError, ExtractionRequest, ExtractionSummary,
};
pub use graph::{
    CharacterState, CharacterStateDelta, EntityData, EntityKind, GraphEntity, GraphRelation,
    OpenQuest, RelationshipDelta, RelationshipState, UpsertOutcome,
};
pub use llm::{ChatMessage, MockModelClient, ModelClient, ModelConfig, ModelError};
pub use planning::{
    ChapterIntent, ChapterPlanner, ContentSource, LoopState, PlanningOutcome, PlanningRequest,
    PlanningTool, PrimaryFocus, ToolRegistry,
};
pub use retry::{ExtractionRetryCoordinator, FailedExtraction};
pub use storage::{
    connect_backend, BackendKind, MemoryBackend, NarrativeBackend, OpenBackend, SqliteBackend,
    StorageError, StorageResult,
};
pub use store::{MetricsSnapshot, NarrativeStore, RollbackReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
