//! Storage trait definitions

use crate::graph::{EntityKind, GraphEntity, GraphRelation, LedgerKind, LedgerRow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Which concrete backend is serving the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Persistent SQLite graph backend
    Sqlite,
    /// In-process fallback; lost on restart
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Filter criteria for querying entities
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub kind: Option<EntityKind>,
    /// Only entities introduced in exactly this chapter
    pub chapter: Option<u32>,
    /// Only entities introduced at or before this chapter
    pub max_chapter: Option<u32>,
    pub limit: Option<usize>,
}

impl EntityFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_kind(kind: EntityKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn in_chapter(mut self, chapter: u32) -> Self {
        self.chapter = Some(chapter);
        self
    }

    pub fn up_to_chapter(mut self, chapter: u32) -> Self {
        self.max_chapter = Some(chapter);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the filter against an entity (used by the memory backend)
    pub fn matches(&self, entity: &GraphEntity) -> bool {
        if let Some(kind) = self.kind {
            if entity.kind() != kind {
                return false;
            }
        }
        if let Some(chapter) = self.chapter {
            if entity.chapter_number != chapter {
                return false;
            }
        }
        if let Some(max) = self.max_chapter {
            if entity.chapter_number > max {
                return false;
            }
        }
        true
    }
}

/// Counts reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    pub entities: usize,
    pub relations: usize,
    pub ledger_records: usize,
    pub history_snapshots: usize,
    pub entities_by_kind: BTreeMap<String, usize>,
}

/// Trait for narrative memory storage backends
///
/// Implementations must be thread-safe (Send + Sync): several chapter
/// pipelines read and write concurrently. Each method is an independent
/// per-record operation; there is no cross-record transaction.
pub trait NarrativeBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Cheap connectivity check used once at startup
    fn ping(&self) -> StorageResult<()>;

    // === Entity Operations ===

    /// Save an entity (insert or replace by `(novel_id, id)`)
    fn save_entity(&self, entity: &GraphEntity) -> StorageResult<()>;

    fn load_entity(&self, novel_id: &str, id: &str) -> StorageResult<Option<GraphEntity>>;

    /// Delete an entity and every relation touching it
    fn delete_entity(&self, novel_id: &str, id: &str) -> StorageResult<bool>;

    /// Entities matching the filter, ordered by chapter then id
    fn find_entities(&self, novel_id: &str, filter: &EntityFilter) -> StorageResult<Vec<GraphEntity>>;

    // === Relation Operations ===

    fn save_relation(&self, relation: &GraphRelation) -> StorageResult<()>;

    fn relations(&self, novel_id: &str) -> StorageResult<Vec<GraphRelation>>;

    /// Delete relations produced by one chapter
    fn delete_relations_in_chapter(&self, novel_id: &str, chapter: u32) -> StorageResult<usize>;

    // === Ledger Operations ===

    fn load_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Option<LedgerRow>>;

    fn save_ledger(&self, row: &LedgerRow) -> StorageResult<()>;

    /// Delete a ledger record together with its history
    fn delete_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<bool>;

    fn ledger_rows(&self, kind: LedgerKind, novel_id: &str) -> StorageResult<Vec<LedgerRow>>;

    /// Append a history snapshot
    fn push_history(&self, snapshot: &LedgerRow) -> StorageResult<()>;

    /// Snapshots for one record, oldest first
    fn history(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Vec<LedgerRow>>;

    /// Drop snapshots with `chapter >= from_chapter`
    fn truncate_history(
        &self,
        kind: LedgerKind,
        novel_id: &str,
        key: &str,
        from_chapter: u32,
    ) -> StorageResult<usize>;

    /// Highest `last_updated_chapter` across all ledgers of a novel
    fn max_ledger_chapter(&self, novel_id: &str) -> StorageResult<Option<u32>>;

    fn stats(&self, novel_id: Option<&str>) -> StorageResult<BackendStats>;
}

/// Extension trait for opening stores from paths
pub trait OpenBackend: NarrativeBackend + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory() -> StorageResult<Self>;
}
