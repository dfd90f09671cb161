//! NarrativeStore: the facade over a narrative backend
//!
//! Ledger writes go through a monotonic-chapter guard and push the prior
//! value into history before overwriting. Reads never fail: a backend error
//! is logged and the query degrades to an empty result. Writes return the
//! error to the caller and are counted in [`StoreMetrics`].

use crate::graph::{
    relation_type, CharacterPair, CharacterState, CharacterStateDelta, EntityData, EntityKind,
    GraphEntity, GraphRelation, LedgerKind, LedgerRecord, OpenQuest, QuestStatus, RelationshipDelta,
    RelationshipState, UpsertOutcome,
};
use crate::query::{self, NarrativeRhythm, PlotlineReport};
use crate::storage::{BackendKind, BackendStats, EntityFilter, NarrativeBackend, StorageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Write and read outcome counters
#[derive(Debug, Default)]
pub struct StoreMetrics {
    writes: AtomicU64,
    write_failures: AtomicU64,
    read_failures: AtomicU64,
}

impl StoreMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub writes: u64,
    pub write_failures: u64,
    pub read_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of writes that failed; 0 when nothing was written
    pub fn write_error_rate(&self) -> f64 {
        if self.writes == 0 {
            0.0
        } else {
            self.write_failures as f64 / self.writes as f64
        }
    }
}

/// What a chapter delete did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// True when a historical chapter was targeted and nothing changed
    pub skipped: bool,
    /// Highest ledger chapter seen before the delete
    pub max_chapter: Option<u32>,
    /// Ledger records restored to an earlier snapshot
    pub restored: usize,
    /// Ledger records removed because the chapter introduced them
    pub removed: usize,
    pub entities_deleted: usize,
    pub relations_deleted: usize,
    /// Earlier foreshadowing whose payoff lived in the deleted chapter
    pub foreshadows_deleted: usize,
}

/// Versioned narrative memory for any number of novels
pub struct NarrativeStore {
    backend: Arc<dyn NarrativeBackend>,
    metrics: StoreMetrics,
}

impl NarrativeStore {
    pub fn new(backend: Arc<dyn NarrativeBackend>) -> Self {
        Self {
            backend,
            metrics: StoreMetrics::default(),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn track_write<T>(&self, op: &'static str, novel_id: &str, result: StorageResult<T>) -> StorageResult<T> {
        self.metrics.writes.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = &result {
            self.metrics.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(op, novel_id, error = %e, "narrative store write failed");
        }
        result
    }

    fn degrade<T: Default>(&self, op: &'static str, novel_id: &str, result: StorageResult<T>) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                self.metrics.read_failures.fetch_add(1, Ordering::Relaxed);
                warn!(op, novel_id, error = %e, "narrative store read failed, returning empty result");
                T::default()
            }
        }
    }

    fn entities_up_to(&self, novel_id: &str, kind: EntityKind, chapter: u32) -> StorageResult<Vec<GraphEntity>> {
        self.backend
            .find_entities(novel_id, &EntityFilter::of_kind(kind).up_to_chapter(chapter))
    }

    // === Entities and relations ===

    pub fn add_entity(&self, entity: &GraphEntity) -> StorageResult<()> {
        self.track_write("add_entity", &entity.novel_id, self.backend.save_entity(entity))
    }

    /// Save entities in order, stopping at the first failure
    pub fn add_entities(&self, entities: &[GraphEntity]) -> StorageResult<usize> {
        for entity in entities {
            self.add_entity(entity)?;
        }
        Ok(entities.len())
    }

    pub fn get_entity(&self, novel_id: &str, id: &str) -> Option<GraphEntity> {
        self.degrade("get_entity", novel_id, self.backend.load_entity(novel_id, id))
    }

    pub fn add_relationship(
        &self,
        novel_id: &str,
        chapter: u32,
        from_id: &str,
        relation_type: &str,
        to_id: &str,
        properties: HashMap<String, Value>,
    ) -> StorageResult<GraphRelation> {
        let relation =
            GraphRelation::new(novel_id, chapter, from_id, relation_type, to_id).with_properties(properties);
        self.track_write("add_relationship", novel_id, self.backend.save_relation(&relation))?;
        Ok(relation)
    }

    pub fn relations(&self, novel_id: &str) -> Vec<GraphRelation> {
        self.degrade("relations", novel_id, self.backend.relations(novel_id))
    }

    // === Ranked queries ===

    pub fn relevant_events(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<GraphEntity> {
        let result = self.entities_up_to(novel_id, EntityKind::Event, chapter).and_then(|events| {
            let relations = self.backend.relations(novel_id)?;
            Ok(query::rank_relevant_events(&events, &relations, chapter, limit))
        });
        self.degrade("relevant_events", novel_id, result)
    }

    pub fn unresolved_foreshadowing(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<GraphEntity> {
        let result = self
            .entities_up_to(novel_id, EntityKind::Foreshadowing, chapter)
            .map(|items| query::rank_unresolved_foreshadowing(&items, chapter, limit));
        self.degrade("unresolved_foreshadowing", novel_id, result)
    }

    fn plotline_inputs(&self, novel_id: &str, chapter: u32) -> StorageResult<(Vec<GraphEntity>, Vec<GraphEntity>)> {
        let plotlines = self.entities_up_to(novel_id, EntityKind::Plotline, chapter)?;
        let events = self.entities_up_to(novel_id, EntityKind::Event, chapter)?;
        Ok((plotlines, events))
    }

    pub fn stale_plotlines(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<PlotlineReport> {
        let result = self
            .plotline_inputs(novel_id, chapter)
            .map(|(plotlines, events)| query::stale_plotlines(&plotlines, &events, chapter, limit));
        self.degrade("stale_plotlines", novel_id, result)
    }

    /// Every known plotline with its derived status
    pub fn plotline_status(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<PlotlineReport> {
        let result = self.plotline_inputs(novel_id, chapter).map(|(plotlines, events)| {
            let mut reports = query::plotline_reports(&plotlines, &events, chapter);
            reports.truncate(limit);
            reports
        });
        self.degrade("plotline_status", novel_id, result)
    }

    pub fn narrative_rhythm(&self, novel_id: &str, chapter: u32, window: usize) -> NarrativeRhythm {
        let result = self
            .entities_up_to(novel_id, EntityKind::NarrativeBeat, chapter)
            .map(|beats| query::analyze_rhythm(&beats, window));
        self.degrade("narrative_rhythm", novel_id, result)
    }

    pub fn active_conflict_arcs(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<GraphEntity> {
        let result = self
            .entities_up_to(novel_id, EntityKind::ConflictArc, chapter)
            .map(|arcs| query::active_conflict_arcs(&arcs, limit));
        self.degrade("active_conflict_arcs", novel_id, result)
    }

    pub fn active_character_arcs(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<GraphEntity> {
        let result = self
            .entities_up_to(novel_id, EntityKind::CharacterArc, chapter)
            .map(|arcs| query::active_character_arcs(&arcs, limit));
        self.degrade("active_character_arcs", novel_id, result)
    }

    pub fn perspective_history(&self, novel_id: &str, chapter: u32, window: usize) -> Vec<GraphEntity> {
        let result = self
            .entities_up_to(novel_id, EntityKind::PerspectiveUsage, chapter)
            .map(|records| query::perspective_history(&records, novel_id, chapter, window));
        self.degrade("perspective_history", novel_id, result)
    }

    /// World rules known by `chapter`, earliest first
    pub fn world_rules(&self, novel_id: &str, chapter: u32, limit: usize) -> Vec<GraphEntity> {
        let filter = EntityFilter::of_kind(EntityKind::WorldRule)
            .up_to_chapter(chapter)
            .with_limit(limit);
        self.degrade("world_rules", novel_id, self.backend.find_entities(novel_id, &filter))
    }

    /// Entities linked to `origin_id` through causal edges, nearest first.
    ///
    /// `relevance_score` is `1/(d+1)` for hop distance `d`.
    pub fn causal_chain(&self, novel_id: &str, origin_id: &str, depth: usize) -> Vec<GraphEntity> {
        let result = self.backend.relations(novel_id).and_then(|relations| {
            let causal: Vec<GraphRelation> = relations
                .into_iter()
                .filter(|r| r.relation_type == relation_type::CAUSES)
                .collect();
            let mut chain = Vec::new();
            for (id, hops) in query::causal_neighborhood(origin_id, &causal, depth) {
                if let Some(entity) = self.backend.load_entity(novel_id, id)? {
                    chain.push(entity.with_score(1.0 / (hops as f64 + 1.0)));
                }
            }
            Ok(chain)
        });
        self.degrade("causal_chain", novel_id, result)
    }

    // === State ledgers ===

    /// Guarded write: reject when the record was last written by a later
    /// chapter, otherwise snapshot the prior value and replace it
    fn guarded_upsert<R, F>(&self, novel_id: &str, key: &str, chapter: u32, build: F) -> StorageResult<UpsertOutcome>
    where
        R: LedgerRecord,
        F: FnOnce(Option<R>) -> R,
    {
        let existing = match self.backend.load_ledger(R::KIND, novel_id, key)? {
            Some(row) => Some(R::from_row(&row)?),
            None => None,
        };

        if let Some(prior) = &existing {
            let last = prior.last_updated_chapter();
            if chapter < last {
                warn!(
                    ledger = R::KIND.as_str(),
                    novel_id,
                    key,
                    chapter,
                    last_updated_chapter = last,
                    "rejected stale ledger write"
                );
                return Ok(UpsertOutcome::Stale {
                    last_updated_chapter: last,
                });
            }
            self.backend.push_history(&prior.to_row()?)?;
        }

        let outcome = if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Created
        };
        let next = build(existing);
        self.backend.save_ledger(&next.to_row()?)?;
        debug!(ledger = R::KIND.as_str(), novel_id, key, chapter, ?outcome, "ledger write");
        Ok(outcome)
    }

    pub fn upsert_character_state(
        &self,
        novel_id: &str,
        chapter: u32,
        delta: &CharacterStateDelta,
    ) -> StorageResult<UpsertOutcome> {
        let name = delta.character_name.as_str();
        let result = self.guarded_upsert::<CharacterState, _>(novel_id, name, chapter, |existing| {
            existing
                .unwrap_or_else(|| CharacterState::new(novel_id, name, chapter))
                .apply(delta, chapter)
        });
        self.track_write("upsert_character_state", novel_id, result)
    }

    pub fn upsert_relationship_state(
        &self,
        novel_id: &str,
        chapter: u32,
        delta: &RelationshipDelta,
    ) -> StorageResult<UpsertOutcome> {
        let pair = delta.pair();
        let key = pair.key();
        let result = self.guarded_upsert::<RelationshipState, _>(novel_id, &key, chapter, |existing| {
            existing
                .unwrap_or_else(|| {
                    let kind = delta.kind.clone().unwrap_or_else(|| "acquaintance".to_string());
                    RelationshipState::new(novel_id, pair, kind, chapter)
                })
                .apply(delta, chapter)
        });
        self.track_write("upsert_relationship_state", novel_id, result)
    }

    /// Insert or replace a quest; `introduced_chapter` of an existing quest is kept
    pub fn upsert_open_quest(&self, quest: &OpenQuest) -> StorageResult<UpsertOutcome> {
        let chapter = quest.last_updated_chapter;
        let result = self.guarded_upsert::<OpenQuest, _>(&quest.novel_id, &quest.id, chapter, |existing| {
            let mut next = quest.clone();
            if let Some(prior) = existing {
                next.introduced_chapter = prior.introduced_chapter.min(quest.introduced_chapter);
            }
            next
        });
        self.track_write("upsert_open_quest", &quest.novel_id, result)
    }

    /// Mark a quest resolved at `chapter`; `None` when the quest is unknown
    pub fn resolve_open_quest(
        &self,
        novel_id: &str,
        chapter: u32,
        quest_id: &str,
    ) -> StorageResult<Option<UpsertOutcome>> {
        let result = self
            .backend
            .load_ledger(LedgerKind::Quest, novel_id, quest_id)
            .and_then(|known| {
                if known.is_none() {
                    debug!(novel_id, quest_id, "resolve requested for unknown quest");
                    return Ok(None);
                }
                self.guarded_upsert::<OpenQuest, _>(novel_id, quest_id, chapter, |existing| {
                    let mut quest =
                        existing.unwrap_or_else(|| OpenQuest::new(novel_id, quest_id, "", chapter));
                    quest.status = QuestStatus::Resolved;
                    quest.last_updated_chapter = chapter;
                    quest
                })
                .map(Some)
            });
        self.track_write("resolve_open_quest", novel_id, result)
    }

    pub fn delete_character_state(&self, novel_id: &str, character_name: &str) -> StorageResult<bool> {
        let result = self.backend.delete_ledger(LedgerKind::Character, novel_id, character_name);
        self.track_write("delete_character_state", novel_id, result)
    }

    pub fn delete_relationship_state(&self, novel_id: &str, x: &str, y: &str) -> StorageResult<bool> {
        let key = CharacterPair::new(x, y).key();
        let result = self.backend.delete_ledger(LedgerKind::Relationship, novel_id, &key);
        self.track_write("delete_relationship_state", novel_id, result)
    }

    pub fn delete_open_quest(&self, novel_id: &str, quest_id: &str) -> StorageResult<bool> {
        let result = self.backend.delete_ledger(LedgerKind::Quest, novel_id, quest_id);
        self.track_write("delete_open_quest", novel_id, result)
    }

    fn ledger_records<R: LedgerRecord>(&self, novel_id: &str) -> StorageResult<Vec<R>> {
        self.backend
            .ledger_rows(R::KIND, novel_id)?
            .iter()
            .map(|row| R::from_row(row).map_err(Into::into))
            .collect()
    }

    fn ledger_record<R: LedgerRecord>(&self, novel_id: &str, key: &str) -> StorageResult<Option<R>> {
        match self.backend.load_ledger(R::KIND, novel_id, key)? {
            Some(row) => Ok(Some(R::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub fn character_state(&self, novel_id: &str, character_name: &str) -> Option<CharacterState> {
        self.degrade(
            "character_state",
            novel_id,
            self.ledger_record(novel_id, character_name),
        )
    }

    pub fn character_states(&self, novel_id: &str) -> Vec<CharacterState> {
        self.degrade("character_states", novel_id, self.ledger_records(novel_id))
    }

    /// Prior snapshots of one character, oldest first
    pub fn character_history(&self, novel_id: &str, character_name: &str) -> Vec<CharacterState> {
        let result = self
            .backend
            .history(LedgerKind::Character, novel_id, character_name)
            .and_then(|rows| {
                rows.iter()
                    .map(|row| CharacterState::from_row(row).map_err(Into::into))
                    .collect()
            });
        self.degrade("character_history", novel_id, result)
    }

    pub fn relationship_state(&self, novel_id: &str, x: &str, y: &str) -> Option<RelationshipState> {
        let key = CharacterPair::new(x, y).key();
        self.degrade("relationship_state", novel_id, self.ledger_record(novel_id, &key))
    }

    pub fn relationship_states(&self, novel_id: &str) -> Vec<RelationshipState> {
        self.degrade("relationship_states", novel_id, self.ledger_records(novel_id))
    }

    /// Quests still open, earliest introduced first
    pub fn open_quests(&self, novel_id: &str) -> Vec<OpenQuest> {
        let mut quests: Vec<OpenQuest> = self.degrade("open_quests", novel_id, self.ledger_records(novel_id));
        quests.retain(|q| q.status == QuestStatus::Open);
        quests.sort_by(|a, b| {
            a.introduced_chapter
                .cmp(&b.introduced_chapter)
                .then_with(|| a.id.cmp(&b.id))
        });
        quests
    }

    pub fn stats(&self, novel_id: Option<&str>) -> BackendStats {
        self.degrade("stats", novel_id.unwrap_or("*"), self.backend.stats(novel_id))
    }

    // === Chapter rollback ===

    /// Undo what a chapter wrote, for a chapter being deleted or regenerated.
    ///
    /// A chapter older than the newest ledger chapter is left untouched.
    /// Otherwise every ledger record last written by `chapter` is restored to
    /// its newest snapshot from an earlier chapter (or removed when none
    /// exists), and the chapter's entities and relations are deleted.
    /// Foreshadowing resolved in the chapter is deleted along with it.
    pub fn delete_chapter(&self, novel_id: &str, chapter: u32) -> StorageResult<RollbackReport> {
        let result = self.rollback_chapter(novel_id, chapter);
        self.track_write("delete_chapter", novel_id, result)
    }

    fn rollback_chapter(&self, novel_id: &str, chapter: u32) -> StorageResult<RollbackReport> {
        let max_chapter = self.backend.max_ledger_chapter(novel_id)?;
        let mut report = RollbackReport {
            max_chapter,
            ..Default::default()
        };

        if let Some(max) = max_chapter {
            if chapter < max {
                warn!(
                    novel_id,
                    chapter,
                    max_chapter = max,
                    "rewriting a historical chapter; skipping cleanup to keep later chapters consistent"
                );
                report.skipped = true;
                return Ok(report);
            }
        }

        for kind in LedgerKind::ALL {
            for row in self.backend.ledger_rows(kind, novel_id)? {
                if row.chapter != chapter {
                    continue;
                }
                let history = self.backend.history(kind, novel_id, &row.key)?;
                match history.iter().rev().find(|snapshot| snapshot.chapter < chapter) {
                    Some(snapshot) => {
                        self.backend.save_ledger(snapshot)?;
                        // The restored snapshot is current again
                        self.backend
                            .truncate_history(kind, novel_id, &row.key, snapshot.chapter)?;
                        report.restored += 1;
                    }
                    None => {
                        self.backend.delete_ledger(kind, novel_id, &row.key)?;
                        report.removed += 1;
                    }
                }
            }
        }

        let introduced = self
            .backend
            .find_entities(novel_id, &EntityFilter::new().in_chapter(chapter))?;
        for entity in &introduced {
            if self.backend.delete_entity(novel_id, &entity.id)? {
                report.entities_deleted += 1;
            }
        }

        let foreshadows = self
            .backend
            .find_entities(novel_id, &EntityFilter::of_kind(EntityKind::Foreshadowing))?;
        for entity in &foreshadows {
            let resolved_here = matches!(
                entity.data,
                EntityData::Foreshadowing { resolved_chapter: Some(c), .. } if c == chapter
            );
            if resolved_here && self.backend.delete_entity(novel_id, &entity.id)? {
                report.foreshadows_deleted += 1;
            }
        }
        report.relations_deleted = self.backend.delete_relations_in_chapter(novel_id, chapter)?;

        info!(
            novel_id,
            chapter,
            restored = report.restored,
            removed = report.removed,
            entities_deleted = report.entities_deleted,
            relations_deleted = report.relations_deleted,
            foreshadows_deleted = report.foreshadows_deleted,
            "chapter rolled back"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for NarrativeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrativeStore")
            .field("backend", &self.backend.kind())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ForeshadowStatus, ImportanceTier, LedgerRow};
    use crate::storage::{MemoryBackend, OpenBackend, SqliteBackend, StorageError};

    const NOVEL: &str = "novel-1";

    fn memory_store() -> NarrativeStore {
        NarrativeStore::new(Arc::new(MemoryBackend::new()))
    }

    fn sqlite_store() -> NarrativeStore {
        NarrativeStore::new(Arc::new(SqliteBackend::open_in_memory().unwrap()))
    }

    fn both() -> Vec<NarrativeStore> {
        vec![memory_store(), sqlite_store()]
    }

    fn move_lin(store: &NarrativeStore, chapter: u32, location: &str) -> UpsertOutcome {
        store
            .upsert_character_state(
                NOVEL,
                chapter,
                &CharacterStateDelta::for_character("Lin Chen").with_location(location),
            )
            .unwrap()
    }

    #[test]
    fn test_lin_chen_rollback_sequence() {
        for store in both() {
            assert_eq!(move_lin(&store, 5, "Sect Gate"), UpsertOutcome::Created);
            assert_eq!(move_lin(&store, 9, "Capital"), UpsertOutcome::Updated);

            let report = store.delete_chapter(NOVEL, 9).unwrap();
            assert!(!report.skipped);
            assert_eq!(report.restored, 1);
            let lin = store.character_state(NOVEL, "Lin Chen").unwrap();
            assert_eq!(lin.location.as_deref(), Some("Sect Gate"));
            assert_eq!(lin.last_updated_chapter, 5);

            let report = store.delete_chapter(NOVEL, 5).unwrap();
            assert_eq!(report.removed, 1);
            assert!(store.character_state(NOVEL, "Lin Chen").is_none());
        }
    }

    #[test]
    fn test_historical_delete_changes_nothing() {
        for store in both() {
            move_lin(&store, 5, "Sect Gate");
            move_lin(&store, 9, "Capital");
            store
                .add_entity(&GraphEntity::new(
                    "evt-5",
                    NOVEL,
                    5,
                    EntityData::Event {
                        summary: "Arrives at the gate".to_string(),
                        description: None,
                        importance: 0.5,
                        participants: vec![],
                        location: None,
                        plotline: None,
                        tags: vec![],
                    },
                ))
                .unwrap();
            let before = store.stats(Some(NOVEL));

            let report = store.delete_chapter(NOVEL, 5).unwrap();
            assert!(report.skipped);
            assert_eq!(report.max_chapter, Some(9));
            assert_eq!(store.stats(Some(NOVEL)), before);
            let lin = store.character_state(NOVEL, "Lin Chen").unwrap();
            assert_eq!(lin.location.as_deref(), Some("Capital"));
        }
    }

    #[test]
    fn test_stale_write_is_rejected() {
        for store in both() {
            move_lin(&store, 9, "Capital");
            let outcome = move_lin(&store, 4, "Village");
            assert_eq!(outcome, UpsertOutcome::Stale { last_updated_chapter: 9 });
            let lin = store.character_state(NOVEL, "Lin Chen").unwrap();
            assert_eq!(lin.location.as_deref(), Some("Capital"));
            assert!(store.character_history(NOVEL, "Lin Chen").is_empty());
        }
    }

    #[test]
    fn test_same_chapter_rewrite_rolls_back_to_earlier_chapter() {
        let store = memory_store();
        move_lin(&store, 3, "Village");
        move_lin(&store, 7, "Forest");
        move_lin(&store, 7, "Cave");
        store.delete_chapter(NOVEL, 7).unwrap();
        let lin = store.character_state(NOVEL, "Lin Chen").unwrap();
        assert_eq!(lin.location.as_deref(), Some("Village"));
        assert_eq!(lin.last_updated_chapter, 3);

        store.delete_chapter(NOVEL, 3).unwrap();
        assert!(store.character_state(NOVEL, "Lin Chen").is_none());
    }

    #[test]
    fn test_relationship_keyed_by_unordered_pair() {
        for store in both() {
            store
                .upsert_relationship_state(
                    NOVEL,
                    2,
                    &RelationshipDelta::between("Su Yan", "Lin Chen").with_kind("rival"),
                )
                .unwrap();
            store
                .upsert_relationship_state(
                    NOVEL,
                    4,
                    &RelationshipDelta::between("Lin Chen", "Su Yan").with_strength(0.6),
                )
                .unwrap();
            let rel = store.relationship_state(NOVEL, "Su Yan", "Lin Chen").unwrap();
            assert_eq!(rel.a, "Lin Chen");
            assert_eq!(rel.kind, "rival");
            assert_eq!(rel.strength, 0.6);
            assert_eq!(store.relationship_states(NOVEL).len(), 1);
        }
    }

    #[test]
    fn test_quest_lifecycle_and_rollback() {
        for store in both() {
            let quest = OpenQuest::new(NOVEL, "q-seal", "Recover the seal", 2).with_due_by(8);
            assert_eq!(store.upsert_open_quest(&quest).unwrap(), UpsertOutcome::Created);
            assert_eq!(store.open_quests(NOVEL).len(), 1);

            let outcome = store.resolve_open_quest(NOVEL, 6, "q-seal").unwrap();
            assert_eq!(outcome, Some(UpsertOutcome::Updated));
            assert!(store.open_quests(NOVEL).is_empty());
            assert_eq!(store.resolve_open_quest(NOVEL, 6, "q-missing").unwrap(), None);

            store.delete_chapter(NOVEL, 6).unwrap();
            let reopened = store.open_quests(NOVEL);
            assert_eq!(reopened.len(), 1);
            assert_eq!(reopened[0].last_updated_chapter, 2);
        }
    }

    #[test]
    fn test_delete_chapter_removes_entities_and_resolved_foreshadowing() {
        for store in both() {
            let planted = GraphEntity::new(
                "fs-1",
                NOVEL,
                2,
                EntityData::Foreshadowing {
                    content: "A cracked jade pendant".to_string(),
                    tier: ImportanceTier::High,
                    status: ForeshadowStatus::Revealed,
                    resolved_chapter: Some(6),
                    expected_payoff_chapter: None,
                },
            );
            let survivor = GraphEntity::new(
                "fs-2",
                NOVEL,
                3,
                EntityData::Foreshadowing {
                    content: "A stranger's glance".to_string(),
                    tier: ImportanceTier::Low,
                    status: ForeshadowStatus::Planted,
                    resolved_chapter: None,
                    expected_payoff_chapter: None,
                },
            );
            let beat = GraphEntity::new(
                "beat-6",
                NOVEL,
                6,
                EntityData::NarrativeBeat {
                    beat_type: "conflict".to_string(),
                    summary: None,
                    tags: vec![],
                    tension: Some(0.8),
                },
            );
            store.add_entities(&[planted, survivor, beat]).unwrap();
            store
                .add_relationship(NOVEL, 6, "fs-2", relation_type::RELATES_TO, "beat-6", HashMap::new())
                .unwrap();

            let report = store.delete_chapter(NOVEL, 6).unwrap();
            assert_eq!(report.entities_deleted, 1);
            assert_eq!(report.foreshadows_deleted, 1);
            assert!(store.get_entity(NOVEL, "fs-1").is_none());
            assert!(store.get_entity(NOVEL, "fs-2").is_some());
            assert!(store.get_entity(NOVEL, "beat-6").is_none());
            assert!(store.relations(NOVEL).is_empty());
            assert_eq!(store.unresolved_foreshadowing(NOVEL, 7, 10).len(), 1);
        }
    }

    #[test]
    fn test_causal_chain_follows_causes_edges() {
        let store = memory_store();
        for (id, chapter) in [("e1", 1), ("e2", 2), ("e3", 3)] {
            store
                .add_entity(&GraphEntity::new(
                    id,
                    NOVEL,
                    chapter,
                    EntityData::Event {
                        summary: id.to_string(),
                        description: None,
                        importance: 0.5,
                        participants: vec![],
                        location: None,
                        plotline: None,
                        tags: vec![],
                    },
                ))
                .unwrap();
        }
        store
            .add_relationship(NOVEL, 2, "e1", relation_type::CAUSES, "e2", HashMap::new())
            .unwrap();
        store
            .add_relationship(NOVEL, 3, "e2", relation_type::CAUSES, "e3", HashMap::new())
            .unwrap();
        store
            .add_relationship(NOVEL, 3, "e1", relation_type::RELATES_TO, "e3", HashMap::new())
            .unwrap();

        let chain = store.causal_chain(NOVEL, "e1", 3);
        let ids: Vec<&str> = chain.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
        assert_eq!(chain[1].relevance_score, Some(1.0 / 3.0));
    }

    struct BrokenBackend;

    impl NarrativeBackend for BrokenBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::Memory
        }
        fn ping(&self) -> StorageResult<()> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn save_entity(&self, _: &GraphEntity) -> StorageResult<()> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn load_entity(&self, _: &str, _: &str) -> StorageResult<Option<GraphEntity>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn delete_entity(&self, _: &str, _: &str) -> StorageResult<bool> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn find_entities(&self, _: &str, _: &EntityFilter) -> StorageResult<Vec<GraphEntity>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn save_relation(&self, _: &GraphRelation) -> StorageResult<()> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn relations(&self, _: &str) -> StorageResult<Vec<GraphRelation>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn delete_relations_in_chapter(&self, _: &str, _: u32) -> StorageResult<usize> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn load_ledger(&self, _: LedgerKind, _: &str, _: &str) -> StorageResult<Option<LedgerRow>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn save_ledger(&self, _: &LedgerRow) -> StorageResult<()> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn delete_ledger(&self, _: LedgerKind, _: &str, _: &str) -> StorageResult<bool> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn ledger_rows(&self, _: LedgerKind, _: &str) -> StorageResult<Vec<LedgerRow>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn push_history(&self, _: &LedgerRow) -> StorageResult<()> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn history(&self, _: LedgerKind, _: &str, _: &str) -> StorageResult<Vec<LedgerRow>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn truncate_history(&self, _: LedgerKind, _: &str, _: &str, _: u32) -> StorageResult<usize> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn max_ledger_chapter(&self, _: &str) -> StorageResult<Option<u32>> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
        fn stats(&self, _: Option<&str>) -> StorageResult<BackendStats> {
            Err(StorageError::LockPoisoned("broken".to_string()))
        }
    }

    #[test]
    fn test_failures_degrade_reads_and_count_writes() {
        let store = NarrativeStore::new(Arc::new(BrokenBackend));
        assert!(store.relevant_events(NOVEL, 5, 10).is_empty());
        assert_eq!(store.narrative_rhythm(NOVEL, 5, 10), NarrativeRhythm::default());
        assert!(store.character_state(NOVEL, "Lin Chen").is_none());

        assert!(store.delete_chapter(NOVEL, 5).is_err());
        assert!(store
            .upsert_character_state(NOVEL, 1, &CharacterStateDelta::for_character("Lin Chen"))
            .is_err());

        let metrics = store.metrics();
        assert_eq!(metrics.read_failures, 3);
        assert_eq!(metrics.writes, 2);
        assert_eq!(metrics.write_failures, 2);
        assert_eq!(metrics.write_error_rate(), 1.0);
    }
}
