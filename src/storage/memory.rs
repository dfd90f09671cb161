//! In-memory fallback backend
//!
//! Serves the same contract as the SQLite backend when no database is
//! reachable. Contents are lost on restart.

use super::traits::{BackendKind, BackendStats, EntityFilter, NarrativeBackend, StorageResult};
use crate::graph::{GraphEntity, GraphRelation, LedgerKind, LedgerRow};
use dashmap::DashMap;

type EntityKey = (String, String);
type LedgerKey = (LedgerKind, String, String);

/// DashMap-backed narrative store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entities: DashMap<EntityKey, GraphEntity>,
    relations: DashMap<EntityKey, GraphRelation>,
    ledger: DashMap<LedgerKey, LedgerRow>,
    history: DashMap<LedgerKey, Vec<LedgerRow>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger_key(kind: LedgerKind, novel_id: &str, key: &str) -> LedgerKey {
        (kind, novel_id.to_string(), key.to_string())
    }
}

impl NarrativeBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn ping(&self) -> StorageResult<()> {
        Ok(())
    }

    // === Entity Operations ===

    fn save_entity(&self, entity: &GraphEntity) -> StorageResult<()> {
        let mut stored = entity.clone();
        stored.relevance_score = None;
        self.entities
            .insert((entity.novel_id.clone(), entity.id.clone()), stored);
        Ok(())
    }

    fn load_entity(&self, novel_id: &str, id: &str) -> StorageResult<Option<GraphEntity>> {
        Ok(self
            .entities
            .get(&(novel_id.to_string(), id.to_string()))
            .map(|r| r.clone()))
    }

    fn delete_entity(&self, novel_id: &str, id: &str) -> StorageResult<bool> {
        self.relations
            .retain(|_, rel| !(rel.novel_id == novel_id && rel.touches(id)));
        Ok(self
            .entities
            .remove(&(novel_id.to_string(), id.to_string()))
            .is_some())
    }

    fn find_entities(&self, novel_id: &str, filter: &EntityFilter) -> StorageResult<Vec<GraphEntity>> {
        let mut found: Vec<GraphEntity> = self
            .entities
            .iter()
            .filter(|r| r.key().0 == novel_id && filter.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();

        found.sort_by(|a, b| {
            a.chapter_number
                .cmp(&b.chapter_number)
                .then_with(|| a.id.cmp(&b.id))
        });

        if let Some(limit) = filter.limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    // === Relation Operations ===

    fn save_relation(&self, relation: &GraphRelation) -> StorageResult<()> {
        self.relations.insert(
            (relation.novel_id.clone(), relation.id.clone()),
            relation.clone(),
        );
        Ok(())
    }

    fn relations(&self, novel_id: &str) -> StorageResult<Vec<GraphRelation>> {
        let mut found: Vec<GraphRelation> = self
            .relations
            .iter()
            .filter(|r| r.key().0 == novel_id)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| {
            a.chapter_number
                .cmp(&b.chapter_number)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found)
    }

    fn delete_relations_in_chapter(&self, novel_id: &str, chapter: u32) -> StorageResult<usize> {
        let before = self.relations.len();
        self.relations
            .retain(|_, rel| !(rel.novel_id == novel_id && rel.chapter_number == chapter));
        Ok(before - self.relations.len())
    }

    // === Ledger Operations ===

    fn load_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Option<LedgerRow>> {
        Ok(self
            .ledger
            .get(&Self::ledger_key(kind, novel_id, key))
            .map(|r| r.clone()))
    }

    fn save_ledger(&self, row: &LedgerRow) -> StorageResult<()> {
        self.ledger.insert(
            Self::ledger_key(row.kind, &row.novel_id, &row.key),
            row.clone(),
        );
        Ok(())
    }

    fn delete_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<bool> {
        let ledger_key = Self::ledger_key(kind, novel_id, key);
        self.history.remove(&ledger_key);
        Ok(self.ledger.remove(&ledger_key).is_some())
    }

    fn ledger_rows(&self, kind: LedgerKind, novel_id: &str) -> StorageResult<Vec<LedgerRow>> {
        let mut rows: Vec<LedgerRow> = self
            .ledger
            .iter()
            .filter(|r| r.key().0 == kind && r.key().1 == novel_id)
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(rows)
    }

    fn push_history(&self, snapshot: &LedgerRow) -> StorageResult<()> {
        self.history
            .entry(Self::ledger_key(snapshot.kind, &snapshot.novel_id, &snapshot.key))
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    fn history(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Vec<LedgerRow>> {
        let mut rows = self
            .history
            .get(&Self::ledger_key(kind, novel_id, key))
            .map(|r| r.clone())
            .unwrap_or_default();
        // Stable: insertion order is kept within a chapter
        rows.sort_by_key(|r| r.chapter);
        Ok(rows)
    }

    fn truncate_history(
        &self,
        kind: LedgerKind,
        novel_id: &str,
        key: &str,
        from_chapter: u32,
    ) -> StorageResult<usize> {
        let Some(mut entry) = self.history.get_mut(&Self::ledger_key(kind, novel_id, key)) else {
            return Ok(0);
        };
        let before = entry.len();
        entry.retain(|r| r.chapter < from_chapter);
        Ok(before - entry.len())
    }

    fn max_ledger_chapter(&self, novel_id: &str) -> StorageResult<Option<u32>> {
        Ok(self
            .ledger
            .iter()
            .filter(|r| r.key().1 == novel_id)
            .map(|r| r.value().chapter)
            .max())
    }

    fn stats(&self, novel_id: Option<&str>) -> StorageResult<BackendStats> {
        let in_scope = |n: &str| novel_id.map_or(true, |wanted| wanted == n);

        let mut stats = BackendStats::default();
        for entity in self.entities.iter() {
            if in_scope(&entity.key().0) {
                stats.entities += 1;
                *stats
                    .entities_by_kind
                    .entry(entity.kind().as_str().to_string())
                    .or_default() += 1;
            }
        }
        stats.relations = self.relations.iter().filter(|r| in_scope(&r.key().0)).count();
        stats.ledger_records = self.ledger.iter().filter(|r| in_scope(&r.key().1)).count();
        stats.history_snapshots = self
            .history
            .iter()
            .filter(|r| in_scope(&r.key().1))
            .map(|r| r.value().len())
            .sum();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CharacterState, EntityData, EntityKind, LedgerRecord};

    fn beat(id: &str, chapter: u32) -> GraphEntity {
        GraphEntity::new(
            id,
            "novel-1",
            chapter,
            EntityData::NarrativeBeat {
                beat_type: "conflict".to_string(),
                summary: None,
                tags: vec![],
                tension: None,
            },
        )
    }

    #[test]
    fn find_entities_orders_by_chapter_and_limits() {
        let store = MemoryBackend::new();
        store.save_entity(&beat("b3", 3)).unwrap();
        store.save_entity(&beat("b1", 1)).unwrap();
        store.save_entity(&beat("b2", 2)).unwrap();

        let found = store
            .find_entities(
                "novel-1",
                &EntityFilter::of_kind(EntityKind::NarrativeBeat).with_limit(2),
            )
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b1", "b2"]);
    }

    #[test]
    fn history_keeps_insertion_order_within_chapter() {
        let store = MemoryBackend::new();
        let mut first = CharacterState::new("novel-1", "Lin Chen", 5);
        first.location = Some("Gate".to_string());
        let mut second = first.clone();
        second.location = Some("Hall".to_string());
        store.push_history(&second.to_row().unwrap()).unwrap();
        store.push_history(&first.to_row().unwrap()).unwrap();

        let history = store.history(LedgerKind::Character, "novel-1", "Lin Chen").unwrap();
        let first_back = CharacterState::from_row(&history[0]).unwrap();
        assert_eq!(first_back.location.as_deref(), Some("Hall"));
    }

    #[test]
    fn delete_relations_in_chapter_is_scoped() {
        let store = MemoryBackend::new();
        store
            .save_relation(&GraphRelation::new("novel-1", 2, "a", "CAUSES", "b"))
            .unwrap();
        store
            .save_relation(&GraphRelation::new("novel-1", 3, "b", "CAUSES", "c"))
            .unwrap();
        store
            .save_relation(&GraphRelation::new("novel-2", 2, "x", "CAUSES", "y"))
            .unwrap();

        assert_eq!(store.delete_relations_in_chapter("novel-1", 2).unwrap(), 1);
        assert_eq!(store.relations("novel-1").unwrap().len(), 1);
        assert_eq!(store.relations("novel-2").unwrap().len(), 1);
    }

    #[test]
    fn stats_match_contents() {
        let store = MemoryBackend::new();
        store.save_entity(&beat("b1", 1)).unwrap();
        let state = CharacterState::new("novel-1", "Lin Chen", 1);
        store.save_ledger(&state.to_row().unwrap()).unwrap();
        store.push_history(&state.to_row().unwrap()).unwrap();

        let stats = store.stats(Some("novel-1")).unwrap();
        assert_eq!(stats.entities, 1);
        assert_eq!(stats.ledger_records, 1);
        assert_eq!(stats.history_snapshots, 1);
        assert_eq!(store.stats(Some("other")).unwrap().entities, 0);
    }
}
