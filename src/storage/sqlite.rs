//! SQLite storage backend for novelgraph

use super::traits::{
    BackendKind, BackendStats, EntityFilter, NarrativeBackend, OpenBackend, StorageError,
    StorageResult,
};
use crate::graph::{GraphEntity, GraphRelation, LedgerKind, LedgerRow};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite-backed narrative store
///
/// One database file holds every novel. Entities are stored as JSON with
/// `kind` and `chapter_number` lifted into columns for filtering. Ledger
/// records live in `ledger`, their snapshots in `ledger_history` ordered by
/// an autoincrement sequence. Thread-safe via internal mutex on the connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                novel_id TEXT NOT NULL,
                id TEXT NOT NULL,
                kind TEXT NOT NULL,
                chapter_number INTEGER NOT NULL,
                entity_json TEXT NOT NULL,
                PRIMARY KEY (novel_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_entities_kind
                ON entities(novel_id, kind);
            CREATE INDEX IF NOT EXISTS idx_entities_chapter
                ON entities(novel_id, chapter_number);

            CREATE TABLE IF NOT EXISTS relations (
                novel_id TEXT NOT NULL,
                id TEXT NOT NULL,
                chapter_number INTEGER NOT NULL,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                relation_json TEXT NOT NULL,
                PRIMARY KEY (novel_id, id)
            );

            CREATE INDEX IF NOT EXISTS idx_relations_from
                ON relations(novel_id, from_id);
            CREATE INDEX IF NOT EXISTS idx_relations_to
                ON relations(novel_id, to_id);
            CREATE INDEX IF NOT EXISTS idx_relations_chapter
                ON relations(novel_id, chapter_number);

            CREATE TABLE IF NOT EXISTS ledger (
                kind TEXT NOT NULL,
                novel_id TEXT NOT NULL,
                key TEXT NOT NULL,
                chapter INTEGER NOT NULL,
                payload_json TEXT NOT NULL,
                PRIMARY KEY (kind, novel_id, key)
            );

            CREATE TABLE IF NOT EXISTS ledger_history (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                novel_id TEXT NOT NULL,
                key TEXT NOT NULL,
                chapter INTEGER NOT NULL,
                payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_history_record
                ON ledger_history(kind, novel_id, key, chapter);

            -- Concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| StorageError::LockPoisoned(e.to_string()))
    }

    fn row_to_ledger(
        kind: String,
        novel_id: String,
        key: String,
        chapter: u32,
        payload_json: String,
    ) -> StorageResult<LedgerRow> {
        Ok(LedgerRow {
            kind: kind.parse().map_err(StorageError::InvalidData)?,
            novel_id,
            key,
            chapter,
            payload: serde_json::from_str(&payload_json)?,
        })
    }
}

impl OpenBackend for SqliteBackend {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl NarrativeBackend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sqlite
    }

    fn ping(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    // === Entity Operations ===

    fn save_entity(&self, entity: &GraphEntity) -> StorageResult<()> {
        let mut stored = entity.clone();
        stored.relevance_score = None;
        let json = serde_json::to_string(&stored)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO entities (novel_id, id, kind, chapter_number, entity_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(novel_id, id) DO UPDATE SET
                kind = excluded.kind,
                chapter_number = excluded.chapter_number,
                entity_json = excluded.entity_json
            "#,
            params![
                entity.novel_id,
                entity.id,
                entity.kind().as_str(),
                entity.chapter_number,
                json
            ],
        )?;
        Ok(())
    }

    fn load_entity(&self, novel_id: &str, id: &str) -> StorageResult<Option<GraphEntity>> {
        let conn = self.conn()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT entity_json FROM entities WHERE novel_id = ?1 AND id = ?2",
                params![novel_id, id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn delete_entity(&self, novel_id: &str, id: &str) -> StorageResult<bool> {
        let conn = self.conn()?;

        conn.execute(
            "DELETE FROM relations WHERE novel_id = ?1 AND (from_id = ?2 OR to_id = ?2)",
            params![novel_id, id],
        )?;

        let rows = conn.execute(
            "DELETE FROM entities WHERE novel_id = ?1 AND id = ?2",
            params![novel_id, id],
        )?;

        Ok(rows > 0)
    }

    fn find_entities(&self, novel_id: &str, filter: &EntityFilter) -> StorageResult<Vec<GraphEntity>> {
        let conn = self.conn()?;

        let mut sql = String::from("SELECT entity_json FROM entities WHERE novel_id = ?");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(novel_id.to_string())];

        if let Some(kind) = filter.kind {
            sql.push_str(" AND kind = ?");
            params_vec.push(Box::new(kind.as_str().to_string()));
        }

        if let Some(chapter) = filter.chapter {
            sql.push_str(" AND chapter_number = ?");
            params_vec.push(Box::new(chapter));
        }

        if let Some(max) = filter.max_chapter {
            sql.push_str(" AND chapter_number <= ?");
            params_vec.push(Box::new(max));
        }

        sql.push_str(" ORDER BY chapter_number ASC, id ASC");

        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), |row| row.get::<_, String>(0))?;

        let mut entities = Vec::new();
        for json in rows {
            entities.push(serde_json::from_str(&json?)?);
        }
        Ok(entities)
    }

    // === Relation Operations ===

    fn save_relation(&self, relation: &GraphRelation) -> StorageResult<()> {
        let json = serde_json::to_string(relation)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO relations (novel_id, id, chapter_number, from_id, to_id, relation_type, relation_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(novel_id, id) DO UPDATE SET
                chapter_number = excluded.chapter_number,
                from_id = excluded.from_id,
                to_id = excluded.to_id,
                relation_type = excluded.relation_type,
                relation_json = excluded.relation_json
            "#,
            params![
                relation.novel_id,
                relation.id,
                relation.chapter_number,
                relation.from_id,
                relation.to_id,
                relation.relation_type,
                json
            ],
        )?;
        Ok(())
    }

    fn relations(&self, novel_id: &str) -> StorageResult<Vec<GraphRelation>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT relation_json FROM relations WHERE novel_id = ?1 ORDER BY chapter_number ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![novel_id], |row| row.get::<_, String>(0))?;

        let mut relations = Vec::new();
        for json in rows {
            relations.push(serde_json::from_str(&json?)?);
        }
        Ok(relations)
    }

    fn delete_relations_in_chapter(&self, novel_id: &str, chapter: u32) -> StorageResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM relations WHERE novel_id = ?1 AND chapter_number = ?2",
            params![novel_id, chapter],
        )?;
        Ok(rows)
    }

    // === Ledger Operations ===

    fn load_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Option<LedgerRow>> {
        let conn = self.conn()?;
        let row: Option<(u32, String)> = conn
            .query_row(
                "SELECT chapter, payload_json FROM ledger WHERE kind = ?1 AND novel_id = ?2 AND key = ?3",
                params![kind.as_str(), novel_id, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((chapter, payload)) => Ok(Some(Self::row_to_ledger(
                kind.as_str().to_string(),
                novel_id.to_string(),
                key.to_string(),
                chapter,
                payload,
            )?)),
            None => Ok(None),
        }
    }

    fn save_ledger(&self, row: &LedgerRow) -> StorageResult<()> {
        let payload = serde_json::to_string(&row.payload)?;
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO ledger (kind, novel_id, key, chapter, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(kind, novel_id, key) DO UPDATE SET
                chapter = excluded.chapter,
                payload_json = excluded.payload_json
            "#,
            params![row.kind.as_str(), row.novel_id, row.key, row.chapter, payload],
        )?;
        Ok(())
    }

    fn delete_ledger(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<bool> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM ledger_history WHERE kind = ?1 AND novel_id = ?2 AND key = ?3",
            params![kind.as_str(), novel_id, key],
        )?;
        let rows = conn.execute(
            "DELETE FROM ledger WHERE kind = ?1 AND novel_id = ?2 AND key = ?3",
            params![kind.as_str(), novel_id, key],
        )?;
        Ok(rows > 0)
    }

    fn ledger_rows(&self, kind: LedgerKind, novel_id: &str) -> StorageResult<Vec<LedgerRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT key, chapter, payload_json FROM ledger WHERE kind = ?1 AND novel_id = ?2 ORDER BY key ASC",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), novel_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (key, chapter, payload) = row?;
            out.push(Self::row_to_ledger(
                kind.as_str().to_string(),
                novel_id.to_string(),
                key,
                chapter,
                payload,
            )?);
        }
        Ok(out)
    }

    fn push_history(&self, snapshot: &LedgerRow) -> StorageResult<()> {
        let payload = serde_json::to_string(&snapshot.payload)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ledger_history (kind, novel_id, key, chapter, payload_json) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.kind.as_str(),
                snapshot.novel_id,
                snapshot.key,
                snapshot.chapter,
                payload
            ],
        )?;
        Ok(())
    }

    fn history(&self, kind: LedgerKind, novel_id: &str, key: &str) -> StorageResult<Vec<LedgerRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT chapter, payload_json FROM ledger_history
             WHERE kind = ?1 AND novel_id = ?2 AND key = ?3
             ORDER BY chapter ASC, seq ASC",
        )?;
        let rows = stmt.query_map(params![kind.as_str(), novel_id, key], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (chapter, payload) = row?;
            out.push(Self::row_to_ledger(
                kind.as_str().to_string(),
                novel_id.to_string(),
                key.to_string(),
                chapter,
                payload,
            )?);
        }
        Ok(out)
    }

    fn truncate_history(
        &self,
        kind: LedgerKind,
        novel_id: &str,
        key: &str,
        from_chapter: u32,
    ) -> StorageResult<usize> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "DELETE FROM ledger_history WHERE kind = ?1 AND novel_id = ?2 AND key = ?3 AND chapter >= ?4",
            params![kind.as_str(), novel_id, key, from_chapter],
        )?;
        Ok(rows)
    }

    fn max_ledger_chapter(&self, novel_id: &str) -> StorageResult<Option<u32>> {
        let conn = self.conn()?;
        let max: Option<u32> = conn.query_row(
            "SELECT MAX(chapter) FROM ledger WHERE novel_id = ?1",
            params![novel_id],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    fn stats(&self, novel_id: Option<&str>) -> StorageResult<BackendStats> {
        let conn = self.conn()?;
        // `?1 IS NULL` selects every novel
        let count = |table: &str| -> StorageResult<usize> {
            let sql = format!(
                "SELECT COUNT(*) FROM {} WHERE (?1 IS NULL OR novel_id = ?1)",
                table
            );
            let n: i64 = conn.query_row(&sql, params![novel_id], |row| row.get(0))?;
            Ok(n as usize)
        };

        let mut stats = BackendStats {
            entities: count("entities")?,
            relations: count("relations")?,
            ledger_records: count("ledger")?,
            history_snapshots: count("ledger_history")?,
            ..Default::default()
        };

        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM entities WHERE (?1 IS NULL OR novel_id = ?1) GROUP BY kind",
        )?;
        let rows = stmt.query_map(params![novel_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (kind, n) = row?;
            stats.entities_by_kind.insert(kind, n as usize);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CharacterState, EntityData, EntityKind, LedgerRecord};

    fn create_test_store() -> SqliteBackend {
        SqliteBackend::open_in_memory().unwrap()
    }

    fn event(id: &str, chapter: u32) -> GraphEntity {
        GraphEntity::new(
            id,
            "novel-1",
            chapter,
            EntityData::Event {
                summary: format!("event {}", id),
                description: None,
                importance: 0.5,
                participants: vec![],
                location: None,
                plotline: None,
                tags: vec![],
            },
        )
    }

    #[test]
    fn test_save_and_load_entity() {
        let store = create_test_store();
        let entity = event("evt-1", 3).with_score(4.2);
        store.save_entity(&entity).unwrap();

        let loaded = store.load_entity("novel-1", "evt-1").unwrap().unwrap();
        assert_eq!(loaded.chapter_number, 3);
        assert_eq!(loaded.kind(), EntityKind::Event);
        // Scores are query-time only
        assert_eq!(loaded.relevance_score, None);
    }

    #[test]
    fn test_find_entities_by_kind_and_chapter() {
        let store = create_test_store();
        store.save_entity(&event("evt-1", 1)).unwrap();
        store.save_entity(&event("evt-2", 2)).unwrap();
        store
            .save_entity(&GraphEntity::new(
                "char-1",
                "novel-1",
                2,
                EntityData::Character {
                    name: "Lin Chen".to_string(),
                    role: None,
                    description: None,
                },
            ))
            .unwrap();

        let events = store
            .find_entities("novel-1", &EntityFilter::of_kind(EntityKind::Event))
            .unwrap();
        assert_eq!(events.len(), 2);

        let chapter_two = store
            .find_entities("novel-1", &EntityFilter::new().in_chapter(2))
            .unwrap();
        assert_eq!(chapter_two.len(), 2);

        let up_to_one = store
            .find_entities("novel-1", &EntityFilter::new().up_to_chapter(1))
            .unwrap();
        assert_eq!(up_to_one.len(), 1);
        assert_eq!(up_to_one[0].id, "evt-1");
    }

    #[test]
    fn test_delete_entity_cascades_relations() {
        let store = create_test_store();
        store.save_entity(&event("evt-1", 1)).unwrap();
        store.save_entity(&event("evt-2", 2)).unwrap();
        store
            .save_relation(&GraphRelation::new("novel-1", 2, "evt-1", "CAUSES", "evt-2"))
            .unwrap();

        assert!(store.delete_entity("novel-1", "evt-1").unwrap());
        assert!(store.relations("novel-1").unwrap().is_empty());
        assert!(!store.delete_entity("novel-1", "evt-1").unwrap());
    }

    #[test]
    fn test_history_is_ordered_and_truncatable() {
        let store = create_test_store();
        for chapter in [5, 2, 9] {
            let state = CharacterState::new("novel-1", "Lin Chen", chapter);
            store.push_history(&state.to_row().unwrap()).unwrap();
        }

        let history = store.history(LedgerKind::Character, "novel-1", "Lin Chen").unwrap();
        let chapters: Vec<u32> = history.iter().map(|r| r.chapter).collect();
        assert_eq!(chapters, vec![2, 5, 9]);

        let removed = store
            .truncate_history(LedgerKind::Character, "novel-1", "Lin Chen", 5)
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(
            store.history(LedgerKind::Character, "novel-1", "Lin Chen").unwrap().len(),
            1
        );
    }

    #[test]
    fn test_delete_ledger_clears_history() {
        let store = create_test_store();
        let state = CharacterState::new("novel-1", "Lin Chen", 5);
        store.save_ledger(&state.to_row().unwrap()).unwrap();
        store.push_history(&state.to_row().unwrap()).unwrap();

        assert!(store.delete_ledger(LedgerKind::Character, "novel-1", "Lin Chen").unwrap());
        assert!(store.load_ledger(LedgerKind::Character, "novel-1", "Lin Chen").unwrap().is_none());
        assert!(store.history(LedgerKind::Character, "novel-1", "Lin Chen").unwrap().is_empty());
    }

    #[test]
    fn test_max_ledger_chapter() {
        let store = create_test_store();
        assert_eq!(store.max_ledger_chapter("novel-1").unwrap(), None);

        store
            .save_ledger(&CharacterState::new("novel-1", "A", 4).to_row().unwrap())
            .unwrap();
        store
            .save_ledger(&CharacterState::new("novel-1", "B", 7).to_row().unwrap())
            .unwrap();
        store
            .save_ledger(&CharacterState::new("novel-2", "C", 20).to_row().unwrap())
            .unwrap();

        assert_eq!(store.max_ledger_chapter("novel-1").unwrap(), Some(7));
    }

    #[test]
    fn test_stats_counts_per_novel() {
        let store = create_test_store();
        store.save_entity(&event("evt-1", 1)).unwrap();
        let mut other = event("evt-x", 1);
        other.novel_id = "novel-2".to_string();
        store.save_entity(&other).unwrap();

        let all = store.stats(None).unwrap();
        assert_eq!(all.entities, 2);
        let one = store.stats(Some("novel-1")).unwrap();
        assert_eq!(one.entities, 1);
        assert_eq!(one.entities_by_kind.get("event"), Some(&1));
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        {
            let store = SqliteBackend::open(&path).unwrap();
            store.save_entity(&event("evt-1", 1)).unwrap();
            store
                .save_ledger(&CharacterState::new("novel-1", "Lin Chen", 5).to_row().unwrap())
                .unwrap();
        }

        let store = SqliteBackend::open(&path).unwrap();
        assert!(store.load_entity("novel-1", "evt-1").unwrap().is_some());
        let row = store
            .load_ledger(LedgerKind::Character, "novel-1", "Lin Chen")
            .unwrap()
            .unwrap();
        assert_eq!(CharacterState::from_row(&row).unwrap().last_updated_chapter, 5);
    }

    #[test]
    fn test_ping() {
        let store = create_test_store();
        assert!(store.ping().is_ok());
        assert_eq!(store.kind(), BackendKind::Sqlite);
    }
}
