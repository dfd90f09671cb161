//! EntityExtractor: chapter text in, narrative facts out
//!
//! The extractor is the only component that writes state ledgers. The model
//! proposes facts; every state change goes through the store's guarded
//! upsert API so history and the monotonic-chapter guard always apply.

use super::importance::normalize_importance;
use super::prompt::{build_extraction_messages, KnownContext};
use super::sanitize::sanitize_json;
use super::schema::{count, ExtractionResponse, NameRecord};
use crate::config::ExtractionSettings;
use crate::graph::{
    relation_type, CharacterStateDelta, EntityData, EntityKind, ForeshadowStatus, GraphEntity,
    ImportanceTier, OpenQuest, PlotlineStatus, UpsertOutcome,
};
use crate::llm::{task_tag, ModelClient, ModelConfig, ModelError};
use crate::storage::StorageResult;
use crate::store::NarrativeStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `source` stamped on every entity this extractor writes
pub const SOURCE_TAG: &str = "extraction";

/// Upper bound on known foreshadows listed in the prompt
const KNOWN_FORESHADOW_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub novel_id: String,
    pub chapter_number: u32,
    pub chapter_title: String,
    #[serde(default)]
    pub content: Option<String>,
    pub model_config: ModelConfig,
}

impl ExtractionRequest {
    pub fn new(
        novel_id: impl Into<String>,
        chapter_number: u32,
        chapter_title: impl Into<String>,
        content: impl Into<String>,
        model_config: ModelConfig,
    ) -> Self {
        Self {
            novel_id: novel_id.into(),
            chapter_number,
            chapter_title: chapter_title.into(),
            content: Some(content.into()),
            model_config,
        }
    }
}

/// What one extraction pass wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub novel_id: String,
    pub chapter_number: u32,
    /// Content missing or too short; nothing was attempted
    pub skipped: bool,
    /// The response held no usable JSON; nothing was written
    pub parse_failed: bool,
    pub entities_written: usize,
    pub relations_written: usize,
    pub state_updates: usize,
    /// Ledger writes rejected by the monotonic-chapter guard
    pub stale_updates: usize,
    pub write_failures: usize,
}

/// Errors that stop an extraction pass
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction config invalid: {0}")]
    Config(ModelError),
    #[error("extraction model call failed: {0}")]
    Model(ModelError),
}

impl ExtractionError {
    /// Config failures are never retried automatically
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Anything that can extract a chapter; the retry coordinator works against this
#[async_trait]
pub trait ChapterExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionSummary, ExtractionError>;
}

pub struct EntityExtractor {
    store: Arc<NarrativeStore>,
    client: Arc<dyn ModelClient>,
    settings: ExtractionSettings,
}

impl EntityExtractor {
    pub fn new(store: Arc<NarrativeStore>, client: Arc<dyn ModelClient>) -> Self {
        Self::with_settings(store, client, ExtractionSettings::default())
    }

    pub fn with_settings(
        store: Arc<NarrativeStore>,
        client: Arc<dyn ModelClient>,
        settings: ExtractionSettings,
    ) -> Self {
        Self {
            store,
            client,
            settings,
        }
    }

    async fn run(&self, request: &ExtractionRequest) -> Result<ExtractionSummary, ExtractionError> {
        let novel_id = request.novel_id.as_str();
        let chapter = request.chapter_number;
        let mut summary = ExtractionSummary {
            novel_id: novel_id.to_string(),
            chapter_number: chapter,
            ..Default::default()
        };

        let content = request.content.as_deref().unwrap_or_default();
        if content.trim().chars().count() < self.settings.min_content_chars {
            debug!(novel_id, chapter, "chapter content too short, skipping extraction");
            summary.skipped = true;
            return Ok(summary);
        }

        request.model_config.validate().map_err(ExtractionError::Config)?;

        let open_foreshadows = self
            .store
            .unresolved_foreshadowing(novel_id, chapter, KNOWN_FORESHADOW_LIMIT);
        let open_quests = self.store.open_quests(novel_id);
        let messages = build_extraction_messages(
            chapter,
            &request.chapter_title,
            content,
            &KnownContext {
                open_foreshadows: &open_foreshadows,
                open_quests: &open_quests,
            },
        );

        let raw = match self
            .client
            .generate(&messages, task_tag::ENTITY_EXTRACTION, &request.model_config)
            .await
        {
            Ok(text) if text.trim().is_empty() => {
                return Err(ExtractionError::Model(ModelError::EmptyResponse))
            }
            Ok(text) => text,
            Err(e) if e.is_config() => return Err(ExtractionError::Config(e)),
            Err(e) => return Err(ExtractionError::Model(e)),
        };

        let Some(root) = sanitize_json(&raw) else {
            warn!(novel_id, chapter, "extraction response held no usable JSON");
            summary.parse_failed = true;
            return Ok(summary);
        };

        let response = ExtractionResponse::from_value(&root);
        let mut batch = ChapterBatch {
            store: &self.store,
            novel_id,
            chapter,
            default_importance: self.settings.default_importance,
            summary,
            event_ids: HashMap::new(),
            plotline_ids: HashMap::new(),
        };
        batch.apply(response, &open_quests);
        let summary = batch.summary;

        info!(
            novel_id,
            chapter,
            entities = summary.entities_written,
            relations = summary.relations_written,
            state_updates = summary.state_updates,
            stale = summary.stale_updates,
            write_failures = summary.write_failures,
            "chapter extraction complete"
        );
        Ok(summary)
    }
}

#[async_trait]
impl ChapterExtractor for EntityExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionSummary, ExtractionError> {
        self.run(request).await
    }
}

fn character_id(name: &str) -> String {
    format!("character:{}", name)
}

fn location_id(name: &str) -> String {
    format!("location:{}", name)
}

fn relation_label(kind: Option<&str>) -> String {
    match kind.map(str::trim).filter(|k| !k.is_empty()) {
        Some(kind) => kind.to_uppercase().replace([' ', '-'], "_"),
        None => relation_type::RELATES_TO.to_string(),
    }
}

/// Writes for one chapter, counting outcomes as it goes
struct ChapterBatch<'a> {
    store: &'a NarrativeStore,
    novel_id: &'a str,
    chapter: u32,
    default_importance: f64,
    summary: ExtractionSummary,
    /// Given id or lowercased summary → stored event id
    event_ids: HashMap<String, String>,
    /// Lowercased plotline name → stored plotline id
    plotline_ids: HashMap<String, String>,
}

impl ChapterBatch<'_> {
    fn entity(&mut self, entity: GraphEntity) {
        match self.store.add_entity(&entity.with_source(SOURCE_TAG)) {
            Ok(()) => self.summary.entities_written += 1,
            Err(_) => self.summary.write_failures += 1,
        }
    }

    fn relation(&mut self, from: &str, kind: &str, to: &str, properties: HashMap<String, Value>) {
        match self
            .store
            .add_relationship(self.novel_id, self.chapter, from, kind, to, properties)
        {
            Ok(_) => self.summary.relations_written += 1,
            Err(_) => self.summary.write_failures += 1,
        }
    }

    fn ledger(&mut self, result: StorageResult<UpsertOutcome>) {
        match result {
            Ok(UpsertOutcome::Stale { .. }) => self.summary.stale_updates += 1,
            Ok(_) => self.summary.state_updates += 1,
            Err(_) => self.summary.write_failures += 1,
        }
    }

    fn new_entity(&self, id: Option<String>, data: EntityData) -> GraphEntity {
        match id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
            Some(id) => GraphEntity::new(id, self.novel_id, self.chapter, data),
            None => GraphEntity::with_random_id(self.novel_id, self.chapter, data),
        }
    }

    fn apply(&mut self, response: ExtractionResponse, open_quests: &[OpenQuest]) {
        for record in &response.characters {
            self.named(record, EntityKind::Character);
        }
        for record in &response.locations {
            self.named(record, EntityKind::Location);
        }
        self.plotlines(&response);
        self.events(&response);
        self.causal_links(&response);
        self.foreshadows(&response);
        self.world_rules(&response);
        self.signals(&response);
        self.character_relations(&response);
        self.state_deltas(&response, open_quests);
    }

    /// Characters and locations are keyed by name and keep the chapter
    /// that introduced them
    fn named(&mut self, record: &NameRecord, kind: EntityKind) {
        let name = record.name();
        if name.is_empty() {
            return;
        }
        let id = match kind {
            EntityKind::Location => location_id(name),
            _ => character_id(name),
        };
        let existing = self.store.get_entity(self.novel_id, &id);
        let chapter = existing
            .as_ref()
            .map_or(self.chapter, |e| e.chapter_number.min(self.chapter));

        let data = match (kind, existing.map(|e| e.data)) {
            (EntityKind::Location, Some(EntityData::Location { description, .. })) => EntityData::Location {
                name: name.to_string(),
                description: record.description().map(str::to_string).or(description),
            },
            (EntityKind::Location, _) => EntityData::Location {
                name: name.to_string(),
                description: record.description().map(str::to_string),
            },
            (_, Some(EntityData::Character { role, description, .. })) => EntityData::Character {
                name: name.to_string(),
                role: record.role().map(str::to_string).or(role),
                description: record.description().map(str::to_string).or(description),
            },
            _ => EntityData::Character {
                name: name.to_string(),
                role: record.role().map(str::to_string),
                description: record.description().map(str::to_string),
            },
        };
        self.entity(GraphEntity::new(id, self.novel_id, chapter, data));
    }

    fn plotlines(&mut self, response: &ExtractionResponse) {
        for record in &response.plotlines {
            let name = record.name.trim();
            if name.is_empty() {
                continue;
            }
            let entity = self.new_entity(
                record.id.clone(),
                EntityData::Plotline {
                    name: name.to_string(),
                    description: record.description.clone(),
                    priority: normalize_importance(record.priority.as_ref(), 0.5),
                    status: record
                        .status
                        .as_deref()
                        .map(PlotlineStatus::parse_lenient)
                        .unwrap_or_default(),
                },
            );
            self.plotline_ids.insert(name.to_lowercase(), entity.id.clone());
            self.entity(entity);
        }
    }

    fn events(&mut self, response: &ExtractionResponse) {
        for record in &response.events {
            let summary = record.summary.trim();
            if summary.is_empty() {
                continue;
            }
            let entity = self.new_entity(
                record.id.clone(),
                EntityData::Event {
                    summary: summary.to_string(),
                    description: record.description.clone(),
                    importance: normalize_importance(record.importance.as_ref(), self.default_importance),
                    participants: record.participants.clone(),
                    location: record.location.clone(),
                    plotline: record.plotline.clone(),
                    tags: record.tags.clone(),
                },
            );
            let event_id = entity.id.clone();
            if let Some(given) = &record.id {
                self.event_ids.insert(given.trim().to_string(), event_id.clone());
            }
            self.event_ids.insert(summary.to_lowercase(), event_id.clone());
            self.entity(entity);

            for participant in record.participants.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
                self.relation(
                    &character_id(participant),
                    relation_type::PARTICIPATES_IN,
                    &event_id,
                    HashMap::new(),
                );
            }
            let plotline_id = record
                .plotline
                .as_deref()
                .and_then(|p| self.plotline_ids.get(&p.trim().to_lowercase()).cloned());
            if let Some(plotline_id) = plotline_id {
                self.relation(&event_id, relation_type::ADVANCES, &plotline_id, HashMap::new());
            }
        }
    }

    /// Resolve an event reference from this chapter, or an id already stored
    fn resolve_event(&self, reference: &str) -> Option<String> {
        let reference = reference.trim();
        if let Some(id) = self.event_ids.get(reference) {
            return Some(id.clone());
        }
        if let Some(id) = self.event_ids.get(&reference.to_lowercase()) {
            return Some(id.clone());
        }
        self.store
            .get_entity(self.novel_id, reference)
            .filter(|e| e.kind() == EntityKind::Event)
            .map(|e| e.id)
    }

    fn causal_links(&mut self, response: &ExtractionResponse) {
        for link in &response.causal_relations {
            match (self.resolve_event(&link.from), self.resolve_event(&link.to)) {
                (Some(from), Some(to)) if from != to => {
                    let mut properties = HashMap::new();
                    if let Some(description) = &link.description {
                        properties.insert("description".to_string(), json!(description));
                    }
                    self.relation(&from, relation_type::CAUSES, &to, properties);
                }
                _ => debug!(
                    novel_id = self.novel_id,
                    from = %link.from,
                    to = %link.to,
                    "skipping causal link with unresolved endpoint"
                ),
            }
        }
    }

    fn foreshadows(&mut self, response: &ExtractionResponse) {
        for record in &response.foreshadows {
            let status = record
                .status
                .as_deref()
                .map(ForeshadowStatus::parse_lenient)
                .unwrap_or_default();
            let resolved_chapter = (status == ForeshadowStatus::Revealed).then_some(self.chapter);

            // A known id updates the planted record in place
            let known = record
                .id
                .as_deref()
                .and_then(|id| self.store.get_entity(self.novel_id, id.trim()));
            if let Some(mut planted) = known {
                if let EntityData::Foreshadowing {
                    status: current,
                    resolved_chapter: resolved,
                    ..
                } = &mut planted.data
                {
                    *current = status;
                    if resolved_chapter.is_some() {
                        *resolved = resolved_chapter;
                    }
                    self.entity(planted);
                    continue;
                }
            }

            let content = record.content.trim();
            if content.is_empty() {
                continue;
            }
            let importance = normalize_importance(record.importance.as_ref(), self.default_importance);
            let entity = self.new_entity(
                record.id.clone(),
                EntityData::Foreshadowing {
                    content: content.to_string(),
                    tier: ImportanceTier::from_score(importance),
                    status,
                    resolved_chapter,
                    expected_payoff_chapter: record.expected_payoff_chapter,
                },
            );
            self.entity(entity);
        }
    }

    fn world_rules(&mut self, response: &ExtractionResponse) {
        for record in &response.world_rules {
            if record.name.trim().is_empty() {
                continue;
            }
            let entity = self.new_entity(
                record.id.clone(),
                EntityData::WorldRule {
                    name: record.name.trim().to_string(),
                    description: record.description.clone(),
                    category: record.category.clone(),
                },
            );
            self.entity(entity);
        }
    }

    /// Beat, arcs and perspective: one record per chapter (per arc)
    fn signals(&mut self, response: &ExtractionResponse) {
        let chapter = self.chapter;
        if let Some(beat) = &response.narrative_beat {
            self.entity(GraphEntity::new(
                format!("beat:{}", chapter),
                self.novel_id,
                chapter,
                EntityData::NarrativeBeat {
                    beat_type: beat.beat_type.clone(),
                    summary: beat.summary.clone(),
                    tags: beat.tags.clone(),
                    tension: beat.tension,
                },
            ));
        }

        for arc in &response.conflict_arcs {
            let name = arc.name.trim();
            if name.is_empty() {
                continue;
            }
            self.entity(GraphEntity::new(
                format!("conflict_arc:{}:{}", name.to_lowercase(), chapter),
                self.novel_id,
                chapter,
                EntityData::ConflictArc {
                    name: name.to_string(),
                    stage: arc.stage.clone(),
                    progress: count(arc.progress.as_ref()),
                    total_beats: count(arc.total_beats.as_ref()),
                    urgency: normalize_importance(arc.urgency.as_ref(), 0.5),
                    next_action: arc.next_action.clone(),
                    parties: arc.parties.clone(),
                },
            ));
        }

        for arc in &response.character_arcs {
            let (who, what) = (arc.character_name.trim(), arc.arc_name.trim());
            if who.is_empty() || what.is_empty() {
                continue;
            }
            self.entity(GraphEntity::new(
                format!("character_arc:{}:{}:{}", who.to_lowercase(), what.to_lowercase(), chapter),
                self.novel_id,
                chapter,
                EntityData::CharacterArc {
                    character_name: who.to_string(),
                    arc_name: what.to_string(),
                    stage: arc.stage.clone(),
                    progress: count(arc.progress.as_ref()),
                    total_beats: count(arc.total_beats.as_ref()),
                    priority: normalize_importance(arc.priority.as_ref(), 0.5),
                    next_action: arc.next_action.clone(),
                },
            ));
        }

        if let Some(pov) = &response.perspective {
            if !pov.character_name.trim().is_empty() {
                self.entity(GraphEntity::new(
                    format!("perspective:{}", chapter),
                    self.novel_id,
                    chapter,
                    EntityData::PerspectiveUsage {
                        character_name: pov.character_name.trim().to_string(),
                        mode: pov.mode.clone(),
                    },
                ));
            }
        }
    }

    fn character_relations(&mut self, response: &ExtractionResponse) {
        for delta in &response.character_relations {
            let (from, to) = (delta.from.trim(), delta.to.trim());
            if from.is_empty() || to.is_empty() || from == to {
                continue;
            }
            let mut properties = HashMap::new();
            if let Some(strength) = delta.strength {
                properties.insert("strength".to_string(), json!(strength));
            }
            if let Some(description) = &delta.description {
                properties.insert("description".to_string(), json!(description));
            }
            self.relation(
                &character_id(from),
                &relation_label(delta.kind.as_deref()),
                &character_id(to),
                properties,
            );
            let result = self.store.upsert_relationship_state(self.novel_id, self.chapter, delta);
            self.ledger(result);
        }
    }

    fn state_deltas(&mut self, response: &ExtractionResponse, open_quests: &[OpenQuest]) {
        let deltas = &response.state_deltas;
        let (novel_id, chapter) = (self.novel_id, self.chapter);

        for delta in &deltas.characters {
            if delta.character_name.trim().is_empty() || delta.is_empty() {
                continue;
            }
            let result = self.store.upsert_character_state(novel_id, chapter, delta);
            self.ledger(result);
        }

        for faction in &deltas.factions {
            for member in faction.members.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
                let delta = CharacterStateDelta::for_character(member).with_affiliation(faction.faction.trim());
                let result = self.store.upsert_character_state(novel_id, chapter, &delta);
                self.ledger(result);
            }
        }

        for movement in &deltas.locations {
            if movement.character.trim().is_empty() {
                continue;
            }
            let delta = CharacterStateDelta::for_character(movement.character.trim())
                .with_location(movement.location.trim());
            let result = self.store.upsert_character_state(novel_id, chapter, &delta);
            self.ledger(result);
        }

        for opened in &deltas.quests_opened {
            let id = opened
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("quest-{}", Uuid::new_v4().simple()));
            let mut quest = OpenQuest::new(novel_id, id, opened.description.trim(), chapter);
            quest.due_by_chapter = opened.due_by_chapter;
            let result = self.store.upsert_open_quest(&quest);
            self.ledger(result);
        }

        for reference in &deltas.quests_resolved {
            let reference = reference.trim();
            let quest_id = open_quests
                .iter()
                .find(|q| q.id == reference || q.description.eq_ignore_ascii_case(reference))
                .map_or(reference, |q| q.id.as_str());
            match self.store.resolve_open_quest(novel_id, chapter, quest_id) {
                Ok(Some(outcome)) => self.ledger(Ok(outcome)),
                Ok(None) => debug!(novel_id, quest = reference, "resolved quest not found"),
                Err(e) => self.ledger(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockModelClient;
    use crate::storage::MemoryBackend;

    const NOVEL: &str = "novel-1";

    fn config() -> ModelConfig {
        ModelConfig::new("openai", "gpt-test").with_api_key("sk-test")
    }

    fn long_text() -> String {
        "Lin Chen climbed the nine hundred steps to the Azure Sect gate while snow fell. ".repeat(3)
    }

    fn setup(response: &str) -> (Arc<NarrativeStore>, Arc<MockModelClient>, EntityExtractor) {
        let store = Arc::new(NarrativeStore::new(Arc::new(MemoryBackend::new())));
        let client = Arc::new(MockModelClient::new().with_default_response(response));
        let extractor = EntityExtractor::new(store.clone(), client.clone());
        (store, client, extractor)
    }

    #[tokio::test]
    async fn short_content_is_skipped_without_model_call() {
        let (store, client, extractor) = setup("{}");
        let request = ExtractionRequest::new(NOVEL, 1, "Prologue", "Too short.", config());
        let summary = extractor.extract(&request).await.unwrap();
        assert!(summary.skipped);
        assert_eq!(summary.entities_written, 0);
        assert!(client.calls().is_empty());
        assert_eq!(store.stats(Some(NOVEL)).entities, 0);
    }

    #[tokio::test]
    async fn invalid_config_fails_fast() {
        let (_, client, extractor) = setup("{}");
        let request = ExtractionRequest::new(NOVEL, 1, "Prologue", long_text(), ModelConfig::new("openai", "m"));
        let err = extractor.extract(&request).await.unwrap_err();
        assert!(err.is_permanent());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_response_yields_empty_summary() {
        let (store, _, extractor) = setup("I could not find anything noteworthy.");
        let request = ExtractionRequest::new(NOVEL, 1, "Prologue", long_text(), config());
        let summary = extractor.extract(&request).await.unwrap();
        assert!(summary.parse_failed);
        assert_eq!(store.stats(Some(NOVEL)).entities, 0);
    }

    #[tokio::test]
    async fn model_failure_is_transient() {
        let store = Arc::new(NarrativeStore::new(Arc::new(MemoryBackend::new())));
        let client = Arc::new(MockModelClient::new().with_failure(
            task_tag::ENTITY_EXTRACTION,
            ModelError::Request("timeout".to_string()),
        ));
        let extractor = EntityExtractor::new(store, client);
        let request = ExtractionRequest::new(NOVEL, 1, "Prologue", long_text(), config());
        let err = extractor.extract(&request).await.unwrap_err();
        assert!(!err.is_permanent());
    }

    #[tokio::test]
    async fn facts_and_state_are_written() {
        let response = r#"```json
{
  "characters": ["Lin Chen", {"name": "Elder Mo", "role": "mentor"}],
  "events": [
    {"id": "e-arrive", "summary": "Lin Chen arrives at the gate", "importance": 8, "participants": ["Lin Chen"]},
    {"summary": "Elder Mo tests him", "importance": "high", "participants": ["Lin Chen", "Elder Mo"]}
  ],
  "causalRelations": [{"from": "e-arrive", "to": "elder mo tests him"}],
  "foreshadows": [{"content": "A cracked jade pendant", "importance": "low"}],
  "characterRelations": [{"from": "Lin Chen", "to": "Elder Mo", "kind": "master disciple", "strength": 0.4}],
  "stateDeltas": {
    "characters": [{"name": "Lin Chen", "realm": "Qi Condensation"}],
    "factions": [{"faction": "Azure Sect", "members": ["Lin Chen"]}],
    "locations": [{"character": "Lin Chen", "location": "Sect Gate"}],
    "questsOpened": [{"id": "q-trial", "description": "Pass the entrance trial"}]
  },
  "narrativeBeat": {"beatType": "setup"},
  "perspective": {"characterName": "Lin Chen"},
}
```"#;
        let (store, client, extractor) = setup(response);
        let request = ExtractionRequest::new(NOVEL, 5, "The Gate", long_text(), config());
        let summary = extractor.extract(&request).await.unwrap();

        assert_eq!(client.calls_for(task_tag::ENTITY_EXTRACTION), 1);
        // 2 characters, 2 events, 1 foreshadow, beat, perspective
        assert_eq!(summary.entities_written, 7);
        // 3 participation edges, 1 causal, 1 character relation
        assert_eq!(summary.relations_written, 5);
        assert_eq!(summary.write_failures, 0);

        let arrive = store.get_entity(NOVEL, "e-arrive").unwrap();
        assert_eq!(arrive.importance(), 0.8);
        assert_eq!(arrive.source.as_deref(), Some(SOURCE_TAG));

        let lin = store.character_state(NOVEL, "Lin Chen").unwrap();
        assert_eq!(lin.realm.as_deref(), Some("Qi Condensation"));
        assert_eq!(lin.affiliation.as_deref(), Some("Azure Sect"));
        assert_eq!(lin.location.as_deref(), Some("Sect Gate"));
        assert_eq!(lin.last_updated_chapter, 5);

        let rel = store.relationship_state(NOVEL, "Elder Mo", "Lin Chen").unwrap();
        assert_eq!(rel.kind, "master disciple");
        assert_eq!(store.open_quests(NOVEL).len(), 1);

        let causes: Vec<_> = store
            .relations(NOVEL)
            .into_iter()
            .filter(|r| r.relation_type == relation_type::CAUSES)
            .collect();
        assert_eq!(causes.len(), 1);
        assert_eq!(causes[0].from_id, "e-arrive");
    }

    #[tokio::test]
    async fn revealed_foreshadow_updates_planted_record() {
        let (store, _, _) = setup("{}");
        store
            .add_entity(&GraphEntity::new(
                "fs-jade",
                NOVEL,
                2,
                EntityData::Foreshadowing {
                    content: "A cracked jade pendant".to_string(),
                    tier: ImportanceTier::High,
                    status: ForeshadowStatus::Planted,
                    resolved_chapter: None,
                    expected_payoff_chapter: None,
                },
            ))
            .unwrap();
        let client = Arc::new(MockModelClient::new().with_default_response(
            r#"{"foreshadows": [{"id": "fs-jade", "content": "The pendant holds a soul", "status": "revealed"}],
                "stateDeltas": {"questsResolved": ["Pass the entrance trial"]}}"#,
        ));
        store
            .upsert_open_quest(&OpenQuest::new(NOVEL, "q-trial", "Pass the entrance trial", 3))
            .unwrap();

        let extractor = EntityExtractor::new(store.clone(), client);
        let request = ExtractionRequest::new(NOVEL, 8, "The Soul", long_text(), config());
        let summary = extractor.extract(&request).await.unwrap();
        assert_eq!(summary.state_updates, 1);

        let jade = store.get_entity(NOVEL, "fs-jade").unwrap();
        assert_eq!(jade.chapter_number, 2);
        match jade.data {
            EntityData::Foreshadowing {
                status,
                resolved_chapter,
                content,
                ..
            } => {
                assert_eq!(status, ForeshadowStatus::Revealed);
                assert_eq!(resolved_chapter, Some(8));
                assert_eq!(content, "A cracked jade pendant");
            }
            other => panic!("unexpected data {:?}", other),
        }
        assert!(store.unresolved_foreshadowing(NOVEL, 9, 10).is_empty());
        assert!(store.open_quests(NOVEL).is_empty());
    }

    #[tokio::test]
    async fn characters_keep_their_introduction_chapter() {
        let (store, _, extractor) = setup(r#"{"characters": [{"name": "Lin Chen", "role": "protagonist"}]}"#);
        extractor
            .extract(&ExtractionRequest::new(NOVEL, 3, "A", long_text(), config()))
            .await
            .unwrap();
        extractor
            .extract(&ExtractionRequest::new(NOVEL, 6, "B", long_text(), config()))
            .await
            .unwrap();
        let lin = store.get_entity(NOVEL, "character:Lin Chen").unwrap();
        assert_eq!(lin.chapter_number, 3);
    }
}
