//! Shared fixtures for novelgraph integration tests

#![allow(dead_code)]

use novelgraph::{
    ExtractionRequest, MemoryBackend, ModelConfig, NarrativeStore, OpenBackend, SqliteBackend,
};
use std::path::Path;
use std::sync::Arc;

pub const NOVEL: &str = "azure-sect";

pub fn model_config() -> ModelConfig {
    ModelConfig::new("openai", "gpt-test").with_api_key("sk-test")
}

pub fn memory_store() -> Arc<NarrativeStore> {
    Arc::new(NarrativeStore::new(Arc::new(MemoryBackend::new())))
}

pub fn sqlite_store(dir: &Path) -> Arc<NarrativeStore> {
    let backend = SqliteBackend::open(dir.join("novel.db")).expect("open sqlite backend");
    Arc::new(NarrativeStore::new(Arc::new(backend)))
}

/// Chapter prose long enough to pass the extraction threshold
pub fn chapter_text(scene: &str) -> String {
    format!(
        "{} The wind carried the sound of temple bells across the valley, \
         and Lin Chen tightened his grip on the worn wooden sword.",
        scene
    )
}

pub fn request(chapter: u32, scene: &str) -> ExtractionRequest {
    ExtractionRequest::new(
        NOVEL,
        chapter,
        format!("Chapter {}", chapter),
        chapter_text(scene),
        model_config(),
    )
}

/// Extraction response moving Lin Chen to `location`
pub fn movement_response(location: &str, event: &str) -> String {
    format!(
        r#"{{
  "characters": [{{"name": "Lin Chen", "role": "protagonist"}}],
  "events": [{{"summary": "{event}", "importance": 7, "participants": ["Lin Chen"]}}],
  "stateDeltas": {{
    "characters": [{{"characterName": "Lin Chen", "location": "{location}"}}]
  }}
}}"#,
        event = event,
        location = location
    )
}
