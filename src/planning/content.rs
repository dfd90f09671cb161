//! Content source: read access to authored material outside the graph
//!
//! Outlines, volume blueprints, chapter text and character profiles live in
//! the host application's own persistence. The planner only reads them.

use super::tools::ToolError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One previously written chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterText {
    pub chapter_number: u32,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChapterText {
    pub fn new(chapter_number: u32, title: impl Into<String>) -> Self {
        Self {
            chapter_number,
            title: title.into(),
            summary: None,
            content: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Short traits or facts worth keeping in view
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// The contract a host application implements to expose its content.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn outline(&self, novel_id: &str) -> Result<Option<String>, ToolError>;

    /// Structured plan for the volume containing `chapter_number`
    async fn volume_blueprint(&self, novel_id: &str, chapter_number: u32) -> Result<Option<Value>, ToolError>;

    /// Up to `window` chapters before `chapter_number`, oldest first
    async fn recent_chapters(
        &self,
        novel_id: &str,
        chapter_number: u32,
        window: usize,
    ) -> Result<Vec<ChapterText>, ToolError>;

    /// Running summary of the story so far
    async fn core_narrative(&self, novel_id: &str) -> Result<Option<String>, ToolError>;

    async fn character_profiles(&self, novel_id: &str) -> Result<Vec<CharacterProfile>, ToolError>;
}

/// Content held in memory, keyed by novel. Used by tests and the CLI.
#[derive(Debug, Default, Clone)]
pub struct InMemoryContentSource {
    outlines: HashMap<String, String>,
    blueprints: HashMap<String, Value>,
    chapters: HashMap<String, Vec<ChapterText>>,
    core: HashMap<String, String>,
    profiles: HashMap<String, Vec<CharacterProfile>>,
}

impl InMemoryContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outline(mut self, novel_id: impl Into<String>, outline: impl Into<String>) -> Self {
        self.outlines.insert(novel_id.into(), outline.into());
        self
    }

    pub fn with_blueprint(mut self, novel_id: impl Into<String>, blueprint: Value) -> Self {
        self.blueprints.insert(novel_id.into(), blueprint);
        self
    }

    pub fn with_chapter(mut self, novel_id: impl Into<String>, chapter: ChapterText) -> Self {
        let chapters = self.chapters.entry(novel_id.into()).or_default();
        chapters.retain(|c| c.chapter_number != chapter.chapter_number);
        chapters.push(chapter);
        chapters.sort_by_key(|c| c.chapter_number);
        self
    }

    pub fn with_core_narrative(mut self, novel_id: impl Into<String>, summary: impl Into<String>) -> Self {
        self.core.insert(novel_id.into(), summary.into());
        self
    }

    pub fn with_profile(mut self, novel_id: impl Into<String>, profile: CharacterProfile) -> Self {
        self.profiles.entry(novel_id.into()).or_default().push(profile);
        self
    }
}

#[async_trait]
impl ContentSource for InMemoryContentSource {
    async fn outline(&self, novel_id: &str) -> Result<Option<String>, ToolError> {
        Ok(self.outlines.get(novel_id).cloned())
    }

    async fn volume_blueprint(&self, novel_id: &str, _chapter_number: u32) -> Result<Option<Value>, ToolError> {
        Ok(self.blueprints.get(novel_id).cloned())
    }

    async fn recent_chapters(
        &self,
        novel_id: &str,
        chapter_number: u32,
        window: usize,
    ) -> Result<Vec<ChapterText>, ToolError> {
        let earlier: Vec<&ChapterText> = self
            .chapters
            .get(novel_id)
            .map(|all| all.iter().filter(|c| c.chapter_number < chapter_number).collect())
            .unwrap_or_default();
        let skip = earlier.len().saturating_sub(window);
        Ok(earlier.into_iter().skip(skip).cloned().collect())
    }

    async fn core_narrative(&self, novel_id: &str) -> Result<Option<String>, ToolError> {
        Ok(self.core.get(novel_id).cloned())
    }

    async fn character_profiles(&self, novel_id: &str) -> Result<Vec<CharacterProfile>, ToolError> {
        Ok(self.profiles.get(novel_id).cloned().unwrap_or_default())
    }
}
