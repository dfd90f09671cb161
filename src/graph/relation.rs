//! Relation edges between narrative entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Common relation types written by the extractor
pub mod relation_type {
    /// Causal link between two events
    pub const CAUSES: &str = "CAUSES";
    /// Fallback for a character relationship without a named type
    pub const RELATES_TO: &str = "RELATES_TO";
    /// Character took part in an event
    pub const PARTICIPATES_IN: &str = "PARTICIPATES_IN";
    /// Event advances a plotline
    pub const ADVANCES: &str = "ADVANCES";
}

/// A directed edge between two entities, stamped with the chapter that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphRelation {
    pub id: String,
    pub novel_id: String,
    pub chapter_number: u32,
    pub from_id: String,
    pub relation_type: String,
    pub to_id: String,
    #[serde(default)]
    pub properties: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl GraphRelation {
    pub fn new(
        novel_id: impl Into<String>,
        chapter_number: u32,
        from_id: impl Into<String>,
        relation_type: impl Into<String>,
        to_id: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("rel-{}", Uuid::new_v4().simple()),
            novel_id: novel_id.into(),
            chapter_number,
            from_id: from_id.into(),
            relation_type: relation_type.into(),
            to_id: to_id.into(),
            properties: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_properties(mut self, properties: HashMap<String, Value>) -> Self {
        self.properties = properties;
        self
    }

    /// True when either endpoint is the given entity
    pub fn touches(&self, entity_id: &str) -> bool {
        self.from_id == entity_id || self.to_id == entity_id
    }

    /// The endpoint opposite to `entity_id`, if this relation touches it
    pub fn other_end(&self, entity_id: &str) -> Option<&str> {
        if self.from_id == entity_id {
            Some(&self.to_id)
        } else if self.to_id == entity_id {
            Some(&self.from_id)
        } else {
            None
        }
    }
}
