//! Versioned state ledgers: character, relationship and quest state
//!
//! Every ledger record carries `last_updated_chapter`. Writes are guarded so a
//! chapter never overwrites state written by a later chapter, and every
//! overwrite first pushes the prior value into a history list so a chapter
//! rewrite can roll back to it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which ledger a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    Character,
    Relationship,
    Quest,
}

impl LedgerKind {
    pub const ALL: [LedgerKind; 3] = [Self::Character, Self::Relationship, Self::Quest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Relationship => "relationship",
            Self::Quest => "quest",
        }
    }
}

impl std::str::FromStr for LedgerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "relationship" => Ok(Self::Relationship),
            "quest" => Ok(Self::Quest),
            other => Err(format!("unknown ledger kind: {}", other)),
        }
    }
}

/// Storage-level form of a ledger record or history snapshot.
///
/// For current records `chapter` mirrors `last_updated_chapter`; for history
/// snapshots it is the chapter at which the snapshot was valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub kind: LedgerKind,
    pub novel_id: String,
    pub key: String,
    pub chapter: u32,
    pub payload: Value,
}

/// A typed ledger record
pub trait LedgerRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    const KIND: LedgerKind;

    /// Identity within the novel
    fn key(&self) -> String;

    fn novel_id(&self) -> &str;

    fn last_updated_chapter(&self) -> u32;

    fn to_row(&self) -> Result<LedgerRow, serde_json::Error> {
        Ok(LedgerRow {
            kind: Self::KIND,
            novel_id: self.novel_id().to_string(),
            key: self.key(),
            chapter: self.last_updated_chapter(),
            payload: serde_json::to_value(self)?,
        })
    }

    fn from_row(row: &LedgerRow) -> Result<Self, serde_json::Error> {
        serde_json::from_value(row.payload.clone())
    }
}

/// Result of a guarded ledger write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No prior record existed
    Created,
    /// Prior record was snapshotted and replaced
    Updated,
    /// Rejected: the record was last written by a later chapter
    Stale { last_updated_chapter: u32 },
}

impl UpsertOutcome {
    pub fn applied(&self) -> bool {
        !matches!(self, Self::Stale { .. })
    }
}

// ---------------------------------------------------------------------------
// Character state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    pub novel_id: String,
    pub character_name: String,
    #[serde(default)]
    pub location: Option<String>,
    /// Cultivation realm / rank / level
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default = "default_alive")]
    pub alive: bool,
    #[serde(default)]
    pub inventory: Vec<String>,
    #[serde(default)]
    pub affiliation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub secrets: Vec<String>,
    pub last_updated_chapter: u32,
}

fn default_alive() -> bool {
    true
}

impl CharacterState {
    pub fn new(novel_id: impl Into<String>, character_name: impl Into<String>, chapter: u32) -> Self {
        Self {
            novel_id: novel_id.into(),
            character_name: character_name.into(),
            location: None,
            realm: None,
            alive: true,
            inventory: Vec::new(),
            affiliation: None,
            tags: Vec::new(),
            secrets: Vec::new(),
            last_updated_chapter: chapter,
        }
    }

    /// Produce the state after applying `delta` at `chapter`
    pub fn apply(&self, delta: &CharacterStateDelta, chapter: u32) -> Self {
        let mut next = self.clone();
        if let Some(location) = &delta.location {
            next.location = Some(location.clone());
        }
        if let Some(realm) = &delta.realm {
            next.realm = Some(realm.clone());
        }
        if let Some(alive) = delta.alive {
            next.alive = alive;
        }
        if let Some(affiliation) = &delta.affiliation {
            next.affiliation = Some(affiliation.clone());
        }
        next.inventory.retain(|item| !delta.inventory_removed.contains(item));
        push_unique(&mut next.inventory, &delta.inventory_added);
        push_unique(&mut next.tags, &delta.tags_added);
        push_unique(&mut next.secrets, &delta.secrets_added);
        next.last_updated_chapter = chapter;
        next
    }
}

fn push_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

impl LedgerRecord for CharacterState {
    const KIND: LedgerKind = LedgerKind::Character;

    fn key(&self) -> String {
        self.character_name.clone()
    }

    fn novel_id(&self) -> &str {
        &self.novel_id
    }

    fn last_updated_chapter(&self) -> u32 {
        self.last_updated_chapter
    }
}

/// A proposed change to one character's state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterStateDelta {
    #[serde(alias = "name", alias = "character")]
    pub character_name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "rank", alias = "level")]
    pub realm: Option<String>,
    #[serde(default)]
    pub alive: Option<bool>,
    #[serde(default, alias = "itemsGained", alias = "inventory_added")]
    pub inventory_added: Vec<String>,
    #[serde(default, alias = "itemsLost", alias = "inventory_removed")]
    pub inventory_removed: Vec<String>,
    #[serde(default, alias = "faction")]
    pub affiliation: Option<String>,
    #[serde(default, alias = "tags", alias = "tags_added")]
    pub tags_added: Vec<String>,
    #[serde(default, alias = "secrets", alias = "secrets_added")]
    pub secrets_added: Vec<String>,
}

impl CharacterStateDelta {
    pub fn for_character(name: impl Into<String>) -> Self {
        Self {
            character_name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_affiliation(mut self, affiliation: impl Into<String>) -> Self {
        self.affiliation = Some(affiliation.into());
        self
    }

    pub fn with_alive(mut self, alive: bool) -> Self {
        self.alive = Some(alive);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.location.is_none()
            && self.realm.is_none()
            && self.alive.is_none()
            && self.affiliation.is_none()
            && self.inventory_added.is_empty()
            && self.inventory_removed.is_empty()
            && self.tags_added.is_empty()
            && self.secrets_added.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Relationship state
// ---------------------------------------------------------------------------

/// Canonical unordered pair of character names: `a <= b`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterPair {
    pub a: String,
    pub b: String,
}

impl CharacterPair {
    pub fn new(x: impl Into<String>, y: impl Into<String>) -> Self {
        let (x, y) = (x.into(), y.into());
        if x <= y {
            Self { a: x, b: y }
        } else {
            Self { a: y, b: x }
        }
    }

    /// Storage key; the unit separator cannot appear in a name from extraction
    pub fn key(&self) -> String {
        format!("{}\u{1f}{}", self.a, self.b)
    }

    pub fn involves(&self, name: &str) -> bool {
        self.a == name || self.b == name
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipState {
    pub novel_id: String,
    /// Lexicographically smaller name
    pub a: String,
    pub b: String,
    /// e.g. "ally", "rival", "master-disciple"
    pub kind: String,
    /// Affinity in [-1, 1]
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub description: Option<String>,
    pub last_updated_chapter: u32,
}

impl RelationshipState {
    pub fn new(novel_id: impl Into<String>, pair: CharacterPair, kind: impl Into<String>, chapter: u32) -> Self {
        Self {
            novel_id: novel_id.into(),
            a: pair.a,
            b: pair.b,
            kind: kind.into(),
            strength: 0.0,
            description: None,
            last_updated_chapter: chapter,
        }
    }

    pub fn pair(&self) -> CharacterPair {
        CharacterPair::new(self.a.clone(), self.b.clone())
    }

    pub fn apply(&self, delta: &RelationshipDelta, chapter: u32) -> Self {
        let mut next = self.clone();
        if let Some(kind) = &delta.kind {
            next.kind = kind.clone();
        }
        if let Some(strength) = delta.strength {
            next.strength = strength.clamp(-1.0, 1.0);
        }
        if let Some(description) = &delta.description {
            next.description = Some(description.clone());
        }
        next.last_updated_chapter = chapter;
        next
    }
}

impl LedgerRecord for RelationshipState {
    const KIND: LedgerKind = LedgerKind::Relationship;

    fn key(&self) -> String {
        self.pair().key()
    }

    fn novel_id(&self) -> &str {
        &self.novel_id
    }

    fn last_updated_chapter(&self) -> u32 {
        self.last_updated_chapter
    }
}

/// A proposed change to the relationship between two characters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDelta {
    #[serde(alias = "a", alias = "source")]
    pub from: String,
    #[serde(alias = "b", alias = "target")]
    pub to: String,
    #[serde(default, alias = "type", alias = "relation")]
    pub kind: Option<String>,
    #[serde(default, alias = "affinity")]
    pub strength: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RelationshipDelta {
    pub fn between(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = Some(strength);
        self
    }

    pub fn pair(&self) -> CharacterPair {
        CharacterPair::new(self.from.clone(), self.to.clone())
    }
}

// ---------------------------------------------------------------------------
// Open quests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenQuest {
    pub novel_id: String,
    pub id: String,
    pub description: String,
    pub status: QuestStatus,
    pub introduced_chapter: u32,
    #[serde(default)]
    pub due_by_chapter: Option<u32>,
    pub last_updated_chapter: u32,
}

impl OpenQuest {
    pub fn new(
        novel_id: impl Into<String>,
        id: impl Into<String>,
        description: impl Into<String>,
        chapter: u32,
    ) -> Self {
        Self {
            novel_id: novel_id.into(),
            id: id.into(),
            description: description.into(),
            status: QuestStatus::Open,
            introduced_chapter: chapter,
            due_by_chapter: None,
            last_updated_chapter: chapter,
        }
    }

    pub fn with_due_by(mut self, chapter: u32) -> Self {
        self.due_by_chapter = Some(chapter);
        self
    }

    /// True when the quest is still open past its due chapter
    pub fn is_overdue(&self, current_chapter: u32) -> bool {
        self.status == QuestStatus::Open
            && self.due_by_chapter.is_some_and(|due| current_chapter > due)
    }
}

impl LedgerRecord for OpenQuest {
    const KIND: LedgerKind = LedgerKind::Quest;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn novel_id(&self) -> &str {
        &self.novel_id
    }

    fn last_updated_chapter(&self) -> u32 {
        self.last_updated_chapter
    }
}
