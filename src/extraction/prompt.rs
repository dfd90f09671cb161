//! Extraction instruction builder

use crate::graph::{EntityData, GraphEntity, OpenQuest};
use crate::llm::ChatMessage;

const SYSTEM_PROMPT: &str = "You are a meticulous continuity editor for a serialized novel. \
Read one chapter and report the story facts it establishes. \
Respond with a single JSON object and nothing else.";

const SCHEMA: &str = r#"{
  "events": [{"id": "optional stable id", "summary": "...", "description": "...", "importance": "0-1, 0-10, or high/medium/low", "participants": ["name"], "location": "...", "plotline": "plotline name", "tags": ["..."]}],
  "foreshadows": [{"id": "id of a known foreshadow when revealing it", "content": "...", "importance": "high/medium/low", "status": "PLANTED | HINTED | REVEALED", "expectedPayoffChapter": 0}],
  "plotlines": [{"name": "...", "description": "...", "priority": 0.5, "status": "ACTIVE | DORMANT | RESOLVED"}],
  "worldRules": [{"name": "...", "description": "...", "category": "..."}],
  "characters": [{"name": "...", "role": "...", "description": "..."}],
  "locations": [{"name": "...", "description": "..."}],
  "causalRelations": [{"from": "event id or summary", "to": "event id or summary", "description": "..."}],
  "characterRelations": [{"from": "name", "to": "name", "kind": "ally/rival/...", "strength": 0.0, "description": "..."}],
  "stateDeltas": {
    "characters": [{"characterName": "...", "location": "...", "realm": "...", "alive": true, "inventoryAdded": [], "inventoryRemoved": [], "affiliation": "...", "tagsAdded": [], "secretsAdded": []}],
    "factions": [{"faction": "...", "members": ["name"]}],
    "locations": [{"character": "name", "location": "..."}],
    "questsOpened": [{"id": "...", "description": "...", "dueByChapter": 0}],
    "questsResolved": ["quest id"]
  },
  "narrativeBeat": {"beatType": "conflict | climax | plot | character | relief | setup", "summary": "...", "tags": [], "tension": 0.0},
  "conflictArcs": [{"name": "...", "stage": "...", "progress": 0, "totalBeats": 0, "urgency": 0.0, "nextAction": "...", "parties": []}],
  "characterArcs": [{"characterName": "...", "arcName": "...", "stage": "...", "progress": 0, "totalBeats": 0, "priority": 0.0, "nextAction": "..."}],
  "perspective": {"characterName": "viewpoint character", "mode": "first | third_limited | omniscient"}
}"#;

/// State already known before this chapter, offered so the model can
/// reference existing ids instead of inventing new ones
#[derive(Debug, Default)]
pub struct KnownContext<'a> {
    pub open_foreshadows: &'a [GraphEntity],
    pub open_quests: &'a [OpenQuest],
}

/// Build the single extraction call for one chapter
pub fn build_extraction_messages(
    chapter_number: u32,
    chapter_title: &str,
    content: &str,
    known: &KnownContext<'_>,
) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "Chapter {}: {}\n\nReturn JSON matching this schema. Omit sections with nothing to report.\n{}\n",
        chapter_number, chapter_title, SCHEMA
    );

    if !known.open_foreshadows.is_empty() {
        prompt.push_str("\nUnresolved foreshadows (reuse the id and set status REVEALED when paid off):\n");
        for entity in known.open_foreshadows {
            if let EntityData::Foreshadowing { content, .. } = &entity.data {
                prompt.push_str(&format!("- {} (chapter {}): {}\n", entity.id, entity.chapter_number, content));
            }
        }
    }

    if !known.open_quests.is_empty() {
        prompt.push_str("\nOpen quests (list the id under questsResolved when completed):\n");
        for quest in known.open_quests {
            prompt.push_str(&format!("- {}: {}\n", quest.id, quest.description));
        }
    }

    prompt.push_str("\n--- CHAPTER TEXT ---\n");
    prompt.push_str(content);

    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
}
