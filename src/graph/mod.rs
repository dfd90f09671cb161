//! Core narrative data structures

mod entity;
mod ledger;
mod relation;

pub use entity::{
    EntityData, EntityKind, ExtraFields, ForeshadowStatus, GraphEntity, ImportanceTier,
    PlotlineStatus,
};
pub use ledger::{
    CharacterPair, CharacterState, CharacterStateDelta, LedgerKind, LedgerRecord, LedgerRow,
    OpenQuest, QuestStatus, RelationshipDelta, RelationshipState, UpsertOutcome,
};
pub use relation::{relation_type, GraphRelation};
