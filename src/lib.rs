#![doc = include_str!("../README.md")]

pub use ripl_core::{
    command,
    command::{
        Command, CommandKind, CommandRecord, Create, CreateChild, CreateChildTemplate,
        CreateTemplate, PreConditionError, Precondition, Update, UpdateChild,
        UpdateChildTemplate, UpdatePrecondition, UpdateTemplate,
    },
    entity,
    entity::{Aggregate, Entity, EntityKind, EntityRef, EntityType, KindOf, Model, Role},
    event,
    event::{ApplyError, Event, EventHeader, EventKind},
    id,
    id::{CommandId, EntityId, EventId, SnapshotId},
    orchestrator,
    orchestrator::{Orchestrator, PerformError, TargetError},
    relationship,
    relationship::{Relationship, RelationshipError, Relationships},
    root,
    root::{AggregateRoot, EntityError, LookupError},
    snapshot,
    snapshot::SnapshotPolicy,
};
#[cfg(feature = "test-util")]
pub use ripl_core::test;
// Re-export proc macro derive so consumers only depend on `ripl`.
pub use ripl_macros::Aggregate;

pub mod repository {

    pub use ripl_core::repository::{Repository, inmemory};
}
