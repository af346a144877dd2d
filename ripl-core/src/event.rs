//! Events.
//!
//! An [`Event`] is the recorded fact produced by exactly one command. It
//! carries everything needed to reproduce the change: the bound constructor or
//! mutation together with its kernel or parameter. Applying an event never
//! consults the command again, so the same event can be re-applied during
//! replay and yields the same aggregate.

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    entity::{Aggregate, Entity, KindOf, Role},
    id::{CommandId, EntityId, EventId, SnapshotId},
    relationship::Relationships,
    root::{AggregateRoot, EntityError, LookupError},
    snapshot::SnapshotPolicy,
};

/// Which of the four changes an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Created,
    Updated,
    ChildCreated,
    ChildUpdated,
}

impl EventKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::ChildCreated => "child-created",
            Self::ChildUpdated => "child-updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata common to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    pub id: EventId,
    /// Stamped onto every entity the event creates or changes.
    pub timestamp: DateTime<Utc>,
    /// The command that produced this event.
    pub command_id: CommandId,
    pub aggregate_id: EntityId,
    pub kind: EventKind,
    /// Aggregate version after the event is applied.
    pub version: u64,
}

impl EventHeader {
    pub(crate) fn new(
        command_id: CommandId,
        aggregate_id: EntityId,
        kind: EventKind,
        version: u64,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            command_id,
            aggregate_id,
            kind,
            version,
        }
    }
}

pub(crate) type Build<T> = Arc<dyn Fn(&EventHeader) -> T + Send + Sync>;
pub(crate) type Change<T> = Arc<dyn Fn(&mut T) + Send + Sync>;
pub(crate) type ChildChange<A> =
    Arc<dyn Fn(&mut AggregateRoot<A>) -> Result<(), LookupError> + Send + Sync>;

pub(crate) enum Payload<A: Aggregate> {
    Created {
        relationships: Arc<Relationships<KindOf<A>>>,
        build: Build<A>,
    },
    Updated {
        change: Change<A>,
    },
    ChildCreated {
        parent: EntityId,
        role: Role,
        child: EntityId,
        build: Build<A::Entity>,
    },
    ChildUpdated {
        child: EntityId,
        change: ChildChange<A>,
    },
}

impl<A: Aggregate> Clone for Payload<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Created {
                relationships,
                build,
            } => Self::Created {
                relationships: Arc::clone(relationships),
                build: Arc::clone(build),
            },
            Self::Updated { change } => Self::Updated {
                change: Arc::clone(change),
            },
            Self::ChildCreated {
                parent,
                role,
                child,
                build,
            } => Self::ChildCreated {
                parent: *parent,
                role: role.clone(),
                child: *child,
                build: Arc::clone(build),
            },
            Self::ChildUpdated { child, change } => Self::ChildUpdated {
                child: *child,
                change: Arc::clone(change),
            },
        }
    }
}

/// Applying an event to a target it was not derived for.
///
/// Indicates a defect in the caller or a corrupted event log.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    #[error("creation event {event} cannot be applied to existing aggregate {existing}")]
    UnexpectedTarget { event: EventId, existing: EntityId },
    #[error("`{kind}` event {event} requires an existing aggregate")]
    MissingTarget { event: EventId, kind: EventKind },
    #[error("event {event} belongs to aggregate {expected}, not {actual}")]
    WrongAggregate {
        event: EventId,
        expected: EntityId,
        actual: EntityId,
    },
    #[error("event {event} produces version {expected}, but the target would become version {actual}")]
    VersionMismatch {
        event: EventId,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    Entity(#[from] EntityError),
}

impl From<LookupError> for ApplyError {
    fn from(err: LookupError) -> Self {
        Self::Entity(err.into())
    }
}

/// A recorded change to one aggregate.
pub struct Event<A: Aggregate> {
    header: EventHeader,
    snapshot_interval: u64,
    payload: Payload<A>,
}

impl<A: Aggregate> Event<A> {
    pub(crate) const fn new(header: EventHeader, snapshot_interval: u64, payload: Payload<A>) -> Self {
        Self {
            header,
            snapshot_interval,
            payload,
        }
    }

    #[must_use]
    pub const fn header(&self) -> &EventHeader {
        &self.header
    }

    #[must_use]
    pub const fn id(&self) -> EventId {
        self.header.id
    }

    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.header.kind
    }

    #[must_use]
    pub const fn aggregate_id(&self) -> EntityId {
        self.header.aggregate_id
    }

    #[must_use]
    pub const fn command_id(&self) -> CommandId {
        self.header.command_id
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    /// Aggregate version once this event is applied.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.header.version
    }

    #[must_use]
    pub const fn snapshot_interval(&self) -> u64 {
        self.snapshot_interval
    }

    /// The entity this event creates or changes.
    #[must_use]
    pub const fn subject(&self) -> EntityId {
        match &self.payload {
            Payload::Created { .. } | Payload::Updated { .. } => self.header.aggregate_id,
            Payload::ChildCreated { child, .. } | Payload::ChildUpdated { child, .. } => *child,
        }
    }

    /// Whether the aggregate produced by this event must be snapshotted.
    ///
    /// Creation always snapshots; otherwise the aggregate's snapshot interval
    /// decides.
    #[must_use]
    pub const fn requires_snapshot(&self) -> bool {
        matches!(self.payload, Payload::Created { .. })
            || SnapshotPolicy::from_interval(self.snapshot_interval)
                .should_snapshot(self.header.version)
    }

    /// Apply this event, producing the next version of the aggregate.
    ///
    /// A creation event takes no target; every other event takes the
    /// aggregate version it was derived from. `target` is consumed, so callers
    /// that need the previous version keep their own clone.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the target does not match the event or the
    /// change violates the aggregate's structure.
    pub fn apply(&self, target: Option<AggregateRoot<A>>) -> Result<AggregateRoot<A>, ApplyError> {
        let at = self.header.timestamp;
        let mut root = match (&self.payload, target) {
            (
                Payload::Created {
                    relationships,
                    build,
                },
                None,
            ) => AggregateRoot::new(
                self.header.aggregate_id,
                self.header.id,
                at,
                build(&self.header),
                self.snapshot_interval,
                Arc::clone(relationships),
            ),
            (Payload::Created { .. }, Some(existing)) => {
                return Err(ApplyError::UnexpectedTarget {
                    event: self.header.id,
                    existing: existing.id(),
                });
            }
            (_, None) => {
                return Err(ApplyError::MissingTarget {
                    event: self.header.id,
                    kind: self.header.kind,
                });
            }
            (Payload::Updated { change }, Some(mut root)) => {
                self.check_base(&root)?;
                change(root.body_mut());
                let id = root.id();
                root.mutate(id, at)?;
                root
            }
            (
                Payload::ChildCreated {
                    parent,
                    role,
                    child,
                    build,
                },
                Some(mut root),
            ) => {
                self.check_base(&root)?;
                let entity = Entity::new(*child, None, self.header.id, at, build(&self.header));
                root.add_child(*parent, role.clone(), entity)?;
                root
            }
            (Payload::ChildUpdated { child, change }, Some(mut root)) => {
                self.check_base(&root)?;
                change(&mut root)?;
                root.mutate(*child, at)?;
                root
            }
        };

        if root.version() != self.header.version {
            return Err(ApplyError::VersionMismatch {
                event: self.header.id,
                expected: self.header.version,
                actual: root.version(),
            });
        }
        if self.requires_snapshot() {
            root.set_snapshot_id(SnapshotId::for_version(root.id(), root.version()));
        }
        tracing::trace!(
            event = %self.header.id,
            kind = %self.header.kind,
            aggregate = %root.id(),
            version = root.version(),
            "event applied"
        );
        Ok(root)
    }

    fn check_base(&self, root: &AggregateRoot<A>) -> Result<(), ApplyError> {
        if root.id() != self.header.aggregate_id {
            return Err(ApplyError::WrongAggregate {
                event: self.header.id,
                expected: self.header.aggregate_id,
                actual: root.id(),
            });
        }
        if root.version() + 1 != self.header.version {
            return Err(ApplyError::VersionMismatch {
                event: self.header.id,
                expected: self.header.version,
                actual: root.version() + 1,
            });
        }
        Ok(())
    }
}

impl<A: Aggregate> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            header: self.header.clone(),
            snapshot_interval: self.snapshot_interval,
            payload: self.payload.clone(),
        }
    }
}

impl<A: Aggregate> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("aggregate", &A::KIND)
            .field("header", &self.header)
            .field("subject", &self.subject())
            .field("snapshot_interval", &self.snapshot_interval)
            .finish_non_exhaustive()
    }
}
