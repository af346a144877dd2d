//! Identifier newtypes.
//!
//! Every identifier is a UUID wrapped in its own type so entity, event,
//! command and snapshot ids cannot be confused with one another.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(
    /// Identity of an entity (aggregate root or child). Immutable for the
    /// lifetime of the entity across all of its versions.
    EntityId
);
define_id!(
    /// Identity of a recorded event.
    EventId
);
define_id!(
    /// Identity of an issued command.
    CommandId
);
define_id!(
    /// Identity of a materialised aggregate snapshot.
    SnapshotId
);

impl SnapshotId {
    /// Snapshot id for an aggregate at a given version.
    ///
    /// Name-based, so the same `(aggregate, version)` pair always yields the
    /// same id. A replayed aggregate therefore carries the same snapshot id as
    /// the instance produced when the command was first performed.
    #[must_use]
    pub fn for_version(aggregate: EntityId, version: u64) -> Self {
        Self(Uuid::new_v5(aggregate.as_uuid(), &version.to_be_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_distinct() {
        assert_ne!(EntityId::new(), EntityId::new());
        assert_ne!(EventId::new(), EventId::new());
    }

    #[test]
    fn snapshot_id_is_stable_per_version() {
        let aggregate = EntityId::new();
        assert_eq!(
            SnapshotId::for_version(aggregate, 5),
            SnapshotId::for_version(aggregate, 5)
        );
        assert_ne!(
            SnapshotId::for_version(aggregate, 5),
            SnapshotId::for_version(aggregate, 6)
        );
        assert_ne!(
            SnapshotId::for_version(aggregate, 5),
            SnapshotId::for_version(EntityId::new(), 5)
        );
    }

    #[test]
    fn display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(EntityId::from_uuid(uuid).to_string(), uuid.to_string());
    }
}
