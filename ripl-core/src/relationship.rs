//! Parent-child relationship registry.
//!
//! Each aggregate type owns one [`Relationships`] registry declaring which
//! `(parent kind, child kind, role)` triples are legal. Commands consult it
//! before any event is produced, and the aggregate root consults it again
//! when a child is attached, so the event log never records a structurally
//! invalid fact.

use std::collections::HashMap;

use thiserror::Error;

use crate::entity::{EntityKind, Role};

/// Defect in relationship declarations or in their use.
///
/// These indicate a bug in the registering or calling code, not bad user
/// input, and should not be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelationshipError {
    /// The child side of a relationship names the aggregate root.
    #[error("`{child}` is an aggregate root and cannot be declared as a child of `{parent}`")]
    RootAsChild {
        parent: &'static str,
        child: &'static str,
    },
    /// The role is already declared for this parent kind.
    #[error("role `{role}` is already declared for parent `{parent}` (child `{existing}`)")]
    DuplicateRole {
        parent: &'static str,
        role: Role,
        existing: &'static str,
    },
    /// Role names must not be empty.
    #[error("empty role declared for parent `{parent}`")]
    EmptyRole { parent: &'static str },
    /// No relationship with this role is declared for the parent kind.
    #[error("role `{role}` does not identify a relationship of `{parent}`")]
    UndeclaredRole { parent: &'static str, role: Role },
    /// The role exists but is declared for a different child kind.
    #[error("`{child}` cannot be a child of `{parent}` as `{role}`")]
    NotAllowed {
        parent: &'static str,
        child: &'static str,
        role: Role,
    },
    /// A stored or requested child disagrees with the role's declared kind.
    #[error("role `{role}` of `{parent}` holds `{declared}`, found `{actual}`")]
    KindMismatch {
        parent: &'static str,
        role: Role,
        declared: &'static str,
        actual: &'static str,
    },
}

/// A declared `(role, parent kind, child kind)` triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship<K> {
    pub role: Role,
    pub parent: K,
    pub child: K,
}

/// Registry of the relationships legal within one aggregate type.
#[derive(Debug, Clone)]
pub struct Relationships<K> {
    declared: HashMap<(K, Role), K>,
}

impl<K: EntityKind> Default for Relationships<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityKind> Relationships<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            declared: HashMap::new(),
        }
    }

    /// Declare that `child` may be attached to `parent` under `role`.
    ///
    /// `parent` and `child` may be the same kind (a recursive relationship),
    /// and the same two kinds may be related under several roles.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::RootAsChild`] if `child` is the root kind,
    /// [`RelationshipError::EmptyRole`] for an empty role, and
    /// [`RelationshipError::DuplicateRole`] if `role` is already declared
    /// for `parent`.
    pub fn allow(
        &mut self,
        parent: K,
        child: K,
        role: impl Into<Role>,
    ) -> Result<&mut Self, RelationshipError> {
        let role = role.into();
        if child.is_root() {
            return Err(RelationshipError::RootAsChild {
                parent: parent.name(),
                child: child.name(),
            });
        }
        if role.as_str().is_empty() {
            return Err(RelationshipError::EmptyRole {
                parent: parent.name(),
            });
        }
        if let Some(existing) = self.declared.get(&(parent, role.clone())) {
            return Err(RelationshipError::DuplicateRole {
                parent: parent.name(),
                role,
                existing: existing.name(),
            });
        }
        tracing::trace!(
            parent = parent.name(),
            child = child.name(),
            %role,
            "relationship declared"
        );
        self.declared.insert((parent, role), child);
        Ok(self)
    }

    /// Builder form of [`allow`](Self::allow).
    ///
    /// # Errors
    ///
    /// Same as [`allow`](Self::allow).
    pub fn with(
        mut self,
        parent: K,
        child: K,
        role: impl Into<Role>,
    ) -> Result<Self, RelationshipError> {
        self.allow(parent, child, role)?;
        Ok(self)
    }

    #[must_use]
    pub fn is_allowed(&self, parent: K, child: K, role: &Role) -> bool {
        self.declared
            .get(&(parent, role.clone()))
            .is_some_and(|declared| *declared == child)
    }

    /// The child kind declared for `role` under `parent`, if any.
    #[must_use]
    pub fn child_kind(&self, parent: K, role: &Role) -> Option<K> {
        self.declared.get(&(parent, role.clone())).copied()
    }

    /// Like [`child_kind`](Self::child_kind) but reports an undeclared role.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::UndeclaredRole`] if `role` is not declared
    /// for `parent`.
    pub fn declared_child(&self, parent: K, role: &Role) -> Result<K, RelationshipError> {
        self.child_kind(parent, role)
            .ok_or_else(|| RelationshipError::UndeclaredRole {
                parent: parent.name(),
                role: role.clone(),
            })
    }

    /// Validate an attachment of `child` to `parent` under `role`.
    ///
    /// # Errors
    ///
    /// Returns [`RelationshipError::UndeclaredRole`] or
    /// [`RelationshipError::NotAllowed`].
    pub fn check(&self, parent: K, child: K, role: &Role) -> Result<(), RelationshipError> {
        let declared = self.declared_child(parent, role)?;
        if declared == child {
            Ok(())
        } else {
            Err(RelationshipError::NotAllowed {
                parent: parent.name(),
                child: child.name(),
                role: role.clone(),
            })
        }
    }

    /// All declared relationships, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = Relationship<K>> + '_ {
        self.declared
            .iter()
            .map(|((parent, role), child)| Relationship {
                role: role.clone(),
                parent: *parent,
                child: *child,
            })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }
}
