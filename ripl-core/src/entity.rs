//! Entity model primitives.
//!
//! An aggregate is a tree of entities. Every entity payload type belongs to a
//! single aggregate *model*: a sum type over all payloads that may appear in
//! that aggregate, discriminated by an [`EntityKind`]. The
//! `#[derive(Aggregate)]` macro generates the model and kind enums from the
//! root type and its child types.
//!
//! Entities are stored by the aggregate root in a flat arena keyed by
//! [`EntityId`]; parents refer to children (and children to their parent) by
//! id only.

use std::{borrow::Cow, collections::BTreeMap, fmt, hash::Hash, ops::Deref};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EntityId, EventId};

/// Discriminant naming each entity type of one aggregate model.
///
/// Relationship declarations are keyed by kinds rather than by runtime type
/// information, so the registry can validate attachments up front.
pub trait EntityKind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static {
    /// Kebab-case type name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Whether this kind is the aggregate root. Root kinds can only ever act
    /// as parents, never as children.
    fn is_root(&self) -> bool;
}

/// Sum type over every entity payload of one aggregate.
pub trait Model: Clone + Send + Sync + 'static {
    type Kind: EntityKind;

    fn kind(&self) -> Self::Kind;
}

/// A concrete entity payload that is one variant of the model `M`.
pub trait EntityType<M: Model>: Sized + Send + Sync + 'static {
    const ENTITY_KIND: M::Kind;

    fn wrap(self) -> M;

    fn peek(model: &M) -> Option<&Self>;

    fn peek_mut(model: &mut M) -> Option<&mut Self>;
}

/// The payload type at the top of an aggregate.
///
/// Implemented by the `#[derive(Aggregate)]` macro together with
/// [`EntityType`] for the root and every declared child type.
pub trait Aggregate: Clone + Send + Sync + 'static {
    /// Aggregate type identifier, lowercase kebab-case (`"holiday-home"`).
    const KIND: &'static str;

    /// The model (entity sum type) of this aggregate.
    type Entity: Model;

    /// Kind of the root entity.
    const ROOT_KIND: <Self::Entity as Model>::Kind;

    fn into_entity(self) -> Self::Entity;

    fn from_entity(entity: &Self::Entity) -> Option<&Self>;

    fn from_entity_mut(entity: &mut Self::Entity) -> Option<&mut Self>;
}

/// Entity kind of the aggregate `A`.
pub type KindOf<A> = <<A as Aggregate>::Entity as Model>::Kind;

/// Name distinguishing one parent-child relationship from another.
///
/// Prefer nouns (`"owner"`, `"insured-driver"`) over verbs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Role {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Role {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node of an aggregate tree.
///
/// Holds identity, versioning and timestamps, a parent link (absent for the
/// root), the id of the event that created it, and its children grouped by
/// role in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity<M> {
    id: EntityId,
    version: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    parent: Option<EntityId>,
    created_by: EventId,
    children: BTreeMap<Role, Vec<EntityId>>,
    body: M,
}

impl<M> Entity<M> {
    pub(crate) const fn new(
        id: EntityId,
        parent: Option<EntityId>,
        created_by: EventId,
        at: DateTime<Utc>,
        body: M,
    ) -> Self {
        Self {
            id,
            version: 1,
            created_at: at,
            updated_at: at,
            parent,
            created_by,
            children: BTreeMap::new(),
            body,
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Immediate parent, or `None` for the aggregate root.
    #[must_use]
    pub const fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    /// The event whose application created this entity.
    #[must_use]
    pub const fn created_by(&self) -> EventId {
        self.created_by
    }

    #[must_use]
    pub const fn body(&self) -> &M {
        &self.body
    }

    /// Ids of the children held under `role`, in attachment order.
    #[must_use]
    pub fn child_ids(&self, role: &Role) -> &[EntityId] {
        self.children.get(role).map_or(&[], Vec::as_slice)
    }

    /// Roles under which this entity currently holds at least one child.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.children.keys()
    }

    /// Role under which `child` is held, if it is a direct child.
    #[must_use]
    pub fn role_of(&self, child: EntityId) -> Option<&Role> {
        self.children
            .iter()
            .find_map(|(role, ids)| ids.contains(&child).then_some(role))
    }

    pub(crate) fn body_mut(&mut self) -> &mut M {
        &mut self.body
    }

    pub(crate) fn set_parent(&mut self, parent: EntityId) {
        self.parent = Some(parent);
    }

    pub(crate) fn push_child(&mut self, role: Role, child: EntityId) {
        self.children.entry(role).or_default().push(child);
    }

    /// Advance the version by one and stamp the update time.
    ///
    /// `updated_at` never moves backwards, even if `at` is older than the
    /// previous stamp.
    pub(crate) fn evolve(&mut self, at: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = self.updated_at.max(at);
    }
}

impl<M: Model> Entity<M> {
    #[must_use]
    pub fn kind(&self) -> M::Kind {
        self.body.kind()
    }
}

impl<M: Model> fmt::Display for Entity<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} v{} (created {}, updated {})",
            self.kind().name(),
            self.id,
            self.version,
            self.created_at.to_rfc3339(),
            self.updated_at.to_rfc3339(),
        )
    }
}

/// Typed view of an entity: its metadata plus its payload as `T`.
///
/// Dereferences to the payload.
pub struct EntityRef<'a, M, T> {
    entity: &'a Entity<M>,
    body: &'a T,
}

impl<'a, M, T> EntityRef<'a, M, T> {
    pub(crate) const fn new(entity: &'a Entity<M>, body: &'a T) -> Self {
        Self { entity, body }
    }

    #[must_use]
    pub const fn entity(&self) -> &'a Entity<M> {
        self.entity
    }

    #[must_use]
    pub const fn body(&self) -> &'a T {
        self.body
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.entity.id()
    }

    #[must_use]
    pub const fn version(&self) -> u64 {
        self.entity.version()
    }
}

impl<M, T> Clone for EntityRef<'_, M, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M, T> Copy for EntityRef<'_, M, T> {}

impl<M, T> Deref for EntityRef<'_, M, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.body
    }
}

impl<M: fmt::Debug, T: fmt::Debug> fmt::Debug for EntityRef<'_, M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("id", &self.entity.id())
            .field("version", &self.entity.version())
            .field("body", self.body)
            .finish()
    }
}
