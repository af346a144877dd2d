//! Aggregate roots.
//!
//! [`AggregateRoot`] owns every entity of one aggregate in a flat index keyed
//! by [`EntityId`]. The root itself is always present in the index, and every
//! child attached anywhere below it is registered exactly once, so any
//! descendant can be found without walking the tree. Parent and child links
//! are ids into the same index.
//!
//! An `AggregateRoot` is a value: applying an event to it yields the next
//! version, and earlier versions held elsewhere (snapshots, in-flight
//! commands) are unaffected.

use std::{collections::HashMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
    entity::{Aggregate, Entity, EntityKind, EntityRef, EntityType, KindOf, Role},
    id::{EntityId, EventId, SnapshotId},
    relationship::{RelationshipError, Relationships},
};

/// A descendant lookup failed.
///
/// Recoverable: the caller referred to a stale or mistyped entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("id [{0}] is not a valid entity identifier")]
    InvalidEntityId(EntityId),
    #[error(
        "entity [{id}] is expected to be of type `{expected}`, but is actually of type `{actual}`"
    )]
    InvalidObjectType {
        id: EntityId,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("parent links above [{0}] do not lead to the aggregate root")]
    BrokenParentChain(EntityId),
}

/// Error from structural operations on an aggregate tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityError {
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(transparent)]
    Relationship(#[from] RelationshipError),
    #[error("entity [{0}] is already registered in this aggregate")]
    DuplicateId(EntityId),
}

/// One version of an aggregate: the root entity, every descendant, and the
/// bookkeeping needed for snapshotting.
pub struct AggregateRoot<A: Aggregate> {
    id: EntityId,
    snapshot_id: SnapshotId,
    snapshot_interval: u64,
    relationships: Arc<Relationships<KindOf<A>>>,
    descendants: HashMap<EntityId, Entity<A::Entity>>,
}

impl<A: Aggregate> AggregateRoot<A> {
    pub(crate) fn new(
        id: EntityId,
        created_by: EventId,
        at: DateTime<Utc>,
        body: A,
        snapshot_interval: u64,
        relationships: Arc<Relationships<KindOf<A>>>,
    ) -> Self {
        let root = Entity::new(id, None, created_by, at, body.into_entity());
        Self {
            id,
            snapshot_id: SnapshotId::for_version(id, 1),
            snapshot_interval,
            relationships,
            descendants: HashMap::from([(id, root)]),
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }

    /// Version of the whole aggregate. Bumped by exactly one for every change
    /// anywhere in the tree.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.entity().version()
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.entity().created_at()
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.entity().updated_at()
    }

    /// The event that created this aggregate.
    #[must_use]
    pub fn created_by(&self) -> EventId {
        self.entity().created_by()
    }

    /// The most recent snapshot this version descends from.
    #[must_use]
    pub const fn snapshot_id(&self) -> SnapshotId {
        self.snapshot_id
    }

    /// `0` snapshots on every change; `n` on every version divisible by `n`.
    #[must_use]
    pub const fn snapshot_interval(&self) -> u64 {
        self.snapshot_interval
    }

    #[must_use]
    pub fn relationships(&self) -> &Relationships<KindOf<A>> {
        &self.relationships
    }

    /// The root entity node.
    #[must_use]
    pub fn entity(&self) -> &Entity<A::Entity> {
        self.descendants
            .get(&self.id)
            .unwrap_or_else(|| unreachable!("`{}` aggregate lost its root entity", A::KIND))
    }

    /// The root payload.
    #[must_use]
    pub fn body(&self) -> &A {
        let entity = self.entity();
        A::from_entity(entity.body()).unwrap_or_else(|| {
            unreachable!(
                "root of `{}` aggregate holds a `{}`",
                A::KIND,
                entity.kind().name()
            )
        })
    }

    pub(crate) fn body_mut(&mut self) -> &mut A {
        let entity = self
            .descendants
            .get_mut(&self.id)
            .unwrap_or_else(|| unreachable!("`{}` aggregate lost its root entity", A::KIND));
        A::from_entity_mut(entity.body_mut())
            .unwrap_or_else(|| unreachable!("root of `{}` aggregate holds a child", A::KIND))
    }

    pub(crate) const fn set_snapshot_id(&mut self, snapshot_id: SnapshotId) {
        self.snapshot_id = snapshot_id;
    }

    /// Look up any entity of this aggregate, the root included.
    #[must_use]
    pub fn descendant(&self, id: EntityId) -> Option<&Entity<A::Entity>> {
        self.descendants.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.descendants.contains_key(&id)
    }

    /// Number of entities in the index, the root included.
    #[must_use]
    pub fn descendant_count(&self) -> usize {
        self.descendants.len()
    }

    pub fn descendant_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.descendants.keys().copied()
    }

    pub fn descendants(&self) -> impl Iterator<Item = &Entity<A::Entity>> {
        self.descendants.values()
    }

    /// Typed lookup of any entity of this aggregate.
    ///
    /// # Errors
    ///
    /// [`LookupError::InvalidEntityId`] if nothing is registered under `id`,
    /// [`LookupError::InvalidObjectType`] if the entity is not a `T`.
    pub fn get_descendant<T>(&self, id: EntityId) -> Result<EntityRef<'_, A::Entity, T>, LookupError>
    where
        T: EntityType<A::Entity>,
    {
        let entity = self
            .descendants
            .get(&id)
            .ok_or(LookupError::InvalidEntityId(id))?;
        let body = T::peek(entity.body()).ok_or_else(|| LookupError::InvalidObjectType {
            id,
            expected: T::ENTITY_KIND.name(),
            actual: entity.kind().name(),
        })?;
        Ok(EntityRef::new(entity, body))
    }

    pub(crate) fn get_descendant_mut<T>(&mut self, id: EntityId) -> Result<&mut T, LookupError>
    where
        T: EntityType<A::Entity>,
    {
        let entity = self
            .descendants
            .get_mut(&id)
            .ok_or(LookupError::InvalidEntityId(id))?;
        let actual = entity.kind();
        T::peek_mut(entity.body_mut()).ok_or_else(|| LookupError::InvalidObjectType {
            id,
            expected: T::ENTITY_KIND.name(),
            actual: actual.name(),
        })
    }

    pub(crate) fn descendant_body_mut(&mut self, id: EntityId) -> Result<&mut A::Entity, LookupError> {
        self.descendants
            .get_mut(&id)
            .map(Entity::body_mut)
            .ok_or(LookupError::InvalidEntityId(id))
    }

    /// Resolve the root above `id` by following parent links.
    ///
    /// # Errors
    ///
    /// [`LookupError::InvalidEntityId`] if `id` (or a link on the way up) is
    /// not registered, [`LookupError::BrokenParentChain`] if the links cycle.
    pub fn root_of(&self, id: EntityId) -> Result<EntityId, LookupError> {
        let mut current = self
            .descendants
            .get(&id)
            .ok_or(LookupError::InvalidEntityId(id))?;
        // a well-formed chain is never longer than the index
        for _ in 0..self.descendants.len() {
            match current.parent() {
                None => return Ok(current.id()),
                Some(parent) => {
                    current = self
                        .descendants
                        .get(&parent)
                        .ok_or(LookupError::InvalidEntityId(parent))?;
                }
            }
        }
        Err(LookupError::BrokenParentChain(id))
    }

    /// Children held by `parent` under `role`, in attachment order.
    ///
    /// # Errors
    ///
    /// [`LookupError::InvalidEntityId`] for an unknown parent;
    /// [`RelationshipError::UndeclaredRole`] if `role` is not declared for the
    /// parent's kind.
    pub fn children(
        &self,
        parent: EntityId,
        role: &Role,
    ) -> Result<Vec<&Entity<A::Entity>>, EntityError> {
        let parent = self
            .descendants
            .get(&parent)
            .ok_or(LookupError::InvalidEntityId(parent))?;
        self.relationships.declared_child(parent.kind(), role)?;
        Ok(parent
            .child_ids(role)
            .iter()
            .filter_map(|id| self.descendants.get(id))
            .collect())
    }

    /// Children held by `parent` under `role` that satisfy `predicate`.
    ///
    /// Every child is checked against the role's declared kind before the
    /// predicate runs.
    ///
    /// # Errors
    ///
    /// As [`children`](Self::children), plus [`RelationshipError::KindMismatch`]
    /// if `T` is not the declared child kind of `role` or a stored child
    /// disagrees with it.
    pub fn find_children<T, F>(
        &self,
        parent: EntityId,
        role: &Role,
        predicate: F,
    ) -> Result<Vec<EntityRef<'_, A::Entity, T>>, EntityError>
    where
        T: EntityType<A::Entity>,
        F: Fn(&T) -> bool,
    {
        let parent = self
            .descendants
            .get(&parent)
            .ok_or(LookupError::InvalidEntityId(parent))?;
        let parent_kind = parent.kind();
        let declared = self.relationships.declared_child(parent_kind, role)?;
        let mismatch = |actual: KindOf<A>| RelationshipError::KindMismatch {
            parent: parent_kind.name(),
            role: role.clone(),
            declared: declared.name(),
            actual: actual.name(),
        };

        if T::ENTITY_KIND != declared {
            return Err(mismatch(T::ENTITY_KIND).into());
        }

        let mut found = Vec::new();
        for child in parent.child_ids(role).iter().filter_map(|id| self.descendants.get(id)) {
            if child.kind() != declared {
                return Err(mismatch(child.kind()).into());
            }
            let body = T::peek(child.body()).ok_or_else(|| mismatch(child.kind()))?;
            if predicate(body) {
                found.push(EntityRef::new(child, body));
            }
        }
        Ok(found)
    }

    /// Record a change to `id`: bump its version and that of every ancestor
    /// up to the root, by exactly one each.
    pub(crate) fn mutate(&mut self, id: EntityId, at: DateTime<Utc>) -> Result<(), LookupError> {
        if !self.descendants.contains_key(&id) {
            return Err(LookupError::InvalidEntityId(id));
        }
        let mut current = Some(id);
        for _ in 0..self.descendants.len() {
            let Some(next) = current else {
                return Ok(());
            };
            let entity = self
                .descendants
                .get_mut(&next)
                .ok_or(LookupError::InvalidEntityId(next))?;
            entity.evolve(at);
            current = entity.parent();
        }
        match current {
            None => Ok(()),
            Some(_) => Err(LookupError::BrokenParentChain(id)),
        }
    }

    /// Attach `child` to `parent` under `role`, register it in the index, and
    /// record the change on `parent`.
    pub(crate) fn add_child(
        &mut self,
        parent: EntityId,
        role: Role,
        mut child: Entity<A::Entity>,
    ) -> Result<(), EntityError> {
        let parent_kind = self
            .descendants
            .get(&parent)
            .ok_or(LookupError::InvalidEntityId(parent))?
            .kind();
        self.relationships.check(parent_kind, child.kind(), &role)?;

        let child_id = child.id();
        if self.descendants.contains_key(&child_id) {
            return Err(EntityError::DuplicateId(child_id));
        }

        let at = child.created_at();
        child.set_parent(parent);
        self.descendants.insert(child_id, child);
        if let Some(parent) = self.descendants.get_mut(&parent) {
            parent.push_child(role, child_id);
        }
        self.mutate(parent, at)?;
        Ok(())
    }
}

impl<A: Aggregate> Clone for AggregateRoot<A> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            snapshot_id: self.snapshot_id,
            snapshot_interval: self.snapshot_interval,
            relationships: Arc::clone(&self.relationships),
            descendants: self.descendants.clone(),
        }
    }
}

// The registry is shared configuration, not state, so equality ignores it.
impl<A> PartialEq for AggregateRoot<A>
where
    A: Aggregate,
    A::Entity: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.snapshot_id == other.snapshot_id
            && self.snapshot_interval == other.snapshot_interval
            && self.descendants == other.descendants
    }
}

impl<A: Aggregate> fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("kind", &A::KIND)
            .field("id", &self.id)
            .field("version", &self.version())
            .field("snapshot_id", &self.snapshot_id)
            .field("snapshot_interval", &self.snapshot_interval)
            .field("descendants", &self.descendants.len())
            .finish()
    }
}

impl<A: Aggregate> fmt::Display for AggregateRoot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [snapshot {}, {} entities]",
            self.entity(),
            self.snapshot_id,
            self.descendants.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::fixtures::{DOCUMENTS, Home, HomeEntity, HomeKind, ISSUES, Issue, Report, home};

    fn report(inspector: &str) -> Entity<HomeEntity> {
        Entity::new(
            EntityId::new(),
            None,
            EventId::new(),
            Utc::now(),
            HomeEntity::Report(Report {
                inspector: inspector.to_string(),
            }),
        )
    }

    fn issue(description: &str) -> Entity<HomeEntity> {
        Entity::new(
            EntityId::new(),
            None,
            EventId::new(),
            Utc::now(),
            HomeEntity::Issue(Issue {
                description: description.to_string(),
            }),
        )
    }

    #[test]
    fn new_root_indexes_only_itself() {
        let root = home(3);
        assert_eq!(root.version(), 1);
        assert_eq!(root.descendant_count(), 1);
        assert!(root.contains(root.id()));
        assert_eq!(root.snapshot_id(), SnapshotId::for_version(root.id(), 1));
        assert_eq!(root.body().beds, 3);
    }

    #[test]
    fn add_child_registers_descendant_and_bumps_root() {
        let mut root = home(3);
        let child = report("alice");
        let child_id = child.id();

        root.add_child(root.id(), DOCUMENTS, child).unwrap();

        assert_eq!(root.version(), 2);
        assert_eq!(root.descendant_count(), 2);
        let found = root.get_descendant::<Report>(child_id).unwrap();
        assert_eq!(found.inspector, "alice");
        assert_eq!(found.entity().parent(), Some(root.id()));
        assert_eq!(found.version(), 1);
    }

    #[test]
    fn nested_mutation_bumps_each_ancestor_once() {
        let mut root = home(3);
        let report = report("alice");
        let report_id = report.id();
        root.add_child(root.id(), DOCUMENTS, report).unwrap();
        let issue = issue("leaking tap");
        let issue_id = issue.id();
        root.add_child(report_id, ISSUES, issue).unwrap();

        assert_eq!(root.version(), 3);
        assert_eq!(root.descendant(report_id).unwrap().version(), 2);

        root.mutate(issue_id, Utc::now() + TimeDelta::seconds(1))
            .unwrap();

        assert_eq!(root.version(), 4);
        assert_eq!(root.descendant(report_id).unwrap().version(), 3);
        assert_eq!(root.descendant(issue_id).unwrap().version(), 2);
        assert_eq!(root.root_of(issue_id).unwrap(), root.id());
    }

    #[test]
    fn cyclic_parent_links_are_reported() {
        let mut root = home(3);
        let report = report("alice");
        let report_id = report.id();
        root.add_child(root.id(), DOCUMENTS, report).unwrap();
        let root_id = root.id();
        root.descendants
            .get_mut(&root_id)
            .unwrap()
            .set_parent(report_id);

        assert_eq!(
            root.root_of(report_id).unwrap_err(),
            LookupError::BrokenParentChain(report_id)
        );
        assert_eq!(
            root.mutate(report_id, Utc::now()).unwrap_err(),
            LookupError::BrokenParentChain(report_id)
        );
    }

    #[test]
    fn undeclared_attachment_leaves_root_untouched() {
        let mut root = home(3);
        let before = root.clone();

        let err = root
            .add_child(root.id(), Role::new("bookings"), report("alice"))
            .unwrap_err();
        assert!(matches!(
            err,
            EntityError::Relationship(RelationshipError::UndeclaredRole { .. })
        ));

        // an issue may only hang off a report
        let err = root.add_child(root.id(), ISSUES, issue("x")).unwrap_err();
        assert!(err.to_string().contains("issues"));

        assert_eq!(root, before);
    }

    #[test]
    fn typed_lookup_reports_missing_and_mistyped() {
        let mut root = home(3);
        let child = report("alice");
        let child_id = child.id();
        root.add_child(root.id(), DOCUMENTS, child).unwrap();

        let missing = EntityId::new();
        assert_eq!(
            root.get_descendant::<Report>(missing).unwrap_err(),
            LookupError::InvalidEntityId(missing)
        );
        assert_eq!(
            root.get_descendant::<Issue>(child_id).unwrap_err(),
            LookupError::InvalidObjectType {
                id: child_id,
                expected: "issue",
                actual: "report",
            }
        );
        assert!(root.get_descendant::<Home>(root.id()).is_ok());
    }

    #[test]
    fn children_are_ordered_and_filterable() {
        let mut root = home(3);
        for name in ["alice", "bob", "carol"] {
            root.add_child(root.id(), DOCUMENTS, report(name)).unwrap();
        }

        let names: Vec<_> = root
            .children(root.id(), &DOCUMENTS)
            .unwrap()
            .into_iter()
            .map(|e| match e.body() {
                HomeEntity::Report(r) => r.inspector.clone(),
                other => panic!("unexpected child {other:?}"),
            })
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);

        let found = root
            .find_children::<Report, _>(root.id(), &DOCUMENTS, |r| r.inspector != "bob")
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[1].inspector, "carol");
    }

    #[test]
    fn declared_role_without_children_is_empty() {
        let root = home(3);
        assert!(root.children(root.id(), &DOCUMENTS).unwrap().is_empty());
    }

    #[test]
    fn children_of_undeclared_role_is_an_error() {
        let root = home(3);
        let err = root.children(root.id(), &Role::new("bookings")).unwrap_err();
        assert_eq!(
            err,
            EntityError::Relationship(RelationshipError::UndeclaredRole {
                parent: "home",
                role: Role::new("bookings"),
            })
        );
    }

    #[test]
    fn find_children_with_wrong_type_is_a_kind_mismatch() {
        let mut root = home(3);
        root.add_child(root.id(), DOCUMENTS, report("alice")).unwrap();

        let err = root
            .find_children::<Issue, _>(root.id(), &DOCUMENTS, |_| true)
            .unwrap_err();
        assert_eq!(
            err,
            EntityError::Relationship(RelationshipError::KindMismatch {
                parent: "home",
                role: DOCUMENTS,
                declared: "report",
                actual: "issue",
            })
        );
    }

    #[test]
    fn duplicate_child_id_is_rejected() {
        let mut root = home(3);
        let child = report("alice");
        let duplicate = child.clone();
        root.add_child(root.id(), DOCUMENTS, child).unwrap();

        let err = root.add_child(root.id(), DOCUMENTS, duplicate).unwrap_err();
        assert!(matches!(err, EntityError::DuplicateId(_)));
        assert_eq!(root.version(), 2);
    }

    #[test]
    fn clones_are_independent_versions() {
        let mut next = home(3);
        let previous = next.clone();
        next.body_mut().beds = 4;
        next.mutate(next.id(), Utc::now()).unwrap();

        assert_eq!(previous.body().beds, 3);
        assert_eq!(previous.version(), 1);
        assert_eq!(next.version(), 2);
        assert_eq!(next.entity().kind(), HomeKind::Home);
    }
}
