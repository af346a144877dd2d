//! Commands and command templates.
//!
//! A command is a request to change one aggregate. It is validated against
//! its preconditions and then turned into exactly one [`Event`]; the command
//! itself is discarded afterwards and only its [`CommandRecord`] is kept.
//!
//! There are four commands, one per kind of change:
//!
//! | Command          | Precondition sees       | Event applies                          |
//! |------------------|-------------------------|----------------------------------------|
//! | [`Create`]       | kernel                  | constructor builds a new root          |
//! | [`Update`]       | root payload, parameter | mutation on the root payload           |
//! | [`CreateChild`]  | kernel                  | constructor builds a child under a role |
//! | [`UpdateChild`]  | child payload, parameter| mutation on the child payload          |
//!
//! Commands are built from templates, which bind a named precondition and a
//! constructor or mutation once and are then reused with concrete inputs via
//! `using(...)`.

use std::{borrow::Cow, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{
    entity::{Aggregate, EntityType, KindOf, Role},
    event::{Build, ChildChange, Change, Event, EventHeader, EventKind, Payload},
    id::{CommandId, EntityId},
    relationship::{RelationshipError, Relationships},
    root::{AggregateRoot, LookupError},
};

/// Builds an entity payload from the event that creates it and a kernel.
pub type Constructor<T, K> = Arc<dyn Fn(&EventHeader, K) -> T + Send + Sync>;

/// Changes an entity payload using a parameter.
pub type Mutation<T, P> = Arc<dyn Fn(&mut T, &P) + Send + Sync>;

/// A command was rejected before producing an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreConditionError {
    #[error("pre-condition `{rule}` was not met")]
    RuleFailed { rule: String },
    #[error("invalid relationship: {0}")]
    Relationship(#[from] RelationshipError),
    #[error(transparent)]
    Target(#[from] LookupError),
    #[error("entity [{child}] is not held by its parent as `{expected}`")]
    RoleMismatch {
        child: EntityId,
        expected: Role,
        actual: Option<Role>,
    },
}

/// A named predicate over a kernel.
pub struct Precondition<K> {
    rule: Cow<'static, str>,
    check: Arc<dyn Fn(&K) -> bool + Send + Sync>,
}

impl<K> Precondition<K> {
    pub fn new(
        rule: impl Into<Cow<'static, str>>,
        check: impl Fn(&K) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: rule.into(),
            check: Arc::new(check),
        }
    }

    /// A precondition that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::new("always", |_| true)
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn holds(&self, kernel: &K) -> bool {
        (self.check)(kernel)
    }

    fn verify(&self, kernel: &K) -> Result<(), PreConditionError> {
        if self.holds(kernel) {
            Ok(())
        } else {
            Err(PreConditionError::RuleFailed {
                rule: self.rule.to_string(),
            })
        }
    }
}

/// A named predicate over an existing payload and an update parameter.
pub struct UpdatePrecondition<T, P> {
    rule: Cow<'static, str>,
    check: Arc<dyn Fn(&T, &P) -> bool + Send + Sync>,
}

impl<T, P> UpdatePrecondition<T, P> {
    pub fn new(
        rule: impl Into<Cow<'static, str>>,
        check: impl Fn(&T, &P) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            rule: rule.into(),
            check: Arc::new(check),
        }
    }

    /// A precondition that always holds.
    #[must_use]
    pub fn always() -> Self {
        Self::new("always", |_, _| true)
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn holds(&self, target: &T, param: &P) -> bool {
        (self.check)(target, param)
    }

    fn verify(&self, target: &T, param: &P) -> Result<(), PreConditionError> {
        if self.holds(target, param) {
            Ok(())
        } else {
            Err(PreConditionError::RuleFailed {
                rule: self.rule.to_string(),
            })
        }
    }
}

impl<K> Clone for Precondition<K> {
    fn clone(&self) -> Self {
        Self {
            rule: self.rule.clone(),
            check: Arc::clone(&self.check),
        }
    }
}

impl<T, P> Clone for UpdatePrecondition<T, P> {
    fn clone(&self) -> Self {
        Self {
            rule: self.rule.clone(),
            check: Arc::clone(&self.check),
        }
    }
}

impl<K> fmt::Debug for Precondition<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Precondition").field(&self.rule).finish()
    }
}

impl<T, P> fmt::Debug for UpdatePrecondition<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UpdatePrecondition").field(&self.rule).finish()
    }
}

/// Which of the four commands a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandKind {
    Create,
    Update,
    CreateChild,
    UpdateChild,
}

impl CommandKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::CreateChild => "create-child",
            Self::UpdateChild => "update-child",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit entry persisted for every command, accepted or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRecord {
    pub id: CommandId,
    pub kind: CommandKind,
    /// [`Aggregate::KIND`] of the target aggregate.
    pub aggregate: &'static str,
    pub aggregate_id: EntityId,
    /// The entity the command creates or changes.
    pub subject: EntityId,
    pub issued_at: DateTime<Utc>,
}

/// What the orchestrator hands to a command.
pub struct Context<'a, A: Aggregate> {
    relationships: &'a Arc<Relationships<KindOf<A>>>,
    snapshot_interval: u64,
}

impl<'a, A: Aggregate> Context<'a, A> {
    #[must_use]
    pub const fn new(relationships: &'a Arc<Relationships<KindOf<A>>>, snapshot_interval: u64) -> Self {
        Self {
            relationships,
            snapshot_interval,
        }
    }

    #[must_use]
    pub const fn relationships(&self) -> &'a Arc<Relationships<KindOf<A>>> {
        self.relationships
    }

    /// Interval given to newly created aggregates. Existing aggregates keep
    /// the interval they were created with.
    #[must_use]
    pub const fn snapshot_interval(&self) -> u64 {
        self.snapshot_interval
    }
}

/// The event derived from a command and the aggregate it applies to.
pub struct Derived<A: Aggregate> {
    pub event: Event<A>,
    /// `None` for creation.
    pub target: Option<AggregateRoot<A>>,
}

/// A request to change one aggregate.
pub trait Command<A: Aggregate>: Send {
    fn record(&self) -> CommandRecord;

    /// The existing aggregate this command changes; `None` for creation.
    fn target_id(&self) -> Option<EntityId>;

    /// Bind the command to `current`, the latest stored version of its
    /// target, so preconditions and the derived event see current state.
    fn rebase(&mut self, current: AggregateRoot<A>);

    /// Structural checks first, then the caller's predicate.
    ///
    /// # Errors
    ///
    /// Returns [`PreConditionError`] if the command must not proceed.
    fn check_preconditions(&self, ctx: &Context<'_, A>) -> Result<(), PreConditionError>;

    /// Consume the command, producing its single event.
    fn into_event(self, ctx: &Context<'_, A>) -> Derived<A>;
}

/// Create a new aggregate from a kernel.
pub struct Create<A: Aggregate, K> {
    id: CommandId,
    issued_at: DateTime<Utc>,
    aggregate_id: EntityId,
    kernel: K,
    precondition: Precondition<K>,
    constructor: Constructor<A, K>,
}

impl<A: Aggregate, K> Create<A, K> {
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Id the new aggregate will receive.
    #[must_use]
    pub const fn aggregate_id(&self) -> EntityId {
        self.aggregate_id
    }

    #[must_use]
    pub const fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<A, K> Command<A> for Create<A, K>
where
    A: Aggregate,
    K: Clone + Send + Sync + 'static,
{
    fn record(&self) -> CommandRecord {
        CommandRecord {
            id: self.id,
            kind: CommandKind::Create,
            aggregate: A::KIND,
            aggregate_id: self.aggregate_id,
            subject: self.aggregate_id,
            issued_at: self.issued_at,
        }
    }

    fn target_id(&self) -> Option<EntityId> {
        None
    }

    fn rebase(&mut self, _current: AggregateRoot<A>) {}

    fn check_preconditions(&self, _ctx: &Context<'_, A>) -> Result<(), PreConditionError> {
        self.precondition.verify(&self.kernel)
    }

    fn into_event(self, ctx: &Context<'_, A>) -> Derived<A> {
        let Self {
            id,
            aggregate_id,
            kernel,
            constructor,
            ..
        } = self;
        let build: Build<A> =
            Arc::new(move |header: &EventHeader| constructor(header, kernel.clone()));
        Derived {
            event: Event::new(
                EventHeader::new(id, aggregate_id, EventKind::Created, 1),
                ctx.snapshot_interval(),
                Payload::Created {
                    relationships: Arc::clone(ctx.relationships()),
                    build,
                },
            ),
            target: None,
        }
    }
}

/// Change the root payload of an existing aggregate.
pub struct Update<A: Aggregate, P> {
    id: CommandId,
    issued_at: DateTime<Utc>,
    target: AggregateRoot<A>,
    param: P,
    precondition: UpdatePrecondition<A, P>,
    mutation: Mutation<A, P>,
}

impl<A: Aggregate, P> Update<A, P> {
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    #[must_use]
    pub const fn target(&self) -> &AggregateRoot<A> {
        &self.target
    }

    #[must_use]
    pub const fn param(&self) -> &P {
        &self.param
    }
}

impl<A, P> Command<A> for Update<A, P>
where
    A: Aggregate,
    P: Send + Sync + 'static,
{
    fn record(&self) -> CommandRecord {
        CommandRecord {
            id: self.id,
            kind: CommandKind::Update,
            aggregate: A::KIND,
            aggregate_id: self.target.id(),
            subject: self.target.id(),
            issued_at: self.issued_at,
        }
    }

    fn target_id(&self) -> Option<EntityId> {
        Some(self.target.id())
    }

    fn rebase(&mut self, current: AggregateRoot<A>) {
        self.target = current;
    }

    fn check_preconditions(&self, _ctx: &Context<'_, A>) -> Result<(), PreConditionError> {
        self.precondition.verify(self.target.body(), &self.param)
    }

    fn into_event(self, _ctx: &Context<'_, A>) -> Derived<A> {
        let Self {
            id,
            target,
            param,
            mutation,
            ..
        } = self;
        let change: Change<A> = Arc::new(move |root: &mut A| mutation(root, &param));
        Derived {
            event: Event::new(
                EventHeader::new(id, target.id(), EventKind::Updated, target.version() + 1),
                target.snapshot_interval(),
                Payload::Updated { change },
            ),
            target: Some(target),
        }
    }
}

/// Attach a new child entity to an existing entity of the aggregate.
pub struct CreateChild<A: Aggregate, C, K> {
    id: CommandId,
    issued_at: DateTime<Utc>,
    target: AggregateRoot<A>,
    parent: EntityId,
    role: Role,
    child_id: EntityId,
    kernel: K,
    precondition: Precondition<K>,
    constructor: Constructor<C, K>,
}

impl<A: Aggregate, C, K> CreateChild<A, C, K> {
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    /// Id the new child will receive.
    #[must_use]
    pub const fn child_id(&self) -> EntityId {
        self.child_id
    }

    #[must_use]
    pub const fn parent(&self) -> EntityId {
        self.parent
    }

    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    #[must_use]
    pub const fn kernel(&self) -> &K {
        &self.kernel
    }
}

impl<A, C, K> Command<A> for CreateChild<A, C, K>
where
    A: Aggregate,
    C: EntityType<A::Entity>,
    K: Clone + Send + Sync + 'static,
{
    fn record(&self) -> CommandRecord {
        CommandRecord {
            id: self.id,
            kind: CommandKind::CreateChild,
            aggregate: A::KIND,
            aggregate_id: self.target.id(),
            subject: self.child_id,
            issued_at: self.issued_at,
        }
    }

    fn target_id(&self) -> Option<EntityId> {
        Some(self.target.id())
    }

    fn rebase(&mut self, current: AggregateRoot<A>) {
        self.target = current;
    }

    fn check_preconditions(&self, ctx: &Context<'_, A>) -> Result<(), PreConditionError> {
        let parent = self
            .target
            .descendant(self.parent)
            .ok_or(LookupError::InvalidEntityId(self.parent))?;
        ctx.relationships()
            .check(parent.kind(), C::ENTITY_KIND, &self.role)?;
        self.precondition.verify(&self.kernel)
    }

    fn into_event(self, _ctx: &Context<'_, A>) -> Derived<A> {
        let Self {
            id,
            target,
            parent,
            role,
            child_id,
            kernel,
            constructor,
            ..
        } = self;
        let build: Build<A::Entity> =
            Arc::new(move |header: &EventHeader| constructor(header, kernel.clone()).wrap());
        Derived {
            event: Event::new(
                EventHeader::new(id, target.id(), EventKind::ChildCreated, target.version() + 1),
                target.snapshot_interval(),
                Payload::ChildCreated {
                    parent,
                    role,
                    child: child_id,
                    build,
                },
            ),
            target: Some(target),
        }
    }
}

/// Change the payload of an existing child entity.
pub struct UpdateChild<A: Aggregate, C, P> {
    id: CommandId,
    issued_at: DateTime<Utc>,
    target: AggregateRoot<A>,
    child: EntityId,
    role: Role,
    param: P,
    precondition: UpdatePrecondition<C, P>,
    mutation: Mutation<C, P>,
}

impl<A: Aggregate, C, P> UpdateChild<A, C, P> {
    #[must_use]
    pub const fn id(&self) -> CommandId {
        self.id
    }

    #[must_use]
    pub const fn child(&self) -> EntityId {
        self.child
    }

    #[must_use]
    pub const fn param(&self) -> &P {
        &self.param
    }
}

impl<A, C, P> Command<A> for UpdateChild<A, C, P>
where
    A: Aggregate,
    C: EntityType<A::Entity>,
    P: Send + Sync + 'static,
{
    fn record(&self) -> CommandRecord {
        CommandRecord {
            id: self.id,
            kind: CommandKind::UpdateChild,
            aggregate: A::KIND,
            aggregate_id: self.target.id(),
            subject: self.child,
            issued_at: self.issued_at,
        }
    }

    fn target_id(&self) -> Option<EntityId> {
        Some(self.target.id())
    }

    fn rebase(&mut self, current: AggregateRoot<A>) {
        self.target = current;
    }

    fn check_preconditions(&self, _ctx: &Context<'_, A>) -> Result<(), PreConditionError> {
        let child = self.target.get_descendant::<C>(self.child)?;
        let actual = child
            .entity()
            .parent()
            .and_then(|parent| self.target.descendant(parent))
            .and_then(|parent| parent.role_of(self.child));
        if actual != Some(&self.role) {
            return Err(PreConditionError::RoleMismatch {
                child: self.child,
                expected: self.role.clone(),
                actual: actual.cloned(),
            });
        }
        self.precondition.verify(child.body(), &self.param)
    }

    fn into_event(self, _ctx: &Context<'_, A>) -> Derived<A> {
        let Self {
            id,
            target,
            child,
            param,
            mutation,
            ..
        } = self;
        let change: ChildChange<A> =
            Arc::new(move |root: &mut AggregateRoot<A>| -> Result<(), LookupError> {
                mutation(root.get_descendant_mut::<C>(child)?, &param);
                Ok(())
            });
        Derived {
            event: Event::new(
                EventHeader::new(id, target.id(), EventKind::ChildUpdated, target.version() + 1),
                target.snapshot_interval(),
                Payload::ChildUpdated { child, change },
            ),
            target: Some(target),
        }
    }
}

/// Blueprint for [`Create`] commands.
pub struct CreateTemplate<A, K> {
    precondition: Precondition<K>,
    constructor: Constructor<A, K>,
}

impl<A: Aggregate, K> CreateTemplate<A, K> {
    pub fn new(
        precondition: Precondition<K>,
        constructor: impl Fn(&EventHeader, K) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            precondition,
            constructor: Arc::new(constructor),
        }
    }

    pub fn using(&self, kernel: K) -> Create<A, K> {
        Create {
            id: CommandId::new(),
            issued_at: Utc::now(),
            aggregate_id: EntityId::new(),
            kernel,
            precondition: self.precondition.clone(),
            constructor: Arc::clone(&self.constructor),
        }
    }
}

/// Blueprint for [`Update`] commands.
pub struct UpdateTemplate<A, P> {
    precondition: UpdatePrecondition<A, P>,
    mutation: Mutation<A, P>,
}

impl<A: Aggregate, P> UpdateTemplate<A, P> {
    pub fn new(
        precondition: UpdatePrecondition<A, P>,
        mutation: impl Fn(&mut A, &P) + Send + Sync + 'static,
    ) -> Self {
        Self {
            precondition,
            mutation: Arc::new(mutation),
        }
    }

    /// Bind to a version of an aggregate. The command keeps its own copy
    /// until an orchestrator rebases it onto the stored latest version.
    pub fn using(&self, target: &AggregateRoot<A>, param: P) -> Update<A, P> {
        Update {
            id: CommandId::new(),
            issued_at: Utc::now(),
            target: target.clone(),
            param,
            precondition: self.precondition.clone(),
            mutation: Arc::clone(&self.mutation),
        }
    }
}

/// Blueprint for [`CreateChild`] commands.
pub struct CreateChildTemplate<A, C, K> {
    precondition: Precondition<K>,
    constructor: Constructor<C, K>,
    _aggregate: std::marker::PhantomData<fn() -> A>,
}

impl<A, C, K> CreateChildTemplate<A, C, K>
where
    A: Aggregate,
    C: EntityType<A::Entity>,
{
    pub fn new(
        precondition: Precondition<K>,
        constructor: impl Fn(&EventHeader, K) -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            precondition,
            constructor: Arc::new(constructor),
            _aggregate: std::marker::PhantomData,
        }
    }

    /// Bind to a parent entity within a version of an aggregate.
    pub fn using(
        &self,
        target: &AggregateRoot<A>,
        parent: EntityId,
        role: impl Into<Role>,
        kernel: K,
    ) -> CreateChild<A, C, K> {
        CreateChild {
            id: CommandId::new(),
            issued_at: Utc::now(),
            target: target.clone(),
            parent,
            role: role.into(),
            child_id: EntityId::new(),
            kernel,
            precondition: self.precondition.clone(),
            constructor: Arc::clone(&self.constructor),
        }
    }
}

/// Blueprint for [`UpdateChild`] commands on children held under one role.
pub struct UpdateChildTemplate<A, C, P> {
    role: Role,
    precondition: UpdatePrecondition<C, P>,
    mutation: Mutation<C, P>,
    _aggregate: std::marker::PhantomData<fn() -> A>,
}

impl<A, C, P> UpdateChildTemplate<A, C, P>
where
    A: Aggregate,
    C: EntityType<A::Entity>,
{
    pub fn new(
        role: impl Into<Role>,
        precondition: UpdatePrecondition<C, P>,
        mutation: impl Fn(&mut C, &P) + Send + Sync + 'static,
    ) -> Self {
        Self {
            role: role.into(),
            precondition,
            mutation: Arc::new(mutation),
            _aggregate: std::marker::PhantomData,
        }
    }

    #[must_use]
    pub const fn role(&self) -> &Role {
        &self.role
    }

    pub fn using(&self, target: &AggregateRoot<A>, child: EntityId, param: P) -> UpdateChild<A, C, P> {
        UpdateChild {
            id: CommandId::new(),
            issued_at: Utc::now(),
            target: target.clone(),
            child,
            role: self.role.clone(),
            param,
            precondition: self.precondition.clone(),
            mutation: Arc::clone(&self.mutation),
        }
    }
}
