//! Command execution for one aggregate type.
//!
//! [`Orchestrator`] owns the relationship registry and snapshot interval of an
//! aggregate type and drives every command through the same pipeline:
//!
//! 1. record the command
//! 2. rebase it onto the latest stored version of its target
//! 3. check its preconditions (stop here on failure)
//! 4. derive the event and apply it to produce the next version
//! 5. record the event
//! 6. record a snapshot if the new version requires one
//! 7. return the new version
//!
//! A command built from an older copy of an aggregate is therefore checked
//! and applied against current state, and versions in the log stay unique.
//!
//! Applying is pure, so it happens before the event is recorded: an event
//! that cannot be applied never reaches the log.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    command::{Command, Context, Derived, PreConditionError},
    entity::{Aggregate, KindOf},
    event::ApplyError,
    id::EntityId,
    relationship::Relationships,
    repository::Repository,
    root::AggregateRoot,
    snapshot::SnapshotPolicy,
};

/// Error returned by [`Orchestrator::perform`].
#[derive(Debug, Error)]
pub enum PerformError<E>
where
    E: std::error::Error + 'static,
{
    #[error("command rejected: {0}")]
    PreCondition(#[source] PreConditionError),
    #[error("id {0} does not identify an aggregate root in the repository")]
    InvalidTarget(EntityId),
    #[error("failed to apply event: {0}")]
    Apply(#[source] ApplyError),
    #[error("repository operation failed: {0}")]
    Repository(#[source] E),
}

/// Error returned by [`Orchestrator::get_latest`].
#[derive(Debug, Error)]
pub enum TargetError<E>
where
    E: std::error::Error + 'static,
{
    #[error("id {0} does not identify an aggregate root in the repository")]
    InvalidTarget(EntityId),
    #[error("repository operation failed: {0}")]
    Repository(#[source] E),
}

/// Performs commands against aggregates of type `A` stored in `R`.
///
/// ```ignore
/// let orchestrator = Orchestrator::new(InMemoryRepository::new())
///     .with_relationships(relationships)
///     .with_snapshot_interval(5);
/// let home = orchestrator.perform(create_home.using(kernel)).await?;
/// ```
pub struct Orchestrator<A: Aggregate, R> {
    repository: R,
    relationships: Arc<Relationships<KindOf<A>>>,
    snapshot_interval: u64,
}

impl<A: Aggregate, R: Clone> Clone for Orchestrator<A, R> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            relationships: Arc::clone(&self.relationships),
            snapshot_interval: self.snapshot_interval,
        }
    }
}

impl<A, R> Orchestrator<A, R>
where
    A: Aggregate,
    R: Repository<A>,
{
    /// An orchestrator with no relationships declared that snapshots every
    /// version.
    #[must_use]
    pub fn new(repository: R) -> Self {
        Self {
            repository,
            relationships: Arc::new(Relationships::new()),
            snapshot_interval: 0,
        }
    }

    #[must_use]
    pub fn with_relationships(mut self, relationships: Relationships<KindOf<A>>) -> Self {
        self.relationships = Arc::new(relationships);
        self
    }

    /// `0` snapshots every version; `n` snapshots versions divisible by `n`.
    /// Applies to aggregates created through this orchestrator; existing
    /// aggregates keep the interval they were created with.
    #[must_use]
    pub const fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot_interval = interval;
        self
    }

    #[must_use]
    pub fn relationships(&self) -> &Relationships<KindOf<A>> {
        &self.relationships
    }

    #[must_use]
    pub const fn snapshot_interval(&self) -> u64 {
        self.snapshot_interval
    }

    #[must_use]
    pub const fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy::from_interval(self.snapshot_interval)
    }

    #[must_use]
    pub const fn repository(&self) -> &R {
        &self.repository
    }

    #[must_use]
    pub const fn context(&self) -> Context<'_, A> {
        Context::new(&self.relationships, self.snapshot_interval)
    }

    /// Perform a command and return the aggregate version it produces.
    ///
    /// Commands against an existing aggregate are rebased onto its latest
    /// stored version first. On a failed precondition or an unknown target
    /// only the command record is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`PerformError::InvalidTarget`] if the target aggregate is not
    /// in the repository, [`PerformError::PreCondition`] if the command is
    /// rejected,
    /// [`PerformError::Apply`] if its event cannot be applied, and
    /// [`PerformError::Repository`] if persisting fails.
    #[tracing::instrument(skip(self, command), fields(aggregate = A::KIND))]
    pub async fn perform<C>(&self, mut command: C) -> Result<AggregateRoot<A>, PerformError<R::Error>>
    where
        C: Command<A>,
    {
        let record = command.record();
        self.repository
            .store_command(&record)
            .await
            .map_err(PerformError::Repository)?;

        if let Some(id) = command.target_id() {
            let current = self
                .repository
                .get_latest(&id)
                .await
                .map_err(PerformError::Repository)?
                .ok_or_else(|| {
                    tracing::debug!(command = %record.id, target = %id, "command targets an unknown aggregate");
                    PerformError::InvalidTarget(id)
                })?;
            tracing::trace!(command = %record.id, version = current.version(), "command rebased");
            command.rebase(current);
        }

        let ctx = self.context();
        if let Err(err) = command.check_preconditions(&ctx) {
            if matches!(err, PreConditionError::Relationship(_)) {
                tracing::error!(command = %record.id, error = %err, "command violates relationship declarations");
            } else {
                tracing::debug!(command = %record.id, error = %err, "command rejected");
            }
            return Err(PerformError::PreCondition(err));
        }

        let Derived { event, target } = command.into_event(&ctx);
        let root = event.apply(target).map_err(|err| {
            tracing::error!(command = %record.id, event = %event.id(), error = %err, "failed to apply event");
            PerformError::Apply(err)
        })?;

        self.repository
            .store_event(&event)
            .await
            .map_err(PerformError::Repository)?;

        if event.requires_snapshot() {
            self.repository
                .store_snapshot(&root)
                .await
                .map_err(PerformError::Repository)?;
        }

        tracing::debug!(
            command = %record.id,
            kind = %record.kind,
            event = %event.id(),
            aggregate_id = %root.id(),
            version = root.version(),
            snapshot = event.requires_snapshot(),
            "command performed"
        );
        Ok(root)
    }

    /// Latest version of an aggregate, reconstructed by the repository.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::InvalidTarget`] if the repository has no such
    /// aggregate, and [`TargetError::Repository`] if reading fails.
    #[tracing::instrument(skip(self), fields(aggregate = A::KIND))]
    pub async fn get_latest(&self, id: &EntityId) -> Result<AggregateRoot<A>, TargetError<R::Error>> {
        self.repository
            .get_latest(id)
            .await
            .map_err(TargetError::Repository)?
            .ok_or(TargetError::InvalidTarget(*id))
    }
}
