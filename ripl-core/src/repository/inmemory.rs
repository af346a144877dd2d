//! In-memory repository for tests and examples.
//!
//! ```
//! use ripl_core::repository::inmemory::InMemoryRepository;
//! # use ripl_core::entity::Aggregate;
//! # fn build<A: Aggregate>() -> InMemoryRepository<A> {
//! InMemoryRepository::new()
//! # }
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use nonempty::NonEmpty;

use crate::{
    command::CommandRecord,
    entity::Aggregate,
    event::{ApplyError, Event},
    id::EntityId,
    repository::Repository,
    root::AggregateRoot,
};

/// Thread-safe in-memory repository.
///
/// Clones share the same storage.
pub struct InMemoryRepository<A: Aggregate> {
    inner: Arc<RwLock<Inner<A>>>,
}

struct Inner<A: Aggregate> {
    commands: Vec<CommandRecord>,
    events: Vec<Event<A>>,
    snapshots: HashMap<EntityId, NonEmpty<AggregateRoot<A>>>,
}

/// Error type for the in-memory repository.
#[derive(Debug, thiserror::Error)]
pub enum InMemoryError {
    #[error("failed to replay stored event: {0}")]
    Replay(#[source] ApplyError),
}

impl<A: Aggregate> InMemoryRepository<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                commands: Vec::new(),
                events: Vec::new(),
                snapshots: HashMap::new(),
            })),
        }
    }

    /// Every command record, in recording order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandRecord> {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        inner.commands.clone()
    }

    /// Events recorded for one aggregate, in recording order.
    #[must_use]
    pub fn events(&self, id: &EntityId) -> Vec<Event<A>> {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        inner
            .events
            .iter()
            .filter(|event| event.aggregate_id() == *id)
            .cloned()
            .collect()
    }

    /// Total number of events across all aggregates.
    #[must_use]
    pub fn event_count(&self) -> usize {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        inner.events.len()
    }

    /// Every stored snapshot of one aggregate, oldest first.
    #[must_use]
    pub fn snapshots(&self, id: &EntityId) -> Vec<AggregateRoot<A>> {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        inner
            .snapshots
            .get(id)
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn snapshot_versions(&self, id: &EntityId) -> Vec<u64> {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        inner
            .snapshots
            .get(id)
            .map(|history| history.iter().map(AggregateRoot::version).collect())
            .unwrap_or_default()
    }

    fn replay(inner: &Inner<A>, id: &EntityId) -> Result<Option<AggregateRoot<A>>, InMemoryError> {
        let Some(history) = inner.snapshots.get(id) else {
            return Ok(None);
        };
        let mut root = history.last().clone();
        let base = root.version();
        let mut replayed = 0_usize;
        for event in inner
            .events
            .iter()
            .filter(|event| event.aggregate_id() == *id && event.version() > base)
        {
            tracing::trace!(event = %event.id(), version = event.version(), "replaying event");
            root = event.apply(Some(root)).map_err(InMemoryError::Replay)?;
            replayed += 1;
        }
        tracing::trace!(snapshot_version = base, replayed, "aggregate reconstructed");
        Ok(Some(root))
    }
}

impl<A: Aggregate> Default for InMemoryRepository<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> Clone for InMemoryRepository<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Aggregate> Repository<A> for InMemoryRepository<A> {
    type Error = InMemoryError;

    #[tracing::instrument(skip(self, record), fields(command = %record.id, kind = %record.kind))]
    fn store_command<'a>(
        &'a self,
        record: &'a CommandRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let mut inner = self.inner.write().expect("in-memory repository lock poisoned");
        inner.commands.push(record.clone());
        drop(inner);
        tracing::trace!("command recorded");
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self, event), fields(event = %event.id(), version = event.version()))]
    fn store_event<'a>(
        &'a self,
        event: &'a Event<A>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let mut inner = self.inner.write().expect("in-memory repository lock poisoned");
        inner.events.push(event.clone());
        drop(inner);
        tracing::trace!("event recorded");
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self, root), fields(aggregate = %root.id(), version = root.version()))]
    fn store_snapshot<'a>(
        &'a self,
        root: &'a AggregateRoot<A>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a {
        let mut inner = self.inner.write().expect("in-memory repository lock poisoned");
        match inner.snapshots.get_mut(&root.id()) {
            Some(history) => history.push(root.clone()),
            None => {
                inner
                    .snapshots
                    .insert(root.id(), NonEmpty::new(root.clone()));
            }
        }
        drop(inner);
        tracing::debug!(snapshot = %root.snapshot_id(), "snapshot stored");
        std::future::ready(Ok(()))
    }

    #[tracing::instrument(skip(self))]
    fn get_latest<'a>(
        &'a self,
        id: &'a EntityId,
    ) -> impl Future<Output = Result<Option<AggregateRoot<A>>, Self::Error>> + Send + 'a {
        let inner = self.inner.read().expect("in-memory repository lock poisoned");
        let result = Self::replay(&inner, id);
        drop(inner);
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        command::{
            Command, Context, CreateTemplate, Derived, Precondition, UpdatePrecondition,
            UpdateTemplate,
        },
        fixtures::{Home, relationships},
    };

    fn derive<C: Command<Home>>(command: C, interval: u64) -> Derived<Home> {
        let registry = Arc::new(relationships());
        command.into_event(&Context::new(&registry, interval))
    }

    #[tokio::test]
    async fn unknown_aggregate_is_none() {
        let repository = InMemoryRepository::<Home>::new();
        assert!(repository.get_latest(&EntityId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_is_newest_snapshot_plus_later_events() {
        let repository = InMemoryRepository::<Home>::new();
        let create = CreateTemplate::new(Precondition::always(), |_, beds: u32| Home {
            beds,
            owner: "harriet".into(),
        });
        let set_beds = UpdateTemplate::new(
            UpdatePrecondition::always(),
            |home: &mut Home, beds: &u32| home.beds = *beds,
        );

        let Derived { event, target } = derive(create.using(1), 10);
        let mut root = event.apply(target).unwrap();
        repository.store_event(&event).await.unwrap();
        repository.store_snapshot(&root).await.unwrap();

        for beds in 2..=4 {
            let Derived { event, target } = derive(set_beds.using(&root, beds), 10);
            root = event.apply(target).unwrap();
            repository.store_event(&event).await.unwrap();
        }

        let latest = repository.get_latest(&root.id()).await.unwrap().unwrap();
        assert_eq!(latest, root);
        assert_eq!(latest.body().beds, 4);
        assert_eq!(repository.snapshot_versions(&root.id()), [1]);
        assert_eq!(repository.event_count(), 4);
    }

    #[tokio::test]
    async fn clones_share_storage() {
        let repository = InMemoryRepository::<Home>::new();
        let clone = repository.clone();
        let create = CreateTemplate::new(Precondition::always(), |_, beds: u32| Home {
            beds,
            owner: "harriet".into(),
        });

        let command = create.using(2);
        clone.store_command(&command.record()).await.unwrap();
        assert_eq!(repository.commands().len(), 1);
        assert!(repository.snapshots(&command.aggregate_id()).is_empty());
    }
}
