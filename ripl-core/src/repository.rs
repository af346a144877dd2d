//! Persistence contract for aggregates.
//!
//! A [`Repository`] stores three append-only streams per aggregate type: the
//! audit records of every command, every event, and snapshots of selected
//! versions. [`Repository::get_latest`] reconstructs the current version from
//! the newest snapshot plus every later event, re-applied in recording order.
//!
//! [`inmemory::InMemoryRepository`] is the reference implementation.

use crate::{
    command::CommandRecord,
    entity::Aggregate,
    event::Event,
    id::EntityId,
    root::AggregateRoot,
};

pub mod inmemory;

/// Storage for one aggregate type.
///
/// Callers serialize writes per aggregate id; implementations need not detect
/// concurrent writers.
pub trait Repository<A: Aggregate>: Send + Sync {
    /// Store-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Append the audit record of a command.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the write fails.
    fn store_command<'a>(
        &'a self,
        record: &'a CommandRecord,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Append an event.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the write fails.
    fn store_event<'a>(
        &'a self,
        event: &'a Event<A>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Append a snapshot of one aggregate version.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when the write fails.
    fn store_snapshot<'a>(
        &'a self,
        root: &'a AggregateRoot<A>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

    /// Reconstruct the latest version of an aggregate.
    ///
    /// Returns `None` if no snapshot exists for `id`.
    ///
    /// # Errors
    ///
    /// Returns a store-specific error when reading fails or a stored event
    /// cannot be re-applied.
    fn get_latest<'a>(
        &'a self,
        id: &'a EntityId,
    ) -> impl Future<Output = Result<Option<AggregateRoot<A>>, Self::Error>> + Send + 'a;
}
