//! Core traits and types for the ripl event-sourced aggregate kernel.
//!
//! An aggregate is a tree of entities that only ever changes through commands.
//! Every accepted command produces one event, and applying that event to the
//! previous version of the aggregate yields the next one.
//!
//! - [`entity`] - Entity model (`Aggregate`, `EntityType`, `Entity`, `Role`)
//! - [`relationship`] - Declared parent-child relationships (`Relationships`)
//! - [`root`] - Aggregate roots and their descendant index (`AggregateRoot`)
//! - [`command`] - Commands, templates and preconditions
//! - [`event`] - Events and how they are applied (`Event`)
//! - [`orchestrator`] - The command pipeline for one aggregate type (`Orchestrator`)
//! - [`repository`] - Persistence contract (`Repository`) and an in-memory implementation
//! - [`snapshot`] - Snapshot cadence (`SnapshotPolicy`)
//! - [`id`] - Identifier newtypes
//!
//! Most users should depend on the `ripl` crate, which re-exports these types
//! together with the `#[derive(Aggregate)]` macro.

pub mod command;
pub mod entity;
pub mod event;
pub mod id;
pub mod orchestrator;
pub mod relationship;
pub mod repository;
pub mod root;
pub mod snapshot;

#[cfg(test)]
mod fixtures;
