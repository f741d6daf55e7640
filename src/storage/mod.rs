//! Storage module - Durable local persistence.
//!
//! This module contains:
//! - Database: lazily opened, shared SQLite connection
//! - EventStore: the event queue keyed by event id (indexes on ts and type)
//! - StateStore: scalar slots outside the event table (token, last sync, alarm)

pub mod database;
pub mod event_store;
pub mod state;

pub use database::Database;
pub use event_store::EventStore;
pub use state::StateStore;
