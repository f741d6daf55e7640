//! Sync module - Deliver the local event backlog to the remote collector.
//!
//! This module contains:
//! - Collector trait for transport abstraction
//! - HTTP collector (POST {base}/events/sync with a bearer token)
//! - SyncEngine: batching, auth gating, confirmed-delete, single-flight guard
//! - SyncOutcome: structured result returned to every trigger

pub mod collector;
pub mod engine;
pub mod outcome;

pub use collector::{Collector, HttpCollector, DEFAULT_TIMEOUT};
pub use engine::{SyncEngine, DEFAULT_BATCH_SIZE};
pub use outcome::{SyncFailure, SyncOutcome, SyncReport};
