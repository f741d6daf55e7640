//! tabtrail Core Library
//!
//! Captures browser activity events, keeps them in a durable local queue and
//! delivers them to a remote collector in batches. Provides:
//! - Event capture from browser notifications (tabs, windows, idle state)
//! - SQLite-backed event store with timestamp and type indexes
//! - Bearer-token credential holder (local database or OS keyring)
//! - Sync engine with at-least-once delivery and confirmed-delete semantics
//! - Interval/startup/on-demand scheduler and a native-messaging host
//!
//! Pipeline: Capture -> Event Store -> Sync Engine -> Collector

pub mod agent;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event;
pub mod messaging;
pub mod scheduler;
pub mod storage;
pub mod sync;

// Re-export main types
pub use agent::{Agent, AgentSettings, Status};
pub use capture::{Capture, Notification};
pub use config::Config;
pub use credentials::CredentialHolder;
pub use error::{CollectorError, CredentialError, FrameError, StoreError};
pub use event::{EventRecord, EventType};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStatus, Trigger};
pub use storage::{Database, EventStore, StateStore};
pub use sync::{Collector, HttpCollector, SyncEngine, SyncFailure, SyncOutcome, SyncReport};
