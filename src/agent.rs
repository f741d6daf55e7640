//! Agent - the running client: one store, one credential slot, one engine.
//!
//! Every operator entry point (CLI, native-messaging host) goes through an
//! `Agent`, so there is exactly one single-flight guard per process.

use crate::capture::Capture;
use crate::config::{Config, CredentialBackend};
use crate::credentials::CredentialHolder;
use crate::error::{CredentialError, StoreError};
use crate::event::{EventRecord, EventType};
use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerStatus};
use crate::storage::{Database, EventStore, StateStore};
use crate::sync::{Collector, HttpCollector, SyncEngine, SyncFailure, SyncOutcome};
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Tunables taken from the `[sync]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    pub batch_size: usize,
    pub sync_interval: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::sync::DEFAULT_BATCH_SIZE,
            sync_interval: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for AgentSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch_size: config.sync.batch_size,
            sync_interval: config.sync_interval(),
        }
    }
}

/// Operator-facing status: `{authenticated, pendingEvents, lastSync, userEmail?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub authenticated: bool,
    pub pending_events: usize,
    /// Wall-clock ms of the last sync attempt
    pub last_sync: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
}

pub struct Agent {
    store: EventStore,
    state: StateStore,
    credentials: Arc<CredentialHolder>,
    engine: Arc<SyncEngine>,
    capture: Capture,
    settings: AgentSettings,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl Agent {
    /// Build an agent from config: on-disk database, HTTP collector and the
    /// configured credential backend. The database opens on first use.
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let db = Arc::new(Database::open(config.database_path()));
        let collector = HttpCollector::new(&config.collector.base_url, config.timeout())
            .context("Cannot create HTTP collector")?;

        Ok(Self::new(
            db,
            config.credentials.backend,
            Arc::new(collector),
            AgentSettings::from(config),
        ))
    }

    pub fn new(
        db: Arc<Database>,
        backend: CredentialBackend,
        collector: Arc<dyn Collector>,
        settings: AgentSettings,
    ) -> Self {
        let store = EventStore::new(db.clone());
        let state = StateStore::new(db);
        let credentials = Arc::new(match backend {
            CredentialBackend::Local => CredentialHolder::local(state.clone()),
            CredentialBackend::Keyring => CredentialHolder::keyring(),
        });
        let engine = Arc::new(
            SyncEngine::new(
                store.clone(),
                state.clone(),
                credentials.clone(),
                collector,
            )
            .with_batch_size(settings.batch_size),
        );

        Self {
            capture: Capture::new(store.clone()),
            store,
            state,
            credentials,
            engine,
            settings,
            scheduler: Mutex::new(None),
        }
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    pub fn pending_count(&self) -> Result<usize, StoreError> {
        self.store.count()
    }

    pub fn status(&self) -> Result<Status, StoreError> {
        Ok(Status {
            authenticated: self.credentials.is_present(),
            pending_events: self.store.count()?,
            last_sync: self.state.last_sync()?,
            user_email: self.state.user_email()?,
        })
    }

    pub fn scheduler_status(&self) -> Option<SchedulerStatus> {
        self.scheduler_slot().as_ref()?.status()
    }

    /// Queue a manual sync and return where its outcome will arrive.
    ///
    /// Goes through the scheduler when one runs, otherwise a short-lived
    /// worker thread runs the engine. Either way the guard is shared.
    pub fn request_sync(&self) -> Receiver<SyncOutcome> {
        if let Some(rx) = self
            .scheduler_slot()
            .as_ref()
            .and_then(SchedulerHandle::request_sync)
        {
            return rx;
        }

        let (tx, rx) = mpsc::channel();
        let engine = self.engine.clone();
        let spawned = thread::Builder::new()
            .name("tabtrail-sync".to_string())
            .spawn(move || {
                let _ = tx.send(engine.sync_events());
            });
        if let Err(e) = spawned {
            warn!("[Agent] Cannot start sync worker: {}", e);
        }
        rx
    }

    /// Run a manual sync and wait for the outcome.
    pub fn trigger_manual_sync(&self) -> SyncOutcome {
        self.request_sync().recv().unwrap_or_else(|_| {
            SyncOutcome::failed(SyncFailure::Unknown, "Sync worker stopped", 0)
        })
    }

    pub fn login(&self, token: &str) -> Result<(), CredentialError> {
        self.credentials.set_token(token)
    }

    /// Remember the account email shown by `status`. `None` forgets it.
    pub fn set_user_email(&self, email: Option<&str>) -> Result<(), StoreError> {
        self.state.set_user_email(email)
    }

    /// Clear the token and the remembered email.
    pub fn logout(&self) -> Result<()> {
        self.credentials
            .clear_token()
            .context("Cannot clear credentials")?;
        self.state
            .set_user_email(None)
            .context("Cannot clear user email")?;
        Ok(())
    }

    /// Delete every queued event, the token and all state slots.
    /// Returns the number of events removed.
    pub fn wipe_local_data(&self) -> Result<usize> {
        let removed = self.store.clear().context("Cannot clear event store")?;
        self.credentials
            .clear_token()
            .context("Cannot clear credentials")?;
        self.state.clear().context("Cannot clear state")?;

        info!("[Agent] Local data wiped ({} events removed)", removed);
        Ok(removed)
    }

    pub fn events_in_range(&self, start: i64, end: i64) -> Result<Vec<EventRecord>, StoreError> {
        self.store.get_by_time_range(start, end)
    }

    pub fn events_by_type(&self, event_type: &EventType) -> Result<Vec<EventRecord>, StoreError> {
        self.store.get_by_type(event_type)
    }

    pub fn counts_by_type(&self) -> Result<Vec<(EventType, usize)>, StoreError> {
        self.store.count_by_type()
    }

    /// Start the interval/startup scheduler. No-op when it already runs.
    pub fn start_scheduler(&self) -> Result<()> {
        let mut slot = self.scheduler_slot();
        if slot.as_ref().is_some_and(SchedulerHandle::is_running) {
            return Ok(());
        }

        let handle = Scheduler::new(
            self.engine.clone(),
            self.state.clone(),
            self.settings.sync_interval,
        )
        .spawn()
        .context("Cannot start scheduler thread")?;
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the scheduler, waiting for a run in progress.
    pub fn stop_scheduler(&self) {
        let handle = self.scheduler_slot().take();
        if let Some(handle) = handle {
            handle.shutdown();
        }
    }

    /// Block until the scheduler ends (daemon mode).
    pub fn wait_scheduler(&self) {
        let handle = self.scheduler_slot().take();
        if let Some(handle) = handle {
            handle.wait();
        }
    }

    fn scheduler_slot(&self) -> MutexGuard<'_, Option<SchedulerHandle>> {
        self.scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.stop_scheduler();
    }
}
