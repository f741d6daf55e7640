//! SyncEngine - drains the event store to the collector.
//!
//! Batches are sent one at a time. Only ids the collector acknowledged are
//! deleted, in a single transaction at the end of the run, so a failed or
//! interrupted run never loses events; they are resent by the next trigger.

use crate::credentials::CredentialHolder;
use crate::error::CollectorError;
use crate::event::now_millis;
use crate::storage::{EventStore, StateStore};
use crate::sync::collector::Collector;
use crate::sync::outcome::{SyncFailure, SyncOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Maximum number of events per request.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Single-flight guard: held for the whole run, released on every exit path.
struct SyncLockGuard {
    flag: Arc<AtomicBool>,
}

impl SyncLockGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for SyncLockGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
        debug!("[Sync] Sync lock released");
    }
}

pub struct SyncEngine {
    store: EventStore,
    state: StateStore,
    credentials: Arc<CredentialHolder>,
    collector: Arc<dyn Collector>,
    batch_size: usize,
    in_progress: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        store: EventStore,
        state: StateStore,
        credentials: Arc<CredentialHolder>,
        collector: Arc<dyn Collector>,
    ) -> Self {
        Self {
            store,
            state,
            credentials,
            collector,
            batch_size: DEFAULT_BATCH_SIZE,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Whether a run currently holds the guard.
    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Deliver the backlog. Never panics on failure; every path returns an
    /// outcome. A call made while another run is active returns
    /// `AlreadyRunning` without touching the store or the network.
    pub fn sync_events(&self) -> SyncOutcome {
        let Some(_lock_guard) = SyncLockGuard::acquire(&self.in_progress) else {
            info!("[Sync] Another sync is already in progress, skipping");
            return SyncOutcome::AlreadyRunning;
        };

        let token = match self.credentials.token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                info!("[Sync] Not authenticated - skipping sync");
                return SyncOutcome::not_authenticated();
            }
            Err(e) => {
                error!("[Sync] Cannot read credentials: {}", e);
                return SyncOutcome::failed(SyncFailure::Unknown, e.to_string(), 0);
            }
        };

        let outcome = self.drain(&token);

        if let Err(e) = self.state.set_last_sync(now_millis()) {
            warn!("[Sync] Cannot record last sync time: {}", e);
        }

        outcome
    }

    fn drain(&self, token: &str) -> SyncOutcome {
        let events = match self.store.get_all() {
            Ok(events) => events,
            Err(e) => {
                error!("[Sync] Cannot read backlog: {}", e);
                return SyncOutcome::failed(SyncFailure::Store, e.to_string(), 0);
            }
        };

        if events.is_empty() {
            info!("[Sync] No events to sync");
            return SyncOutcome::Synced { synced: 0 };
        }

        info!("[Sync] Found {} events to sync", events.len());

        let total_batches = events.len().div_ceil(self.batch_size);
        let mut confirmed: Vec<String> = Vec::with_capacity(events.len());
        let mut aborted: Option<(SyncFailure, String)> = None;

        for (index, batch) in events.chunks(self.batch_size).enumerate() {
            info!(
                "[Sync] Syncing batch {}/{} ({} events)",
                index + 1,
                total_batches,
                batch.len()
            );

            match self.collector.send_batch(token, batch) {
                Ok(response) => {
                    info!("[Sync] Batch {} synced successfully: {}", index + 1, response);
                    confirmed.extend(batch.iter().map(|event| event.id.clone()));
                }
                Err(CollectorError::Unauthorized) => {
                    error!("[Sync] Authentication failed - token may be expired");
                    if let Err(e) = self.credentials.clear_token() {
                        error!("[Sync] Cannot clear rejected token: {}", e);
                    }
                    aborted = Some((
                        SyncFailure::AuthExpired,
                        "Authentication failed".to_string(),
                    ));
                    break;
                }
                Err(e) => {
                    // Keep this batch and the rest for the next trigger
                    error!("[Sync] Failed to sync batch {}: {}", index + 1, e);
                    aborted = Some((SyncFailure::from(&e), e.to_string()));
                    break;
                }
            }
        }

        let synced = confirmed.len();
        if !confirmed.is_empty() {
            info!("[Sync] Deleting {} synced events from local DB", synced);
            if let Err(e) = self.store.delete_many(&confirmed) {
                // Delivered but still stored: they will be sent again
                error!("[Sync] Cannot delete confirmed events: {}", e);
                // A rejected token still has to surface as "needs login"
                if let Some((failure, message)) = aborted.filter(|(f, _)| f.requires_auth()) {
                    return SyncOutcome::failed(failure, message, synced);
                }
                return SyncOutcome::failed(SyncFailure::Store, e.to_string(), synced);
            }
        }

        match aborted {
            Some((failure, message)) => {
                warn!(
                    "[Sync] Sync aborted after {} events: {}",
                    synced, message
                );
                SyncOutcome::failed(failure, message, synced)
            }
            None => {
                info!("[Sync] Sync complete - {} events synced", synced);
                SyncOutcome::Synced { synced }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventRecord, EventType};
    use crate::storage::Database;
    use anyhow::Result;
    use serde_json::{json, Map, Value};
    use std::collections::{HashMap, HashSet};
    use std::sync::mpsc::{channel, Receiver, Sender};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Collector that records every batch and answers from a script.
    /// Calls past the end of the script succeed.
    #[derive(Default)]
    struct ScriptedCollector {
        script: Mutex<Vec<Result<Value, CollectorError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedCollector {
        fn with_script(script: Vec<Result<Value, CollectorError>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().rev().collect()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Collector for ScriptedCollector {
        fn name(&self) -> &str {
            "scripted"
        }

        fn send_batch(&self, _token: &str, batch: &[EventRecord]) -> Result<Value, CollectorError> {
            self.calls
                .lock()
                .unwrap()
                .push(batch.iter().map(|e| e.id.clone()).collect());
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(json!({"success": true})))
        }
    }

    struct Fixture {
        db: Arc<Database>,
        store: EventStore,
        state: StateStore,
        credentials: Arc<CredentialHolder>,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory());
            let state = StateStore::new(db.clone());
            Self {
                store: EventStore::new(db.clone()),
                credentials: Arc::new(CredentialHolder::local(state.clone())),
                state,
                db,
            }
        }

        /// Make every delete on the events table fail.
        fn block_deletes(&self) -> Result<()> {
            self.db.with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER block_delete BEFORE DELETE ON events
                     BEGIN SELECT RAISE(ABORT, 'delete blocked'); END;",
                )?;
                Ok(())
            })?;
            Ok(())
        }

        fn logged_in() -> Result<Self> {
            let fixture = Self::new();
            fixture.credentials.set_token("token-1")?;
            Ok(fixture)
        }

        fn seed(&self, n: usize) -> Result<Vec<String>> {
            let mut ids = Vec::with_capacity(n);
            for i in 0..n {
                let mut payload = Map::new();
                payload.insert("tabId".into(), json!(i));
                let record = EventRecord::new(EventType::TabActivated, payload);
                self.store.append(&record)?;
                ids.push(record.id);
            }
            Ok(ids)
        }

        fn engine(&self, collector: Arc<dyn Collector>) -> SyncEngine {
            SyncEngine::new(
                self.store.clone(),
                self.state.clone(),
                self.credentials.clone(),
                collector,
            )
        }

        fn stored_ids(&self) -> Result<HashSet<String>> {
            Ok(self.store.get_all()?.into_iter().map(|e| e.id).collect())
        }
    }

    #[test]
    fn test_no_token_skips_everything() -> Result<()> {
        let fixture = Fixture::new();
        fixture.seed(5)?;
        let collector = Arc::new(ScriptedCollector::default());

        let outcome = fixture.engine(collector.clone()).sync_events();

        assert!(outcome.requires_auth());
        assert_eq!(outcome.failure(), Some(SyncFailure::NotAuthenticated));
        assert!(collector.calls().is_empty());
        assert_eq!(fixture.store.count()?, 5);
        assert_eq!(fixture.state.last_sync()?, None);
        Ok(())
    }

    #[test]
    fn test_empty_backlog_is_a_noop() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        let collector = Arc::new(ScriptedCollector::default());

        let outcome = fixture.engine(collector.clone()).sync_events();

        assert_eq!(outcome, SyncOutcome::Synced { synced: 0 });
        assert!(collector.calls().is_empty());
        assert!(fixture.state.last_sync()?.is_some());
        Ok(())
    }

    #[test]
    fn test_full_sync_in_three_batches() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        let seeded: HashSet<String> = fixture.seed(250)?.into_iter().collect();
        let collector = Arc::new(ScriptedCollector::default());
        let engine = fixture.engine(collector.clone());

        let outcome = engine.sync_events();

        assert_eq!(outcome, SyncOutcome::Synced { synced: 250 });
        let sizes: Vec<usize> = collector.calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![100, 100, 50]);
        let sent: HashSet<String> = collector.calls().into_iter().flatten().collect();
        assert_eq!(sent, seeded);
        assert_eq!(fixture.store.count()?, 0);

        // Immediately again: nothing left, nothing sent
        let again = engine.sync_events();
        assert_eq!(again, SyncOutcome::Synced { synced: 0 });
        assert_eq!(collector.calls().len(), 3);
        Ok(())
    }

    #[test]
    fn test_unauthorized_mid_run_keeps_later_batches() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(250)?;
        let collector = Arc::new(ScriptedCollector::with_script(vec![
            Ok(json!({"inserted": 100})),
            Err(CollectorError::Unauthorized),
        ]));

        let outcome = fixture.engine(collector.clone()).sync_events();

        assert!(outcome.requires_auth());
        assert_eq!(outcome.failure(), Some(SyncFailure::AuthExpired));
        assert_eq!(outcome.synced(), 100);
        assert!(!fixture.credentials.is_present());

        let calls = collector.calls();
        assert_eq!(calls.len(), 2);
        let remaining = fixture.stored_ids()?;
        assert_eq!(remaining.len(), 150);
        assert!(calls[0].iter().all(|id| !remaining.contains(id)));
        assert!(calls[1].iter().all(|id| remaining.contains(id)));
        Ok(())
    }

    #[test]
    fn test_unauthorized_wins_over_delete_failure() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(150)?;
        fixture.block_deletes()?;
        let collector = Arc::new(ScriptedCollector::with_script(vec![
            Ok(json!({"inserted": 100})),
            Err(CollectorError::Unauthorized),
        ]));

        let outcome = fixture.engine(collector).sync_events();

        assert!(outcome.requires_auth());
        assert_eq!(outcome.failure(), Some(SyncFailure::AuthExpired));
        assert!(!fixture.credentials.is_present());
        // Confirmed batch could not be deleted and will be resent
        assert_eq!(fixture.store.count()?, 150);
        Ok(())
    }

    #[test]
    fn test_delete_failure_after_full_delivery_is_store_failure() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(5)?;
        fixture.block_deletes()?;
        let collector = Arc::new(ScriptedCollector::default());

        let outcome = fixture.engine(collector).sync_events();

        assert_eq!(outcome.failure(), Some(SyncFailure::Store));
        assert_eq!(outcome.synced(), 5);
        assert_eq!(fixture.store.count()?, 5);
        Ok(())
    }

    #[test]
    fn test_transport_error_mid_run_keeps_later_batches() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(250)?;
        let collector = Arc::new(ScriptedCollector::with_script(vec![
            Ok(json!({"inserted": 100})),
            Err(CollectorError::Transport("connection reset".into())),
        ]));

        let outcome = fixture.engine(collector.clone()).sync_events();

        assert!(!outcome.is_success());
        assert!(!outcome.requires_auth());
        assert_eq!(outcome.failure(), Some(SyncFailure::TransportFailure));
        assert!(outcome.message().contains("connection reset"));
        assert!(fixture.credentials.is_present());

        let calls = collector.calls();
        let remaining = fixture.stored_ids()?;
        assert_eq!(remaining.len(), 150);
        assert!(calls[0].iter().all(|id| !remaining.contains(id)));
        assert!(calls[1].iter().all(|id| remaining.contains(id)));

        // The next run delivers what was left
        let retry = fixture.engine(collector.clone()).sync_events();
        assert_eq!(retry, SyncOutcome::Synced { synced: 150 });
        assert_eq!(fixture.store.count()?, 0);
        Ok(())
    }

    #[test]
    fn test_server_error_on_first_batch_deletes_nothing() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(30)?;
        let collector = Arc::new(ScriptedCollector::with_script(vec![Err(
            CollectorError::Status {
                status: 500,
                body: "boom".into(),
            },
        )]));

        let outcome = fixture.engine(collector).sync_events();

        assert_eq!(outcome.failure(), Some(SyncFailure::TransportFailure));
        assert_eq!(outcome.synced(), 0);
        assert_eq!(fixture.store.count()?, 30);
        assert!(fixture.state.last_sync()?.is_some());
        Ok(())
    }

    #[test]
    fn test_unreadable_acknowledgement_is_unknown_failure() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(3)?;
        let collector = Arc::new(ScriptedCollector::with_script(vec![Err(
            CollectorError::InvalidResponse("expected value".into()),
        )]));

        let outcome = fixture.engine(collector).sync_events();

        assert_eq!(outcome.failure(), Some(SyncFailure::Unknown));
        assert_eq!(fixture.store.count()?, 3);
        Ok(())
    }

    #[test]
    fn test_custom_batch_size() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        fixture.seed(7)?;
        let collector = Arc::new(ScriptedCollector::default());

        let engine = fixture.engine(collector.clone()).with_batch_size(3);
        assert_eq!(engine.sync_events(), SyncOutcome::Synced { synced: 7 });

        let sizes: Vec<usize> = collector.calls().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(fixture.engine(collector).with_batch_size(0).batch_size(), 1);
        Ok(())
    }

    /// Collector whose first call blocks until released.
    struct GatedCollector {
        entered: Mutex<Option<Sender<()>>>,
        release: Mutex<Receiver<()>>,
        delivered: Mutex<HashMap<String, usize>>,
    }

    impl Collector for GatedCollector {
        fn name(&self) -> &str {
            "gated"
        }

        fn send_batch(&self, _token: &str, batch: &[EventRecord]) -> Result<Value, CollectorError> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                self.release
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(10))
                    .unwrap();
            }
            let mut delivered = self.delivered.lock().unwrap();
            for event in batch {
                *delivered.entry(event.id.clone()).or_default() += 1;
            }
            Ok(json!({"success": true}))
        }
    }

    #[test]
    fn test_concurrent_runs_are_single_flight() -> Result<()> {
        let fixture = Fixture::logged_in()?;
        let seeded = fixture.seed(120)?;

        let (entered_tx, entered_rx) = channel();
        let (release_tx, release_rx) = channel();
        let collector = Arc::new(GatedCollector {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
            delivered: Mutex::new(HashMap::new()),
        });
        let engine = Arc::new(fixture.engine(collector.clone()));

        let first = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.sync_events())
        };

        // Wait until the first run is inside the collector
        entered_rx.recv_timeout(Duration::from_secs(10))?;
        assert!(engine.is_syncing());

        let second = engine.sync_events();
        assert_eq!(second, SyncOutcome::AlreadyRunning);

        release_tx.send(())?;
        let first = first.join().expect("sync thread panicked");
        assert_eq!(first, SyncOutcome::Synced { synced: 120 });
        assert!(!engine.is_syncing());

        let delivered = collector.delivered.lock().unwrap();
        assert_eq!(delivered.len(), seeded.len());
        assert!(delivered.values().all(|&n| n == 1));
        assert_eq!(fixture.store.count()?, 0);
        Ok(())
    }
}
