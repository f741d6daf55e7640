//! Scheduler - decides when the sync engine runs.
//!
//! Three triggers exist: once at startup, a periodic alarm, and on demand.
//! The alarm due time is persisted in the state table so a restart keeps the
//! cadence. All triggers go through the engine's single-flight guard.

use crate::event::now_millis;
use crate::storage::StateStore;
use crate::sync::{SyncEngine, SyncOutcome};
use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest single wait before the alarm is checked again.
const ALARM_TICK: Duration = Duration::from_secs(30);

/// What caused a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Alarm,
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => write!(f, "startup"),
            Trigger::Alarm => write!(f, "alarm"),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

enum Command {
    SyncNow { reply: Sender<SyncOutcome> },
    Status { reply: Sender<SchedulerStatus> },
    Shutdown,
}

/// Snapshot of the loop's own state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    /// Wall-clock ms at which the next alarm sync is due
    pub next_alarm_due: Option<i64>,
    pub last_trigger: Trigger,
    pub last_outcome: SyncOutcome,
}

/// Background sync loop.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    state: StateStore,
    interval: Duration,
}

impl Scheduler {
    pub fn new(engine: Arc<SyncEngine>, state: StateStore, interval: Duration) -> Self {
        Self {
            engine,
            state,
            interval,
        }
    }

    /// Start the loop on its own thread. The startup sync runs right away.
    pub fn spawn(self) -> std::io::Result<SchedulerHandle> {
        let (tx, rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name("tabtrail-scheduler".to_string())
            .spawn(move || self.run(rx))?;

        Ok(SchedulerHandle {
            tx,
            thread: Some(thread),
        })
    }

    fn run(&self, rx: Receiver<Command>) {
        info!(
            "[Scheduler] Started (interval {}s)",
            self.interval.as_secs_f64()
        );

        let mut last = (Trigger::Startup, self.fire(Trigger::Startup));
        // The persisted slot mirrors this value; the loop never re-reads it
        let mut next_due = self.schedule_next();

        loop {
            let wait = time_until(next_due).min(ALARM_TICK);
            match rx.recv_timeout(wait) {
                Ok(Command::SyncNow { reply }) => {
                    // A manual run leaves the alarm where it is
                    let outcome = self.fire(Trigger::Manual);
                    last = (Trigger::Manual, outcome.clone());
                    if reply.send(outcome).is_err() {
                        debug!("[Scheduler] Manual sync requester went away");
                    }
                }
                Ok(Command::Status { reply }) => {
                    let status = SchedulerStatus {
                        next_alarm_due: Some(next_due),
                        last_trigger: last.0,
                        last_outcome: last.1.clone(),
                    };
                    let _ = reply.send(status);
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    if time_until(next_due).is_zero() {
                        last = (Trigger::Alarm, self.fire(Trigger::Alarm));
                        next_due = self.schedule_next();
                    }
                }
            }
        }

        info!("[Scheduler] Stopped");
    }

    fn fire(&self, trigger: Trigger) -> SyncOutcome {
        info!("[Scheduler] {} sync triggered", trigger);
        let outcome = self.engine.sync_events();
        debug!("[Scheduler] {} sync finished: {}", trigger, outcome.message());
        outcome
    }

    /// Compute the next due time and persist it. A failed write only loses
    /// the cadence across restarts.
    fn schedule_next(&self) -> i64 {
        let due = now_millis() + self.interval.as_millis() as i64;
        if let Err(e) = self.state.set_sync_alarm_due(due) {
            warn!("[Scheduler] Cannot persist alarm: {}", e);
        }
        due
    }
}

/// Time left before `due` (wall-clock ms). Zero once it has passed.
fn time_until(due: i64) -> Duration {
    let remaining = due - now_millis();
    if remaining <= 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(remaining as u64)
    }
}

/// Handle to a running scheduler. Dropping it stops the loop.
pub struct SchedulerHandle {
    tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Queue a manual sync. Returns `None` when the loop has stopped.
    pub fn request_sync(&self) -> Option<Receiver<SyncOutcome>> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(Command::SyncNow { reply }).ok()?;
        Some(rx)
    }

    /// Run a manual sync and wait for its outcome.
    pub fn sync_now(&self) -> Option<SyncOutcome> {
        self.request_sync()?.recv().ok()
    }

    /// Ask the loop for its state. Waits for any sync in progress.
    pub fn status(&self) -> Option<SchedulerStatus> {
        let (reply, rx) = mpsc::channel();
        self.tx.send(Command::Status { reply }).ok()?;
        rx.recv().ok()
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| !thread.is_finished())
            .unwrap_or(false)
    }

    /// Block until the loop ends.
    pub fn wait(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[Scheduler] Loop panicked");
            }
        }
    }

    /// Stop the loop and wait for the current run to finish.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("[Scheduler] Loop panicked");
            }
        }
    }
}
