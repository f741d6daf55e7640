//! Capture module - Turn browser activity notifications into event records.
//!
//! Each notification kind has its own producer. A producer filters noise at
//! the source (repeated URLs, unchanged focus or idle state), builds exactly
//! one canonical record and appends it to the event store. A failed append
//! is logged and swallowed so the notification stream keeps flowing.

pub mod notification;

pub use notification::{ChangeInfo, IdleState, Notification};

use crate::event::{EventRecord, EventType};
use crate::storage::EventStore;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, error};

/// Last observed values used for noise filtering.
#[derive(Debug, Default)]
struct LastSeen {
    tab_urls: HashMap<i64, String>,
    focused_window: Option<i64>,
    idle_state: Option<IdleState>,
}

/// Capture layer writing into an event store.
pub struct Capture {
    store: EventStore,
    last_seen: Mutex<LastSeen>,
}

impl Capture {
    pub fn new(store: EventStore) -> Self {
        Self {
            store,
            last_seen: Mutex::new(LastSeen::default()),
        }
    }

    /// Handle one notification. Returns the stored record, or `None` when the
    /// notification was filtered out or could not be stored.
    pub fn handle(&self, notification: Notification) -> Option<EventRecord> {
        let (event_type, payload) = match notification {
            Notification::TabActivated {
                tab_id,
                window_id,
                url,
                title,
            } => {
                if let Some(url) = &url {
                    self.last_seen().tab_urls.insert(tab_id, url.clone());
                }
                (
                    EventType::TabActivated,
                    json!({"tabId": tab_id, "windowId": window_id, "url": url, "title": title}),
                )
            }
            Notification::TabUpdated {
                tab_id,
                window_id,
                change_info,
                title,
            } => {
                // Only URL changes are interesting
                let url = change_info.url?;
                if !self.remember_tab_url(tab_id, &url) {
                    debug!("[Capture] Tab {} still at {}, skipping", tab_id, url);
                    return None;
                }
                (
                    EventType::TabUpdated,
                    json!({"tabId": tab_id, "windowId": window_id, "url": url, "title": title}),
                )
            }
            Notification::TabCreated {
                tab_id,
                window_id,
                url,
            } => {
                if let Some(url) = &url {
                    self.last_seen().tab_urls.insert(tab_id, url.clone());
                }
                (
                    EventType::TabCreated,
                    json!({"tabId": tab_id, "windowId": window_id, "url": url}),
                )
            }
            Notification::TabRemoved { tab_id, window_id } => {
                self.last_seen().tab_urls.remove(&tab_id);
                (
                    EventType::TabRemoved,
                    json!({"tabId": tab_id, "windowId": window_id}),
                )
            }
            Notification::WindowFocusChanged { window_id } => {
                let mut last_seen = self.last_seen();
                if last_seen.focused_window == Some(window_id) {
                    return None;
                }
                last_seen.focused_window = Some(window_id);
                (
                    EventType::WindowFocusChanged,
                    json!({"windowId": window_id}),
                )
            }
            Notification::IdleStateChanged { state } => {
                let mut last_seen = self.last_seen();
                if last_seen.idle_state == Some(state) {
                    return None;
                }
                last_seen.idle_state = Some(state);
                (EventType::IdleStateChanged, json!({"state": state}))
            }
            Notification::Other { event_type, fields } => {
                (EventType::parse(&event_type), Value::Object(fields))
            }
        };

        self.record(event_type, into_map(payload))
    }

    /// Build and append one record. Store failures are logged, never raised.
    fn record(&self, event_type: EventType, payload: Map<String, Value>) -> Option<EventRecord> {
        let record = EventRecord::new(event_type, payload);
        match self.store.append(&record) {
            Ok(()) => {
                debug!("[Capture] {} {}", record.event_type, record.id);
                Some(record)
            }
            Err(e) => {
                error!("[Capture] {} error: {}", record.event_type, e);
                None
            }
        }
    }

    /// Returns true when `url` differs from the last URL seen for the tab.
    fn remember_tab_url(&self, tab_id: i64, url: &str) -> bool {
        let mut last_seen = self.last_seen();
        if last_seen.tab_urls.get(&tab_id).map(String::as_str) == Some(url) {
            return false;
        }
        last_seen.tab_urls.insert(tab_id, url.to_string());
        true
    }

    fn last_seen(&self) -> MutexGuard<'_, LastSeen> {
        // The filter state is advisory; recover it after a panic elsewhere
        self.last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
