//! Canonical event record - the unit of durability and transport.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

/// Current payload schema version stamped on every captured event.
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of captured activity.
///
/// Unknown tags are preserved verbatim in `Other` so newer producers never
/// break capture or sync on older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    TabActivated,
    TabUpdated,
    TabCreated,
    TabRemoved,
    WindowFocusChanged,
    IdleStateChanged,
    Other(String),
}

impl EventType {
    /// All known kinds.
    pub const KNOWN: [EventType; 6] = [
        EventType::TabActivated,
        EventType::TabUpdated,
        EventType::TabCreated,
        EventType::TabRemoved,
        EventType::WindowFocusChanged,
        EventType::IdleStateChanged,
    ];

    /// Wire tag (e.g. `TAB_ACTIVATED`).
    pub fn as_str(&self) -> &str {
        match self {
            Self::TabActivated => "TAB_ACTIVATED",
            Self::TabUpdated => "TAB_UPDATED",
            Self::TabCreated => "TAB_CREATED",
            Self::TabRemoved => "TAB_REMOVED",
            Self::WindowFocusChanged => "WINDOW_FOCUS_CHANGED",
            Self::IdleStateChanged => "IDLE_STATE_CHANGED",
            Self::Other(tag) => tag,
        }
    }

    /// Parse a wire tag. Never fails.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "TAB_ACTIVATED" => Self::TabActivated,
            "TAB_UPDATED" => Self::TabUpdated,
            "TAB_CREATED" => Self::TabCreated,
            "TAB_REMOVED" => Self::TabRemoved,
            "WINDOW_FOCUS_CHANGED" => Self::WindowFocusChanged,
            "IDLE_STATE_CHANGED" => Self::IdleStateChanged,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::parse(&tag))
    }
}

/// A captured activity event.
///
/// Serialized with the collector's field names (`_id`, `v`, `type`, `ts`,
/// `payload`). Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "v")]
    pub schema_version: u32,
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Wall-clock milliseconds since epoch at capture time.
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl EventRecord {
    /// Create a record with a fresh id, the current schema version and the
    /// current wall-clock time.
    pub fn new(event_type: EventType, payload: Map<String, Value>) -> Self {
        Self {
            id: new_event_id(),
            schema_version: SCHEMA_VERSION,
            event_type,
            timestamp: now_millis(),
            payload,
        }
    }
}

/// Generate a globally unique event id.
pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current wall-clock time in milliseconds since epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
