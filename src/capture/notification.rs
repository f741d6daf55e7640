//! Activity notifications as delivered by the browser extension.

use crate::event::EventType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Browser idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Fields that changed in a tab update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChangeInfo {
    #[serde(default)]
    pub url: Option<String>,
}

/// One activity notification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: i64,
        window_id: i64,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: i64,
        window_id: i64,
        #[serde(default)]
        change_info: ChangeInfo,
        #[serde(default)]
        title: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabCreated {
        tab_id: i64,
        window_id: i64,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: i64, window_id: i64 },
    #[serde(rename_all = "camelCase")]
    WindowFocusChanged { window_id: i64 },
    IdleStateChanged { state: IdleState },
    /// A kind this client does not know; kept with its raw fields.
    #[serde(skip)]
    Other {
        event_type: String,
        fields: Map<String, Value>,
    },
}

impl Notification {
    /// Parse a tagged JSON object (`{"type": "TAB_ACTIVATED", ...}`).
    ///
    /// Unknown tags become `Other`. A known tag with malformed fields is an
    /// error.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let tag = value
            .get("type")
            .and_then(Value::as_str)
            .map(EventType::parse);

        match tag {
            Some(EventType::Other(event_type)) => {
                let mut fields = match value {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                fields.remove("type");
                Ok(Self::Other { event_type, fields })
            }
            _ => serde_json::from_value(value),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            Self::TabActivated { .. } => EventType::TabActivated,
            Self::TabUpdated { .. } => EventType::TabUpdated,
            Self::TabCreated { .. } => EventType::TabCreated,
            Self::TabRemoved { .. } => EventType::TabRemoved,
            Self::WindowFocusChanged { .. } => EventType::WindowFocusChanged,
            Self::IdleStateChanged { .. } => EventType::IdleStateChanged,
            Self::Other { event_type, .. } => EventType::parse(event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tab_updated() {
        let notification = Notification::from_value(json!({
            "type": "TAB_UPDATED",
            "tabId": 3,
            "windowId": 1,
            "changeInfo": {"url": "https://example.com", "status": "loading"},
            "title": "Example"
        }))
        .unwrap();

        assert_eq!(
            notification,
            Notification::TabUpdated {
                tab_id: 3,
                window_id: 1,
                change_info: ChangeInfo {
                    url: Some("https://example.com".into())
                },
                title: Some("Example".into()),
            }
        );
    }

    #[test]
    fn test_parse_idle_state() {
        let notification =
            Notification::from_value(json!({"type": "IDLE_STATE_CHANGED", "state": "locked"}))
                .unwrap();
        assert_eq!(
            notification,
            Notification::IdleStateChanged {
                state: IdleState::Locked
            }
        );
        assert_eq!(notification.event_type(), EventType::IdleStateChanged);
    }

    #[test]
    fn test_unknown_type_becomes_other() {
        let notification =
            Notification::from_value(json!({"type": "BOOKMARK_ADDED", "bookmarkId": "x1"}))
                .unwrap();

        match notification {
            Notification::Other { event_type, fields } => {
                assert_eq!(event_type, "BOOKMARK_ADDED");
                assert_eq!(fields.get("bookmarkId"), Some(&json!("x1")));
                assert!(!fields.contains_key("type"));
            }
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_known_type_is_error() {
        let result = Notification::from_value(json!({"type": "TAB_REMOVED", "tabId": "nope"}));
        assert!(result.is_err());
    }
}
