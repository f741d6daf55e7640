use std::path::PathBuf;
use thiserror::Error;

/// Failures of the local event store and state slots.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot create store directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot open event database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Event {0} already exists in the store")]
    DuplicateId(String),

    #[error("Stored payload of event {id} is not valid JSON: {source}")]
    CorruptPayload {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store connection lock poisoned")]
    Poisoned,
}

/// Failures reading or writing the bearer token slot.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Bearer token must not be empty")]
    EmptyToken,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),
}

/// Failures transmitting one batch to the collector.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Authentication failed - token may be expired")]
    Unauthorized,

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected collector response: {0}")]
    InvalidResponse(String),
}

/// Failures of the native-messaging frame codec.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },

    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl CollectorError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
