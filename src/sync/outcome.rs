//! Structured sync results.
//!
//! Every sync entry point returns a `SyncOutcome` rather than an error, so
//! triggers never see an unhandled failure.

use crate::error::CollectorError;
use serde::Serialize;

/// Why a sync run did not deliver the whole backlog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncFailure {
    /// No bearer token present; nothing was attempted.
    NotAuthenticated,
    /// The collector rejected the token mid-run; the token was cleared.
    AuthExpired,
    /// Network or HTTP-layer failure; retried by the next trigger.
    TransportFailure,
    /// Local store could not be read or confirmed ids could not be deleted.
    Store,
    /// Anything else (unreadable collector reply, credential backend error).
    Unknown,
}

impl SyncFailure {
    /// Whether the operator has to log in again.
    pub fn requires_auth(&self) -> bool {
        matches!(self, Self::NotAuthenticated | Self::AuthExpired)
    }
}

impl From<&CollectorError> for SyncFailure {
    fn from(err: &CollectorError) -> Self {
        match err {
            CollectorError::Unauthorized => Self::AuthExpired,
            CollectorError::Status { .. } | CollectorError::Transport(_) => Self::TransportFailure,
            CollectorError::InvalidResponse(_) => Self::Unknown,
        }
    }
}

/// Result of one `sync_events` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every batch was acknowledged and deleted locally.
    Synced { synced: usize },
    /// The run stopped early. `synced` counts events confirmed before the
    /// failure.
    Failed {
        failure: SyncFailure,
        message: String,
        synced: usize,
    },
    /// Another run held the single-flight guard; nothing was done.
    AlreadyRunning,
}

impl SyncOutcome {
    pub fn failed(failure: SyncFailure, message: impl Into<String>, synced: usize) -> Self {
        Self::Failed {
            failure,
            message: message.into(),
            synced,
        }
    }

    pub fn not_authenticated() -> Self {
        Self::failed(SyncFailure::NotAuthenticated, "Not authenticated", 0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }

    pub fn requires_auth(&self) -> bool {
        match self {
            Self::Failed { failure, .. } => failure.requires_auth(),
            _ => false,
        }
    }

    /// Events confirmed by the collector during this run.
    pub fn synced(&self) -> usize {
        match self {
            Self::Synced { synced } | Self::Failed { synced, .. } => *synced,
            Self::AlreadyRunning => 0,
        }
    }

    pub fn failure(&self) -> Option<SyncFailure> {
        match self {
            Self::Failed { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Synced { synced: 0 } => "No events to sync".to_string(),
            Self::Synced { .. } => "Sync complete".to_string(),
            Self::Failed { message, .. } => message.clone(),
            Self::AlreadyRunning => "Sync already in progress".to_string(),
        }
    }
}

/// Wire shape of a sync result: `{success, synced, requiresAuth, message}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub synced: usize,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub requires_auth: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<SyncFailure>,
}

impl From<&SyncOutcome> for SyncReport {
    fn from(outcome: &SyncOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            synced: outcome.synced(),
            requires_auth: outcome.requires_auth(),
            message: outcome.message(),
            error: outcome.failure(),
        }
    }
}
