//! Notification events emitted by the scheduler and coordinator.
//!
//! Hosts receive these over a `crossbeam_channel` and decide how to present
//! them; the engine never blocks on a consumer.

use crate::error::FailureKind;
use crate::models::entry::DocumentId;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Duration;

/// Actions a host may offer alongside a persistent-failure notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    /// Attempt a snapshot on the next tick instead of waiting an interval.
    RetryNow,
    /// Turn autosave off globally.
    DisableAutosave,
}

/// Events published to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum AutosaveEvent {
    Saved {
        document_id: DocumentId,
        saved_at: DateTime<Utc>,
    },
    Failed {
        document_id: DocumentId,
        kind: FailureKind,
        message: String,
        consecutive_failures: u32,
    },
    /// A write has been in flight for more than twice the interval.
    SlowSave {
        document_id: DocumentId,
        elapsed: Duration,
    },
    InsufficientSpace {
        document_id: DocumentId,
        available: u64,
        required: u64,
    },
    TargetUnavailable {
        document_id: DocumentId,
        path: PathBuf,
    },
    /// Emitted once when consecutive failures reach the notification threshold.
    PersistentFailure {
        document_id: DocumentId,
        consecutive_failures: u32,
        last_error: String,
        actions: Vec<NotificationAction>,
    },
    CorruptedEntryDetected {
        document_id: Option<DocumentId>,
        snapshot_path: PathBuf,
        reason: String,
    },
}

impl AutosaveEvent {
    /// Document the event refers to, when there is one.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::Saved { document_id, .. }
            | Self::Failed { document_id, .. }
            | Self::SlowSave { document_id, .. }
            | Self::InsufficientSpace { document_id, .. }
            | Self::TargetUnavailable { document_id, .. }
            | Self::PersistentFailure { document_id, .. } => Some(document_id),
            Self::CorruptedEntryDetected { document_id, .. } => document_id.as_ref(),
        }
    }
}
