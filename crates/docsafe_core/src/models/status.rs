//! Per-document save status exposed for observability.

use crate::error::FailureKind;
use chrono::{DateTime, Utc};

/// Save state machine: `Idle -> Saving -> (Saved | Failed)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Saving,
    Saved,
    Failed { kind: FailureKind, message: String },
}

/// Snapshot of one document's autosave status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveStatus {
    pub state: SaveState,
    pub consecutive_failures: u32,
    pub last_saved_at: Option<DateTime<Utc>>,
}

impl Default for SaveStatus {
    fn default() -> Self {
        Self {
            state: SaveState::Idle,
            consecutive_failures: 0,
            last_saved_at: None,
        }
    }
}

impl SaveStatus {
    pub(crate) fn begin(&mut self) {
        self.state = SaveState::Saving;
    }

    pub(crate) fn succeed(&mut self, saved_at: DateTime<Utc>) {
        self.state = SaveState::Saved;
        self.consecutive_failures = 0;
        self.last_saved_at = Some(saved_at);
    }

    /// Record a failure.
    ///
    /// # Returns
    /// The updated consecutive-failure count.
    pub(crate) fn fail(&mut self, kind: FailureKind, message: String) -> u32 {
        self.state = SaveState::Failed { kind, message };
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}
