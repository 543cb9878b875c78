//! Per-document scheduling state.

use crate::models::status::SaveStatus;
use std::time::{Duration, Instant};

/// `Idle -> Pending -> Writing -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    /// Timer armed at `armed_at`; fires once the current interval elapses.
    Pending { armed_at: Instant },
    /// One write in flight; never more than one per document.
    Writing {
        started_at: Instant,
        slow_reported: bool,
    },
}

/// Scheduling slot for one registered document.
///
/// `rerun` is the single-slot mailbox: any number of dirty-marks during a
/// write collapse into one follow-up write.
#[derive(Debug)]
pub(crate) struct DocumentSlot {
    pub(crate) phase: Phase,
    /// Content changed since the last snapshot was captured.
    pub(crate) needs_snapshot: bool,
    pub(crate) rerun: bool,
    pub(crate) fire_now: bool,
    /// A manual save landed while writing; drop the snapshot once it completes.
    pub(crate) discard_on_complete: bool,
    /// Unregistered while writing; the slot goes away when the write completes.
    pub(crate) closing: bool,
    pub(crate) status: SaveStatus,
}

impl Default for DocumentSlot {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            needs_snapshot: false,
            rerun: false,
            fire_now: false,
            discard_on_complete: false,
            closing: false,
            status: SaveStatus::default(),
        }
    }
}

impl DocumentSlot {
    pub(crate) fn is_writing(&self) -> bool {
        matches!(self.phase, Phase::Writing { .. })
    }

    /// Record an edit. Starts the timer when idle and autosave is enabled.
    pub(crate) fn mark_dirty(&mut self, now: Instant, enabled: bool) {
        self.closing = false;
        self.needs_snapshot = true;
        match self.phase {
            Phase::Writing { .. } => self.rerun = true,
            Phase::Idle if enabled => self.phase = Phase::Pending { armed_at: now },
            Phase::Idle | Phase::Pending { .. } => {}
        }
    }

    /// Tombstone a slot whose write is still running.
    pub(crate) fn close(&mut self) {
        self.closing = true;
        self.needs_snapshot = false;
        self.rerun = false;
        self.fire_now = false;
    }

    /// Arm the timer if idle; a running timer keeps its original start.
    pub(crate) fn arm(&mut self, now: Instant) {
        if self.phase == Phase::Idle {
            self.phase = Phase::Pending { armed_at: now };
        }
    }

    /// Drop a pending timer. In-flight writes are left alone.
    pub(crate) fn cancel_timer(&mut self) {
        if matches!(self.phase, Phase::Pending { .. }) {
            self.phase = Phase::Idle;
        }
        self.fire_now = false;
    }

    /// `true` once a pending timer has run for `interval` or a retry was requested.
    pub(crate) fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.phase {
            Phase::Pending { armed_at } => {
                self.fire_now || now.saturating_duration_since(armed_at) >= interval
            }
            _ => false,
        }
    }

    /// Elapsed write time when the slow-save threshold was just crossed.
    pub(crate) fn take_slow_write(&mut self, now: Instant, interval: Duration) -> Option<Duration> {
        let Phase::Writing {
            started_at,
            slow_reported,
        } = &mut self.phase
        else {
            return None;
        };
        let elapsed = now.saturating_duration_since(*started_at);
        if *slow_reported || elapsed < interval.saturating_mul(2) {
            return None;
        }
        *slow_reported = true;
        Some(elapsed)
    }
}
