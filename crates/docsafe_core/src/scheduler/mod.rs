//! Multiplexed per-document autosave scheduler.
//!
//! One driver thread ticks every registered document; due snapshots are
//! captured under the state lock and handed to a worker pool, so callers
//! never wait on disk I/O. Per document there is at most one write in flight
//! and at most one queued rerun.

mod slot;
mod worker;

#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::constants::{
    DEFAULT_WRITE_WORKERS, FAILURE_NOTIFY_THRESHOLD, SCHEDULER_POLL_INTERVAL,
};
use crate::documents::DocumentStore;
use crate::error::{RecoveryError, WriteError};
use crate::events::{AutosaveEvent, NotificationAction};
use crate::models::entry::{DocumentId, RecoveryEntry};
use crate::models::settings::AutosaveSettings;
use crate::models::status::{SaveState, SaveStatus};
use crate::store::settings::SettingsStore;
use crate::store::RecoveryStore;
use crossbeam_channel::{unbounded, Receiver, Sender};
use slot::{DocumentSlot, Phase};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use worker::WriteJob;

/// Destination of autosave snapshots.
///
/// [`RecoveryStore`] is the production sink; tests substitute failing or
/// blocking sinks.
pub trait SnapshotSink: Send + Sync {
    /// Discard counter for `document_id`; read when a write's content is captured.
    fn discard_epoch(&self, document_id: &DocumentId) -> u64;

    /// Durably persist one snapshot and record it in the index.
    ///
    /// # Returns
    /// `None` when the entry was discarded after `since_epoch` was read; the
    /// snapshot is dropped instead of recorded.
    ///
    /// # Errors
    /// Any [`WriteError`]; the scheduler counts it and retries.
    fn persist(
        &self,
        document_id: &DocumentId,
        since_epoch: u64,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<Option<RecoveryEntry>, WriteError>;

    /// Drop the snapshot for `document_id`, if any.
    ///
    /// # Errors
    /// Returns [`RecoveryError`] when the index cannot be updated.
    fn discard(&self, document_id: &DocumentId) -> Result<bool, RecoveryError>;
}

impl SnapshotSink for RecoveryStore {
    fn discard_epoch(&self, document_id: &DocumentId) -> u64 {
        RecoveryStore::discard_epoch(self, document_id)
    }

    fn persist(
        &self,
        document_id: &DocumentId,
        since_epoch: u64,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<Option<RecoveryEntry>, WriteError> {
        self.record_snapshot_since(document_id, since_epoch, source_path, content)
    }

    fn discard(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        RecoveryStore::discard(self, document_id)
    }
}

/// Thread layout of an [`AutosaveScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub write_workers: usize,
    /// Driver tick period; `None` means the host calls [`AutosaveScheduler::tick`].
    pub poll_interval: Option<Duration>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            write_workers: DEFAULT_WRITE_WORKERS,
            poll_interval: Some(SCHEDULER_POLL_INTERVAL),
        }
    }
}

impl SchedulerOptions {
    /// Worker count from `config`, default driver period.
    pub fn from_config(config: &Config) -> Self {
        Self {
            write_workers: config.write_workers,
            ..Self::default()
        }
    }

    /// No driver thread; ticks come from the caller.
    pub fn manual() -> Self {
        Self {
            poll_interval: None,
            ..Self::default()
        }
    }
}

type SlotsGuard<'a> = MutexGuard<'a, HashMap<DocumentId, DocumentSlot>>;

/// State shared between the public handle, the driver, and the workers.
pub(crate) struct Engine {
    sink: Arc<dyn SnapshotSink>,
    settings: Arc<SettingsStore>,
    documents: Arc<dyn DocumentStore>,
    events: Sender<AutosaveEvent>,
    slots: Mutex<HashMap<DocumentId, DocumentSlot>>,
    jobs: Mutex<Option<Sender<WriteJob>>>,
}

impl Engine {
    fn slots(&self) -> Result<SlotsGuard<'_>, RecoveryError> {
        self.slots.lock().map_err(|_| RecoveryError::StatePoisoned)
    }

    fn emit(&self, event: AutosaveEvent) {
        let _ = self.events.send(event);
    }

    /// Evaluate every timer against `now` and dispatch due writes.
    ///
    /// [`DocumentStore`] reads happen under the state lock; implementations
    /// must not call back into the scheduler.
    pub(crate) fn tick(&self, now: Instant) {
        let settings = self.settings.get();
        let interval = settings.interval();
        let mut jobs = Vec::new();
        {
            let Ok(mut slots) = self.slots() else {
                tracing::error!("Autosave state lock poisoned; skipping tick");
                return;
            };
            for (document_id, slot) in slots.iter_mut() {
                if let Some(elapsed) = slot.take_slow_write(now, interval) {
                    tracing::warn!(
                        document_id = %document_id,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Autosave write is running slow"
                    );
                    self.emit(AutosaveEvent::SlowSave {
                        document_id: document_id.clone(),
                        elapsed,
                    });
                    continue;
                }
                if !settings.enabled && !slot.fire_now {
                    slot.cancel_timer();
                    continue;
                }
                if !slot.is_due(now, interval) {
                    continue;
                }
                slot.fire_now = false;
                if !slot.needs_snapshot || !self.documents.is_dirty(document_id) {
                    slot.phase = Phase::Idle;
                    continue;
                }
                let Some(content) = self.documents.content(document_id) else {
                    slot.phase = Phase::Idle;
                    continue;
                };
                slot.needs_snapshot = false;
                slot.rerun = false;
                slot.phase = Phase::Writing {
                    started_at: now,
                    slow_reported: false,
                };
                slot.status.begin();
                jobs.push(WriteJob {
                    document_id: document_id.clone(),
                    since_epoch: self.sink.discard_epoch(document_id),
                    source_path: self.documents.source_path(document_id),
                    content,
                });
            }
        }
        for job in jobs {
            self.dispatch(job);
        }
    }

    fn dispatch(&self, job: WriteJob) {
        let sent = match self.jobs.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(sender) => sender.send(job).map_err(|err| err.into_inner()),
                None => Err(job),
            },
            Err(_) => Err(job),
        };
        if let Err(job) = sent {
            tracing::warn!(
                document_id = %job.document_id,
                "Autosave workers stopped; write not dispatched"
            );
            if let Ok(mut slots) = self.slots() {
                if let Some(slot) = slots.get_mut(&job.document_id) {
                    slot.phase = Phase::Idle;
                    slot.needs_snapshot = true;
                    slot.status.state = SaveState::Idle;
                }
            }
        }
    }

    /// Apply a finished write to the document's slot.
    pub(crate) fn complete(
        &self,
        document_id: &DocumentId,
        result: Result<Option<RecoveryEntry>, WriteError>,
    ) {
        let enabled = self.settings.get().enabled;
        let discard = {
            let Ok(mut slots) = self.slots() else {
                tracing::error!("Autosave state lock poisoned; dropping write result");
                return;
            };
            let Some(slot) = slots.get_mut(document_id) else {
                tracing::debug!(
                    document_id = %document_id,
                    "Write finished for unregistered document"
                );
                return;
            };
            match result {
                Ok(Some(entry)) => {
                    slot.status.succeed(entry.saved_at);
                    self.emit(AutosaveEvent::Saved {
                        document_id: document_id.clone(),
                        saved_at: entry.saved_at,
                    });
                }
                Ok(None) => slot.status.state = SaveState::Idle,
                Err(err) => self.record_failure(document_id, slot, err),
            }
            let rerun = std::mem::take(&mut slot.rerun);
            slot.phase = if enabled && (rerun || slot.needs_snapshot) {
                Phase::Pending {
                    armed_at: Instant::now(),
                }
            } else {
                Phase::Idle
            };
            let discard = std::mem::take(&mut slot.discard_on_complete);
            if slot.closing {
                slots.remove(document_id);
            }
            discard
        };
        if discard {
            if let Err(err) = self.sink.discard(document_id) {
                tracing::warn!(
                    document_id = %document_id,
                    "Failed to drop snapshot after manual save: {}",
                    err
                );
            }
        }
    }

    fn record_failure(&self, document_id: &DocumentId, slot: &mut DocumentSlot, err: WriteError) {
        let kind = err.kind();
        let message = err.to_string();
        let repeated = matches!(
            &slot.status.state,
            SaveState::Failed { kind: previous, .. } if *previous == kind
        );
        slot.needs_snapshot = true;
        let consecutive_failures = slot.status.fail(kind, message.clone());
        tracing::warn!(
            document_id = %document_id,
            consecutive_failures,
            "Autosave write failed: {}",
            message
        );
        self.emit(AutosaveEvent::Failed {
            document_id: document_id.clone(),
            kind,
            message: message.clone(),
            consecutive_failures,
        });
        if !repeated {
            match err {
                WriteError::InsufficientSpace {
                    available,
                    required,
                } => self.emit(AutosaveEvent::InsufficientSpace {
                    document_id: document_id.clone(),
                    available,
                    required,
                }),
                WriteError::TargetUnavailable { path, .. } => {
                    self.emit(AutosaveEvent::TargetUnavailable {
                        document_id: document_id.clone(),
                        path,
                    })
                }
                WriteError::Io(_) | WriteError::Serialization(_) => {}
            }
        }
        if consecutive_failures == FAILURE_NOTIFY_THRESHOLD {
            self.emit(AutosaveEvent::PersistentFailure {
                document_id: document_id.clone(),
                consecutive_failures,
                last_error: message,
                actions: vec![
                    NotificationAction::RetryNow,
                    NotificationAction::DisableAutosave,
                ],
            });
        }
    }
}

/// Handle owning the autosave engine, its worker pool, and optional driver.
///
/// Dropping the handle stops dispatch without waiting; use
/// [`AutosaveScheduler::shutdown`] to flush in-flight writes first.
pub struct AutosaveScheduler {
    engine: Arc<Engine>,
    driver: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_done: Receiver<()>,
}

impl AutosaveScheduler {
    /// Start a scheduler writing into `store`.
    ///
    /// # Errors
    /// Returns an error if a worker or driver thread cannot be spawned.
    pub fn start(
        store: Arc<RecoveryStore>,
        documents: Arc<dyn DocumentStore>,
        events: Sender<AutosaveEvent>,
        options: SchedulerOptions,
    ) -> io::Result<Self> {
        let settings = Arc::clone(store.settings());
        Self::with_sink(store, settings, documents, events, options)
    }

    /// Start a scheduler writing into an arbitrary [`SnapshotSink`].
    ///
    /// # Errors
    /// Returns an error if a worker or driver thread cannot be spawned.
    pub fn with_sink(
        sink: Arc<dyn SnapshotSink>,
        settings: Arc<SettingsStore>,
        documents: Arc<dyn DocumentStore>,
        events: Sender<AutosaveEvent>,
        options: SchedulerOptions,
    ) -> io::Result<Self> {
        let (job_tx, job_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        let engine = Arc::new(Engine {
            sink,
            settings,
            documents,
            events,
            slots: Mutex::new(HashMap::new()),
            jobs: Mutex::new(Some(job_tx)),
        });
        let workers =
            worker::spawn_workers(&engine, &job_rx, &done_tx, options.write_workers)?;
        let driver = match options.poll_interval {
            Some(poll) => {
                let (stop_tx, stop_rx) = unbounded();
                let handle = worker::spawn_driver(Arc::clone(&engine), poll, stop_rx)?;
                Some((stop_tx, handle))
            }
            None => None,
        };
        tracing::info!(
            workers = workers.len(),
            driver = driver.is_some(),
            "Autosave scheduler started"
        );
        Ok(Self {
            engine,
            driver: Mutex::new(driver),
            workers: Mutex::new(workers),
            worker_done: done_rx,
        })
    }

    /// Start tracking `document_id`. A document that is already dirty gets a timer.
    pub fn register(&self, document_id: DocumentId) -> Result<(), RecoveryError> {
        let enabled = self.engine.settings.get().enabled;
        let dirty = self.engine.documents.is_dirty(&document_id);
        let mut slots = self.engine.slots()?;
        let slot = slots.entry(document_id).or_default();
        slot.closing = false;
        if dirty {
            slot.mark_dirty(Instant::now(), enabled);
        }
        Ok(())
    }

    /// Stop tracking `document_id`; an in-flight write still completes.
    ///
    /// A slot that is writing stays as a tombstone until its write finishes,
    /// so a re-registration never starts a second write alongside it.
    ///
    /// # Returns
    /// `true` when the document was registered.
    pub fn unregister(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        let mut slots = self.engine.slots()?;
        let writing = match slots.get_mut(document_id) {
            Some(slot) if slot.closing => return Ok(false),
            Some(slot) if slot.is_writing() => {
                slot.close();
                true
            }
            Some(_) => false,
            None => return Ok(false),
        };
        if !writing {
            slots.remove(document_id);
        }
        Ok(true)
    }

    /// Record an edit to `document_id`, registering it if needed.
    pub fn mark_dirty(&self, document_id: &DocumentId) -> Result<(), RecoveryError> {
        self.mark_dirty_at(document_id, Instant::now())
    }

    /// [`Self::mark_dirty`] with an explicit clock reading.
    pub fn mark_dirty_at(
        &self,
        document_id: &DocumentId,
        now: Instant,
    ) -> Result<(), RecoveryError> {
        let enabled = self.engine.settings.get().enabled;
        let mut slots = self.engine.slots()?;
        slots
            .entry(document_id.clone())
            .or_default()
            .mark_dirty(now, enabled);
        Ok(())
    }

    /// Evaluate timers against `now`. The driver thread calls this on its own.
    pub fn tick(&self, now: Instant) {
        self.engine.tick(now);
    }

    /// Manual-save hook: cancel the pending snapshot and drop the stored entry.
    ///
    /// A write already in flight finishes and its snapshot is dropped afterwards.
    ///
    /// # Errors
    /// Returns [`RecoveryError`] when the entry cannot be removed.
    pub fn on_manual_save(&self, document_id: &DocumentId) -> Result<(), RecoveryError> {
        let writing = {
            let mut slots = self.engine.slots()?;
            match slots.get_mut(document_id) {
                Some(slot) => {
                    slot.needs_snapshot = false;
                    slot.rerun = false;
                    slot.cancel_timer();
                    slot.discard_on_complete = slot.is_writing();
                    slot.discard_on_complete
                }
                None => false,
            }
        };
        if !writing {
            self.engine.sink.discard(document_id)?;
        }
        Ok(())
    }

    /// Enable or disable autosave globally and persist the choice.
    ///
    /// Disabling cancels pending timers; in-flight writes finish.
    pub fn set_enabled(&self, enabled: bool) -> Result<AutosaveSettings, RecoveryError> {
        let applied = self
            .engine
            .settings
            .update(|settings| settings.enabled = enabled)?;
        let now = Instant::now();
        let mut slots = self.engine.slots()?;
        for slot in slots.values_mut() {
            if !enabled {
                slot.cancel_timer();
            } else if slot.needs_snapshot {
                slot.arm(now);
            }
        }
        tracing::info!(enabled, "Autosave toggled");
        Ok(applied)
    }

    /// Change the autosave interval; clamped, persisted, and applied on the next tick.
    pub fn set_interval_ms(&self, interval_ms: u64) -> Result<AutosaveSettings, RecoveryError> {
        let applied = self
            .engine
            .settings
            .update(|settings| settings.interval_ms = interval_ms)?;
        tracing::info!(interval_ms = applied.interval_ms, "Autosave interval changed");
        Ok(applied)
    }

    /// Apply an action chosen from a persistent-failure notification.
    pub fn handle_action(
        &self,
        document_id: &DocumentId,
        action: NotificationAction,
    ) -> Result<(), RecoveryError> {
        match action {
            NotificationAction::RetryNow => {
                let mut slots = self.engine.slots()?;
                let slot = slots
                    .get_mut(document_id)
                    .filter(|slot| !slot.closing)
                    .ok_or_else(|| RecoveryError::NotFound(document_id.clone()))?;
                slot.fire_now = true;
                slot.arm(Instant::now());
                Ok(())
            }
            NotificationAction::DisableAutosave => self.set_enabled(false).map(|_| ()),
        }
    }

    /// Current save status of `document_id`.
    pub fn status(&self, document_id: &DocumentId) -> Option<SaveStatus> {
        self.engine
            .slots()
            .ok()?
            .get(document_id)
            .filter(|slot| !slot.closing)
            .map(|slot| slot.status.clone())
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> AutosaveSettings {
        self.engine.settings.get()
    }

    fn stop_dispatch(&self) {
        let driver = match self.driver.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some((stop, handle)) = driver {
            let _ = stop.send(());
            if handle.join().is_err() {
                tracing::error!("Autosave driver thread panicked");
            }
        }
        match self.engine.jobs.lock() {
            Ok(mut guard) => drop(guard.take()),
            Err(poisoned) => drop(poisoned.into_inner().take()),
        }
    }

    /// Stop timers and wait up to `timeout` for in-flight writes to finish.
    ///
    /// # Returns
    /// `true` when every worker drained before the deadline.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.stop_dispatch();
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let deadline = Instant::now() + timeout;
        for _ in 0..workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.worker_done.recv_timeout(remaining).is_err() {
                tracing::warn!("Autosave shutdown deadline passed with writes in flight");
                return false;
            }
        }
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("Autosave worker thread panicked");
            }
        }
        tracing::info!("Autosave scheduler stopped");
        true
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.stop_dispatch();
    }
}
