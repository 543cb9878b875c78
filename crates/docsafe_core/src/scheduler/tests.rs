use super::*;
use crate::coordinator::RecoveryCoordinator;
use crate::documents::MemoryDocuments;
use crate::test_support::setup_temp_store;
use chrono::Utc;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;
use tempfile::TempDir;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
enum SinkFailure {
    DiskFull,
    Io,
}

#[derive(Default)]
struct RecordingSink {
    failure: Mutex<Option<SinkFailure>>,
    gate: Mutex<Option<Receiver<()>>>,
    delay: Duration,
    writes: Mutex<Vec<(DocumentId, String)>>,
    discarded: Mutex<Vec<DocumentId>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingSink {
    fn failing(failure: SinkFailure) -> Self {
        Self {
            failure: Mutex::new(Some(failure)),
            ..Self::default()
        }
    }

    fn gated(gate: Receiver<()>) -> Self {
        Self {
            gate: Mutex::new(Some(gate)),
            ..Self::default()
        }
    }

    fn set_failure(&self, failure: Option<SinkFailure>) {
        *self.failure.lock().expect("failure lock") = failure;
    }

    fn writes(&self) -> Vec<(DocumentId, String)> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl SnapshotSink for RecordingSink {
    fn discard_epoch(&self, _document_id: &DocumentId) -> u64 {
        0
    }

    fn persist(
        &self,
        document_id: &DocumentId,
        _since_epoch: u64,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<Option<RecoveryEntry>, WriteError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let gate = self.gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(EVENT_TIMEOUT);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let failure = *self.failure.lock().expect("failure lock");
        let result = match failure {
            Some(SinkFailure::DiskFull) => Err(WriteError::InsufficientSpace {
                available: 1,
                required: 100,
            }),
            Some(SinkFailure::Io) => Err(WriteError::Io(io::Error::new(
                io::ErrorKind::Other,
                "simulated disk error",
            ))),
            None => {
                self.writes
                    .lock()
                    .expect("writes lock")
                    .push((document_id.clone(), content.to_string()));
                Ok(Some(RecoveryEntry::new(
                    document_id.clone(),
                    source_path.map(Path::to_path_buf),
                    content.to_string(),
                    None,
                    Utc::now(),
                )))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn discard(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        self.discarded
            .lock()
            .expect("discarded lock")
            .push(document_id.clone());
        Ok(true)
    }
}

/// Real store behind a gate, so a write can be held open mid-flight.
struct GatedStore {
    store: Arc<RecoveryStore>,
    gate: Receiver<()>,
}

impl SnapshotSink for GatedStore {
    fn discard_epoch(&self, document_id: &DocumentId) -> u64 {
        self.store.discard_epoch(document_id)
    }

    fn persist(
        &self,
        document_id: &DocumentId,
        since_epoch: u64,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<Option<RecoveryEntry>, WriteError> {
        let _ = self.gate.recv_timeout(EVENT_TIMEOUT);
        self.store
            .record_snapshot_since(document_id, since_epoch, source_path, content)
    }

    fn discard(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        self.store.discard(document_id)
    }
}

struct Harness {
    _dir: TempDir,
    sink: Arc<RecordingSink>,
    docs: Arc<MemoryDocuments>,
    scheduler: AutosaveScheduler,
    events: Receiver<AutosaveEvent>,
    interval: Duration,
}

fn harness(sink: RecordingSink) -> Harness {
    let dir = TempDir::new().expect("temp dir");
    let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")));
    let interval = settings.get().interval();
    let sink = Arc::new(sink);
    let docs = Arc::new(MemoryDocuments::new());
    let (events_tx, events) = unbounded();
    let scheduler = AutosaveScheduler::with_sink(
        sink.clone(),
        settings,
        docs.clone(),
        events_tx,
        SchedulerOptions::manual(),
    )
    .expect("start scheduler");
    Harness {
        _dir: dir,
        sink,
        docs,
        scheduler,
        events,
        interval,
    }
}

fn open_dirty(docs: &MemoryDocuments, id: &DocumentId, content: &str) {
    docs.open(id.clone(), None, "");
    assert!(docs.edit(id, content));
}

fn wait_for(
    events: &Receiver<AutosaveEvent>,
    seen: &mut Vec<AutosaveEvent>,
    wanted: impl Fn(&AutosaveEvent) -> bool,
) -> AutosaveEvent {
    loop {
        let event = events
            .recv_timeout(EVENT_TIMEOUT)
            .expect("timed out waiting for autosave event");
        seen.push(event.clone());
        if wanted(&event) {
            return event;
        }
    }
}

fn is_saved(event: &AutosaveEvent) -> bool {
    matches!(event, AutosaveEvent::Saved { .. })
}

fn wait_until_not_saving(scheduler: &AutosaveScheduler, id: &DocumentId) {
    for _ in 0..500 {
        let saving = scheduler
            .status(id)
            .is_some_and(|status| status.state == SaveState::Saving);
        if !saving {
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("write for {id} never completed");
}

fn is_failed(event: &AutosaveEvent) -> bool {
    matches!(event, AutosaveEvent::Failed { .. })
}

#[test]
fn dirty_document_is_snapshotted_once_interval_elapses() {
    let (_dir, store) = setup_temp_store();
    let docs = Arc::new(MemoryDocuments::new());
    let (events_tx, events) = unbounded();
    let scheduler = AutosaveScheduler::start(
        store.clone(),
        docs.clone(),
        events_tx,
        SchedulerOptions::manual(),
    )
    .expect("start scheduler");
    let interval = scheduler.settings().interval();

    let id = DocumentId::new("doc-a");
    open_dirty(&docs, &id, "first draft");
    let dirty_at = Utc::now();
    let t0 = Instant::now();
    scheduler.mark_dirty_at(&id, t0).expect("mark dirty");

    scheduler.tick(t0 + interval - Duration::from_millis(1));
    assert_eq!(
        scheduler.status(&id).expect("status").state,
        SaveState::Idle
    );

    scheduler.tick(t0 + interval);
    let mut seen = Vec::new();
    wait_for(&events, &mut seen, is_saved);

    let entry = store.read_entry(&id).expect("read").expect("entry");
    assert_eq!(entry.content, "first draft");
    assert!(entry.saved_at >= dirty_at);
    assert!(docs.is_dirty(&id), "autosave must not clear the dirty flag");

    let status = scheduler.status(&id).expect("status");
    assert_eq!(status.state, SaveState::Saved);
    assert_eq!(status.last_saved_at, Some(entry.saved_at));
    assert!(scheduler.shutdown(EVENT_TIMEOUT));
}

#[test]
fn clean_document_is_not_written() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-a");
    h.docs.open(id.clone(), None, "saved text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark dirty");

    h.scheduler.tick(t0 + h.interval);
    assert_eq!(
        h.scheduler.status(&id).expect("status").state,
        SaveState::Idle
    );
    assert!(h.sink.writes().is_empty());
}

#[test]
fn sustained_failures_notify_once_and_keep_retrying() {
    let h = harness(RecordingSink::failing(SinkFailure::DiskFull));
    let id = DocumentId::new("doc-b");
    open_dirty(&h.docs, &id, "unsaved");
    h.scheduler
        .mark_dirty_at(&id, Instant::now())
        .expect("mark dirty");

    let mut seen = Vec::new();
    for _ in 0..60 {
        h.scheduler.tick(Instant::now() + h.interval);
        wait_for(&h.events, &mut seen, is_failed);
    }
    seen.extend(h.events.try_iter());

    let failed = seen.iter().filter(|event| is_failed(event)).count();
    let persistent: Vec<&AutosaveEvent> = seen
        .iter()
        .filter(|event| matches!(event, AutosaveEvent::PersistentFailure { .. }))
        .collect();
    let space = seen
        .iter()
        .filter(|event| matches!(event, AutosaveEvent::InsufficientSpace { .. }))
        .count();
    assert_eq!(failed, 60);
    assert_eq!(persistent.len(), 1);
    assert_eq!(space, 1);
    match persistent[0] {
        AutosaveEvent::PersistentFailure {
            consecutive_failures,
            actions,
            ..
        } => {
            assert_eq!(*consecutive_failures, FAILURE_NOTIFY_THRESHOLD);
            assert!(actions.contains(&NotificationAction::RetryNow));
            assert!(actions.contains(&NotificationAction::DisableAutosave));
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(
        h.scheduler
            .status(&id)
            .expect("status")
            .consecutive_failures,
        60
    );

    h.sink.set_failure(None);
    h.scheduler.tick(Instant::now() + h.interval);
    wait_for(&h.events, &mut seen, is_saved);
    let status = h.scheduler.status(&id).expect("status");
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(status.state, SaveState::Saved);
}

#[test]
fn io_failures_reach_threshold_without_space_event() {
    let h = harness(RecordingSink::failing(SinkFailure::Io));
    let id = DocumentId::new("doc-io");
    open_dirty(&h.docs, &id, "text");
    h.scheduler
        .mark_dirty_at(&id, Instant::now())
        .expect("mark dirty");

    let mut seen = Vec::new();
    for _ in 0..3 {
        h.scheduler.tick(Instant::now() + h.interval);
        wait_for(&h.events, &mut seen, is_failed);
    }
    seen.extend(h.events.try_iter());
    assert!(seen
        .iter()
        .any(|event| matches!(event, AutosaveEvent::PersistentFailure { .. })));
    assert!(!seen.iter().any(|event| matches!(
        event,
        AutosaveEvent::InsufficientSpace { .. } | AutosaveEvent::TargetUnavailable { .. }
    )));
}

#[test]
fn concurrent_dirty_marks_never_overlap_writes() {
    let h = harness(RecordingSink {
        delay: Duration::from_millis(5),
        ..RecordingSink::default()
    });
    let id = DocumentId::new("doc-hot");
    open_dirty(&h.docs, &id, "edit-start");

    let scheduler = Arc::new(h.scheduler);
    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let interval = h.interval;
    let mut handles = Vec::new();
    for worker in 0..threads {
        let scheduler = scheduler.clone();
        let docs = h.docs.clone();
        let barrier = barrier.clone();
        let id = id.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for round in 0..50 {
                docs.edit(&id, &format!("edit-{worker}-{round}"));
                scheduler.mark_dirty(&id).expect("mark dirty");
                scheduler.tick(Instant::now() + interval * 2);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("edit thread");
    }

    let latest = h.docs.content(&id).expect("content");
    let mut settled = false;
    for _ in 0..500 {
        scheduler.tick(Instant::now() + interval * 2);
        thread::sleep(Duration::from_millis(10));
        let last_write = h.sink.writes().last().map(|(_, content)| content.clone());
        let idle = scheduler
            .status(&id)
            .is_some_and(|status| status.state == SaveState::Saved);
        if idle && last_write.as_deref() == Some(latest.as_str()) {
            settled = true;
            break;
        }
    }
    assert!(settled, "latest content was never snapshotted");
    assert_eq!(h.sink.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(h.docs.is_dirty(&id));
}

#[test]
fn edits_during_write_coalesce_into_one_rerun() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-c");
    open_dirty(&h.docs, &id, "v1");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark dirty");
    h.scheduler.tick(t0 + h.interval);
    assert_eq!(
        h.scheduler.status(&id).expect("status").state,
        SaveState::Saving
    );

    for n in 2..=6 {
        h.docs.edit(&id, &format!("v{n}"));
        h.scheduler.mark_dirty(&id).expect("mark dirty");
        h.scheduler.tick(Instant::now() + h.interval * 10);
    }
    drop(release);

    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    h.scheduler.tick(Instant::now() + h.interval);
    wait_for(&h.events, &mut seen, is_saved);
    h.scheduler.tick(Instant::now() + h.interval * 2);

    let writes = h.sink.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].1, "v1");
    assert_eq!(writes[1].1, "v6");
    assert_eq!(h.sink.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn long_write_emits_slow_save_once() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-slow");
    open_dirty(&h.docs, &id, "big document");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark dirty");
    let started = t0 + h.interval;
    h.scheduler.tick(started);

    h.scheduler.tick(started + h.interval);
    assert!(h.events.try_recv().is_err());

    h.scheduler.tick(started + h.interval * 2);
    match h.events.recv_timeout(EVENT_TIMEOUT).expect("slow save") {
        AutosaveEvent::SlowSave {
            document_id,
            elapsed,
        } => {
            assert_eq!(document_id, id);
            assert!(elapsed >= h.interval * 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    h.scheduler.tick(started + h.interval * 3);
    assert!(h.events.try_recv().is_err());

    drop(release);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
}

#[test]
fn interval_change_applies_on_next_tick() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-i");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark dirty");

    let short = Duration::from_millis(crate::constants::MIN_AUTOSAVE_INTERVAL_MS);
    h.scheduler.tick(t0 + short);
    assert_eq!(
        h.scheduler.status(&id).expect("status").state,
        SaveState::Idle
    );

    let applied = h
        .scheduler
        .set_interval_ms(1)
        .expect("set interval");
    assert_eq!(applied.interval(), short);
    h.scheduler.tick(t0 + short);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
}

#[test]
fn disabling_cancels_timers_but_finishes_in_flight_write() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let writing = DocumentId::new("doc-writing");
    let waiting = DocumentId::new("doc-waiting");
    open_dirty(&h.docs, &writing, "in flight");
    open_dirty(&h.docs, &waiting, "never written");

    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&writing, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);
    h.scheduler
        .mark_dirty_at(&waiting, t0 + h.interval)
        .expect("mark");

    let applied = h.scheduler.set_enabled(false).expect("disable");
    assert!(!applied.enabled);
    drop(release);

    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    h.scheduler.tick(t0 + h.interval * 10);
    h.scheduler.mark_dirty(&writing).expect("mark while disabled");
    h.scheduler.tick(Instant::now() + h.interval * 10);

    let writes = h.sink.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, writing);
    assert_eq!(
        h.scheduler.status(&waiting).expect("status").state,
        SaveState::Idle
    );
}

#[test]
fn reenabling_rearms_documents_with_unsaved_changes() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-r");
    open_dirty(&h.docs, &id, "text");
    h.scheduler.set_enabled(false).expect("disable");
    h.scheduler.mark_dirty(&id).expect("mark");
    h.scheduler.tick(Instant::now() + h.interval);
    assert!(h.sink.writes().is_empty());

    h.scheduler.set_enabled(true).expect("enable");
    h.scheduler.tick(Instant::now() + h.interval);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
}

#[test]
fn manual_save_cancels_timer_and_discards_entry() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-m");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");

    assert!(h.docs.mark_saved(&id));
    h.scheduler.on_manual_save(&id).expect("manual save");
    h.scheduler.tick(t0 + h.interval);

    assert!(h.sink.writes().is_empty());
    assert_eq!(
        h.sink.discarded.lock().expect("discarded").as_slice(),
        &[id]
    );
}

#[test]
fn manual_save_during_write_discards_after_completion() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-mw");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);

    h.docs.mark_saved(&id);
    h.scheduler.on_manual_save(&id).expect("manual save");
    assert!(h.sink.discarded.lock().expect("discarded").is_empty());
    drop(release);

    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    // Discard runs right after the completion releases the state lock.
    for _ in 0..100 {
        if !h.sink.discarded.lock().expect("discarded").is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(
        h.sink.discarded.lock().expect("discarded").as_slice(),
        &[id]
    );
}

#[test]
fn retry_now_skips_the_interval() {
    let h = harness(RecordingSink::failing(SinkFailure::Io));
    let id = DocumentId::new("doc-retry");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_failed);

    h.sink.set_failure(None);
    h.scheduler
        .handle_action(&id, NotificationAction::RetryNow)
        .expect("retry");
    h.scheduler.tick(Instant::now());
    wait_for(&h.events, &mut seen, is_saved);
}

#[test]
fn disable_action_turns_autosave_off() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-d");
    h.scheduler.register(id.clone()).expect("register");
    h.scheduler
        .handle_action(&id, NotificationAction::DisableAutosave)
        .expect("disable");
    assert!(!h.scheduler.settings().enabled);
}

#[test]
fn registering_a_dirty_document_arms_its_timer() {
    let h = harness(RecordingSink::default());
    let id = DocumentId::new("doc-reg");
    open_dirty(&h.docs, &id, "recovered text");
    h.scheduler.register(id.clone()).expect("register");
    h.scheduler.tick(Instant::now() + h.interval);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    assert!(h.scheduler.unregister(&id).expect("unregister"));
    assert!(h.scheduler.status(&id).is_none());
}

#[test]
fn shutdown_waits_for_in_flight_write() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-s");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);

    assert!(!h.scheduler.shutdown(Duration::from_millis(50)));
    drop(release);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    assert_eq!(h.sink.writes().len(), 1);
}

#[test]
fn closing_during_write_never_starts_a_second_write() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-close");
    open_dirty(&h.docs, &id, "v1");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);

    assert!(h.scheduler.unregister(&id).expect("unregister"));
    assert!(h.scheduler.status(&id).is_none());
    assert!(!h.scheduler.unregister(&id).expect("unregister again"));

    h.docs.edit(&id, "v2");
    h.scheduler.register(id.clone()).expect("register");
    h.scheduler
        .mark_dirty_at(&id, t0 + h.interval)
        .expect("mark after reopen");
    h.scheduler.tick(t0 + h.interval * 10);
    assert_eq!(
        h.scheduler.status(&id).expect("status").state,
        SaveState::Saving
    );

    drop(release);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    h.scheduler.tick(Instant::now() + h.interval);
    wait_for(&h.events, &mut seen, is_saved);

    let contents: Vec<String> = h.sink.writes().into_iter().map(|(_, c)| c).collect();
    assert_eq!(contents, vec!["v1".to_string(), "v2".to_string()]);
    assert_eq!(h.sink.max_in_flight.load(Ordering::SeqCst), 1);
}

#[test]
fn slot_closed_during_write_is_released_on_completion() {
    let (release, gate) = bounded::<()>(0);
    let h = harness(RecordingSink::gated(gate));
    let id = DocumentId::new("doc-gone");
    open_dirty(&h.docs, &id, "text");
    let t0 = Instant::now();
    h.scheduler.mark_dirty_at(&id, t0).expect("mark");
    h.scheduler.tick(t0 + h.interval);
    h.scheduler.unregister(&id).expect("unregister");
    assert!(matches!(
        h.scheduler.handle_action(&id, NotificationAction::RetryNow),
        Err(RecoveryError::NotFound(_))
    ));

    drop(release);
    let mut seen = Vec::new();
    wait_for(&h.events, &mut seen, is_saved);
    h.scheduler.tick(Instant::now() + h.interval * 10);
    assert!(h.scheduler.status(&id).is_none());
    assert_eq!(h.sink.writes().len(), 1);
}

#[test]
fn coordinator_manual_save_during_write_leaves_no_entry() {
    let (_dir, store) = setup_temp_store();
    let (release, gate) = bounded::<()>(0);
    let docs = Arc::new(MemoryDocuments::new());
    let (events_tx, events) = unbounded();
    let scheduler = AutosaveScheduler::with_sink(
        Arc::new(GatedStore {
            store: store.clone(),
            gate,
        }),
        Arc::clone(store.settings()),
        docs.clone(),
        events_tx.clone(),
        SchedulerOptions::manual(),
    )
    .expect("start scheduler");
    let coordinator = RecoveryCoordinator::new(store.clone(), docs.clone(), events_tx);
    let interval = scheduler.settings().interval();

    let id = DocumentId::new("doc-saved");
    open_dirty(&docs, &id, "typed before saving");
    let t0 = Instant::now();
    scheduler.mark_dirty_at(&id, t0).expect("mark");
    scheduler.tick(t0 + interval);

    assert!(docs.mark_saved(&id));
    assert!(!coordinator.on_manual_save(&id).expect("manual save hook"));
    drop(release);
    wait_until_not_saving(&scheduler, &id);

    assert!(!store.contains(&id), "saved document must not be offered for recovery");
    assert!(!store.writer().snapshot_path(&id).exists());
    assert!(!events.try_iter().any(|event| is_saved(&event)));
    assert!(scheduler.shutdown(EVENT_TIMEOUT));
}
