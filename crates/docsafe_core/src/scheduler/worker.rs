//! Write worker pool and the timer driver thread.

use super::Engine;
use crate::models::entry::DocumentId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Content captured at dispatch time for one snapshot write.
pub(crate) struct WriteJob {
    pub(crate) document_id: DocumentId,
    /// Discard counter read together with `content`.
    pub(crate) since_epoch: u64,
    pub(crate) source_path: Option<PathBuf>,
    pub(crate) content: String,
}

/// Spawn `count` workers draining `jobs` until every sender is dropped.
///
/// Each worker sends on `done` as it exits so shutdown can wait with a deadline.
pub(crate) fn spawn_workers(
    engine: &Arc<Engine>,
    jobs: &Receiver<WriteJob>,
    done: &Sender<()>,
    count: usize,
) -> io::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(count);
    for index in 0..count.max(1) {
        let engine = Arc::clone(engine);
        let jobs = jobs.clone();
        let done = done.clone();
        let handle = thread::Builder::new()
            .name(format!("docsafe-autosave-{}", index))
            .spawn(move || {
                for job in jobs.iter() {
                    let started = Instant::now();
                    let result = engine.sink.persist(
                        &job.document_id,
                        job.since_epoch,
                        job.source_path.as_deref(),
                        &job.content,
                    );
                    tracing::debug!(
                        document_id = %job.document_id,
                        ok = result.is_ok(),
                        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                        "autosave write finished"
                    );
                    engine.complete(&job.document_id, result);
                }
                let _ = done.send(());
            })?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Spawn the driver that ticks the engine every `poll` until signalled.
pub(crate) fn spawn_driver(
    engine: Arc<Engine>,
    poll: Duration,
    stop: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("docsafe-autosave-driver".to_string())
        .spawn(move || loop {
            match stop.recv_timeout(poll) {
                Err(RecvTimeoutError::Timeout) => engine.tick(Instant::now()),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })
}
