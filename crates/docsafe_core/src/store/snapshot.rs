//! Snapshot file codec and the crash-safe [`SnapshotWriter`].

use super::atomic::{write_atomic_with, WriteFailpoint};
use super::lock::ensure_target_available;
use super::space::ensure_free_space;
use crate::constants::SNAPSHOT_EXTENSION;
use crate::error::WriteError;
use crate::models::entry::{content_checksum, DocumentId, RecoveryEntry};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

const SNAPSHOT_MAGIC: &[u8; 8] = b"DOCSNAP\0";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    entry: RecoveryEntry,
}

/// Outcome of decoding one snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRead {
    Valid(RecoveryEntry),
    Corrupted {
        /// Present when the header decoded but the content failed validation.
        document_id: Option<DocumentId>,
        reason: String,
    },
}

/// File name of the snapshot for `document_id`.
///
/// Ids are hashed so arbitrary identifiers map to portable file names.
pub fn snapshot_file_name(document_id: &DocumentId) -> String {
    let digest = content_checksum(document_id.as_str().as_bytes());
    format!("{}.{}", &digest[..32], SNAPSHOT_EXTENSION)
}

pub(crate) fn encode_snapshot(entry: &RecoveryEntry) -> Result<Vec<u8>, WriteError> {
    let file = SnapshotFile {
        format_version: SNAPSHOT_FORMAT_VERSION,
        entry: entry.clone(),
    };
    let body = bincode::serialize(&file)?;
    let mut bytes = Vec::with_capacity(SNAPSHOT_MAGIC.len() + body.len());
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

/// Decode and validate snapshot bytes.
pub fn decode_snapshot(bytes: &[u8]) -> SnapshotRead {
    let Some(body) = bytes.strip_prefix(SNAPSHOT_MAGIC.as_slice()) else {
        return SnapshotRead::Corrupted {
            document_id: None,
            reason: "missing snapshot header".to_string(),
        };
    };
    let file: SnapshotFile = match bincode::deserialize(body) {
        Ok(file) => file,
        Err(err) => {
            return SnapshotRead::Corrupted {
                document_id: None,
                reason: format!("undecodable snapshot: {}", err),
            }
        }
    };
    if file.format_version != SNAPSHOT_FORMAT_VERSION {
        return SnapshotRead::Corrupted {
            document_id: Some(file.entry.document_id),
            reason: format!("unsupported snapshot version {}", file.format_version),
        };
    }
    if !file.entry.checksum_valid() {
        return SnapshotRead::Corrupted {
            document_id: Some(file.entry.document_id),
            reason: "checksum mismatch".to_string(),
        };
    }
    SnapshotRead::Valid(file.entry)
}

/// Read and validate the snapshot at `path`.
///
/// # Errors
/// Propagates I/O errors, including `NotFound`.
pub fn read_snapshot(path: &Path) -> io::Result<SnapshotRead> {
    Ok(decode_snapshot(&fs::read(path)?))
}

fn source_basis(source_path: &Path) -> Result<Option<String>, WriteError> {
    match fs::read(source_path) {
        Ok(bytes) => Ok(Some(content_checksum(&bytes))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Performs one atomic, durable snapshot write per call. Holds no scheduling state.
pub struct SnapshotWriter {
    store_dir: PathBuf,
    snapshot_dir: PathBuf,
    min_free_bytes: u64,
    trace: bool,
    failpoint: Mutex<Option<WriteFailpoint>>,
}

impl SnapshotWriter {
    /// Create a writer targeting `snapshot_dir` inside `store_dir`.
    pub fn new(
        store_dir: PathBuf,
        snapshot_dir: PathBuf,
        min_free_bytes: u64,
        trace: bool,
    ) -> Self {
        Self {
            store_dir,
            snapshot_dir,
            min_free_bytes,
            trace,
            failpoint: Mutex::new(None),
        }
    }

    /// Directory holding snapshot files.
    pub fn snapshot_dir(&self) -> &Path {
        &self.snapshot_dir
    }

    /// Full path of the snapshot for `document_id`.
    pub fn snapshot_path(&self, document_id: &DocumentId) -> PathBuf {
        self.snapshot_dir.join(snapshot_file_name(document_id))
    }

    #[cfg(test)]
    pub(crate) fn set_failpoint(&self, failpoint: Option<WriteFailpoint>) {
        if let Ok(mut slot) = self.failpoint.lock() {
            *slot = failpoint;
        }
    }

    fn active_failpoint(&self) -> Option<WriteFailpoint> {
        self.failpoint.lock().ok().and_then(|slot| *slot)
    }

    /// Durably persist `content` as the recovery entry for `document_id`.
    ///
    /// # Returns
    /// The entry now visible under the snapshot path.
    ///
    /// # Errors
    /// - [`WriteError::InsufficientSpace`] when the store volume is below the
    ///   free-space threshold (nothing is written).
    /// - [`WriteError::TargetUnavailable`] when `source_path` is read-only or locked.
    /// - [`WriteError::Io`] / [`WriteError::Serialization`] for write failures.
    pub fn write(
        &self,
        document_id: &DocumentId,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<RecoveryEntry, WriteError> {
        let started = Instant::now();
        ensure_free_space(&self.store_dir, self.min_free_bytes)?;
        let base_checksum = match source_path {
            Some(path) => {
                ensure_target_available(path)?;
                source_basis(path)?
            }
            None => None,
        };

        let entry = RecoveryEntry::new(
            document_id.clone(),
            source_path.map(Path::to_path_buf),
            content.to_string(),
            base_checksum,
            Utc::now(),
        );
        let bytes = encode_snapshot(&entry)?;
        fs::create_dir_all(&self.snapshot_dir)?;
        write_atomic_with(
            &self.snapshot_path(document_id),
            &bytes,
            self.active_failpoint(),
        )?;

        if self.trace {
            tracing::info!(
                target: "docsafe_core::snapshot",
                document_id = %document_id,
                bytes = bytes.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "snapshot written"
            );
        }
        Ok(entry)
    }

    /// Delete the snapshot file for `document_id`, ignoring a missing file.
    ///
    /// # Errors
    /// Returns other I/O errors from the removal.
    pub fn delete(&self, document_id: &DocumentId) -> io::Result<()> {
        match fs::remove_file(self.snapshot_path(document_id)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}
