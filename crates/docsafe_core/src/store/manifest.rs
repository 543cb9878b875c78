//! Recovery manifest: the authoritative index of live recovery entries.
//!
//! The index is a JSON-lines file (`manifest.jsonl`), one record per live
//! document. Each snapshot file is self-describing, so a damaged index line
//! only costs that line; the snapshot is re-adopted on the next load.

use super::atomic::write_atomic;
use super::snapshot::{read_snapshot, snapshot_file_name, SnapshotRead};
use crate::constants::SNAPSHOT_EXTENSION;
use crate::error::{LoadError, RecoveryError, WriteError};
use crate::models::entry::{DocumentId, EntrySummary, RecoveryEntry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ManifestRecord {
    document_id: DocumentId,
    source_path: Option<PathBuf>,
    saved_at: DateTime<Utc>,
    size_bytes: u64,
    preview: String,
    checksum: String,
    base_checksum: Option<String>,
    snapshot: String,
}

impl ManifestRecord {
    fn from_entry(entry: &RecoveryEntry) -> Self {
        Self {
            document_id: entry.document_id.clone(),
            source_path: entry.source_path.clone(),
            saved_at: entry.saved_at,
            size_bytes: entry.size_bytes,
            preview: entry.preview.clone(),
            checksum: entry.checksum.clone(),
            base_checksum: entry.base_checksum.clone(),
            snapshot: snapshot_file_name(&entry.document_id),
        }
    }

    fn summary(&self) -> EntrySummary {
        EntrySummary {
            document_id: self.document_id.clone(),
            source_path: self.source_path.clone(),
            saved_at: self.saved_at,
            size_bytes: self.size_bytes,
            preview: self.preview.clone(),
        }
    }
}

/// A snapshot that failed validation; offered to the user as discardable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptedEntry {
    pub document_id: Option<DocumentId>,
    pub snapshot_path: PathBuf,
    pub reason: String,
}

/// Result of [`RecoveryManifest::load`].
#[derive(Debug, Default)]
pub struct ManifestLoad {
    /// Validated entries, newest first.
    pub live: Vec<RecoveryEntry>,
    pub corrupted: Vec<CorruptedEntry>,
    /// Snapshots found on disk but missing from (or stale in) the index.
    pub adopted: usize,
    /// Index records whose snapshot file no longer exists.
    pub dropped: usize,
    /// Index lines that could not be parsed.
    pub malformed_lines: usize,
}

impl ManifestLoad {
    /// `true` when the on-disk index diverged from the validated state.
    pub fn index_needs_rewrite(&self) -> bool {
        self.adopted > 0
            || self.dropped > 0
            || self.malformed_lines > 0
            || !self.corrupted.is_empty()
    }
}

/// In-memory view of the index plus the corrupted-entry list.
///
/// Not internally synchronized: the owning [`RecoveryStore`](super::RecoveryStore)
/// serializes every mutation behind one mutex.
pub struct RecoveryManifest {
    index_path: PathBuf,
    snapshot_dir: PathBuf,
    records: HashMap<DocumentId, ManifestRecord>,
    corrupted: Vec<CorruptedEntry>,
    /// Explicit discards per document since open. In memory only.
    discard_epochs: HashMap<DocumentId, u64>,
}

fn newest_first(a: &ManifestRecord, b: &ManifestRecord) -> std::cmp::Ordering {
    b.saved_at
        .cmp(&a.saved_at)
        .then_with(|| a.document_id.cmp(&b.document_id))
}

impl RecoveryManifest {
    /// Create an empty manifest bound to its index file and snapshot directory.
    pub fn new(index_path: PathBuf, snapshot_dir: PathBuf) -> Self {
        Self {
            index_path,
            snapshot_dir,
            records: HashMap::new(),
            corrupted: Vec::new(),
            discard_epochs: HashMap::new(),
        }
    }

    fn read_index_records(&self) -> Result<(Vec<ManifestRecord>, usize), LoadError> {
        let raw = match fs::read_to_string(&self.index_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.index_path.clone(),
                    source,
                })
            }
        };
        let mut records = Vec::new();
        let mut malformed = 0;
        for (line_no, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ManifestRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    malformed += 1;
                    tracing::warn!(
                        "Skipping malformed manifest line {} in '{}': {}",
                        line_no + 1,
                        self.index_path.display(),
                        err
                    );
                }
            }
        }
        Ok((records, malformed))
    }

    fn snapshot_files(&self) -> Result<Vec<PathBuf>, LoadError> {
        let entries = match fs::read_dir(&self.snapshot_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(LoadError::Io {
                    path: self.snapshot_dir.clone(),
                    source,
                })
            }
        };
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == SNAPSHOT_EXTENSION))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Load the index and validate every snapshot against its checksum.
    ///
    /// Snapshots failing validation land in the corrupted list instead of the
    /// live set. Valid snapshots missing from the index are adopted; index
    /// records without a snapshot file are dropped.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the index or snapshot directory exists
    /// but cannot be read.
    pub fn load(&mut self) -> Result<ManifestLoad, LoadError> {
        self.records.clear();
        self.corrupted.clear();

        let (index_records, malformed_lines) = self.read_index_records()?;
        let mut indexed: HashMap<String, ManifestRecord> = HashMap::new();
        for record in index_records {
            let keep = indexed
                .get(&record.snapshot)
                .map_or(true, |existing| existing.saved_at < record.saved_at);
            if keep {
                indexed.insert(record.snapshot.clone(), record);
            }
        }

        let mut report = ManifestLoad {
            malformed_lines,
            ..ManifestLoad::default()
        };
        for path in self.snapshot_files()? {
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let record = indexed.remove(&file_name);
            let read = read_snapshot(&path).unwrap_or_else(|err| SnapshotRead::Corrupted {
                document_id: None,
                reason: format!("unreadable snapshot: {}", err),
            });
            match read {
                SnapshotRead::Valid(entry)
                    if snapshot_file_name(&entry.document_id) == file_name =>
                {
                    let fresh = ManifestRecord::from_entry(&entry);
                    if record.as_ref() != Some(&fresh) {
                        report.adopted += 1;
                    }
                    self.records.insert(entry.document_id.clone(), fresh);
                    report.live.push(entry);
                }
                SnapshotRead::Valid(entry) => {
                    self.mark_corrupted(
                        CorruptedEntry {
                            document_id: Some(entry.document_id),
                            snapshot_path: path,
                            reason: "snapshot stored under the wrong file name".to_string(),
                        },
                        &mut report,
                    );
                }
                SnapshotRead::Corrupted {
                    document_id,
                    reason,
                } => {
                    let document_id = document_id.or(record.map(|record| record.document_id));
                    self.mark_corrupted(
                        CorruptedEntry {
                            document_id,
                            snapshot_path: path,
                            reason,
                        },
                        &mut report,
                    );
                }
            }
        }

        for record in indexed.into_values() {
            report.dropped += 1;
            tracing::warn!(
                document_id = %record.document_id,
                "Dropping manifest record whose snapshot file is missing"
            );
        }

        report.live.sort_by(|a, b| {
            b.saved_at
                .cmp(&a.saved_at)
                .then_with(|| a.document_id.cmp(&b.document_id))
        });
        tracing::info!(
            live = report.live.len(),
            corrupted = report.corrupted.len(),
            adopted = report.adopted,
            dropped = report.dropped,
            malformed_lines = report.malformed_lines,
            "Loaded recovery manifest"
        );
        Ok(report)
    }

    fn mark_corrupted(&mut self, corrupted: CorruptedEntry, report: &mut ManifestLoad) {
        tracing::warn!(
            path = %corrupted.snapshot_path.display(),
            reason = corrupted.reason.as_str(),
            "Recovery snapshot failed validation"
        );
        self.corrupted.push(corrupted.clone());
        report.corrupted.push(corrupted);
    }

    /// Insert or replace the record for `entry.document_id`.
    pub fn upsert(&mut self, entry: &RecoveryEntry) {
        let record = ManifestRecord::from_entry(entry);
        let snapshot_path = self.snapshot_dir.join(&record.snapshot);
        // A fresh snapshot overwrote whatever corrupted file used that path.
        self.corrupted
            .retain(|corrupted| corrupted.snapshot_path != snapshot_path);
        self.records.insert(entry.document_id.clone(), record);
    }

    /// Remove the record and snapshot file for `document_id`.
    ///
    /// The snapshot file is deleted before the index is persisted, so a crash
    /// in between leaves a dangling record (dropped on load), never a
    /// resurrected entry.
    ///
    /// # Returns
    /// `true` when a record existed.
    pub fn remove(&mut self, document_id: &DocumentId) -> bool {
        let Some(record) = self.records.remove(document_id) else {
            return false;
        };
        self.delete_snapshot_file(&self.snapshot_dir.join(&record.snapshot));
        true
    }

    /// Number of explicit discards of `document_id`.
    pub fn discard_epoch(&self, document_id: &DocumentId) -> u64 {
        self.discard_epochs.get(document_id).copied().unwrap_or(0)
    }

    /// [`Self::remove`] on behalf of the user, advancing the discard epoch even
    /// when no record exists so a snapshot still being written is dropped.
    pub fn discard(&mut self, document_id: &DocumentId) -> bool {
        *self.discard_epochs.entry(document_id.clone()).or_insert(0) += 1;
        self.remove(document_id)
    }

    fn delete_snapshot_file(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to delete snapshot '{}': {}", path.display(), err);
            }
        }
    }

    /// Remove every live record.
    ///
    /// # Returns
    /// Number of records removed.
    pub fn clear(&mut self) -> usize {
        let ids: Vec<DocumentId> = self.records.keys().cloned().collect();
        ids.iter().filter(|id| self.remove(id)).count()
    }

    /// Apply retention: drop entries older than `max_age_days`, then evict the
    /// oldest entries until at most `max_files` remain.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn prune(&mut self, now: DateTime<Utc>, max_age_days: u32, max_files: usize) -> usize {
        let cutoff = now - Duration::days(i64::from(max_age_days));
        let expired: Vec<DocumentId> = self
            .records
            .values()
            .filter(|record| record.saved_at < cutoff)
            .map(|record| record.document_id.clone())
            .collect();
        for id in &expired {
            tracing::info!(document_id = %id, "Pruning expired recovery entry");
            self.remove(id);
        }
        expired.len() + self.enforce_capacity(max_files)
    }

    /// Evict oldest entries until at most `max_files` remain.
    ///
    /// # Returns
    /// Number of entries evicted.
    pub fn enforce_capacity(&mut self, max_files: usize) -> usize {
        if self.records.len() <= max_files {
            return 0;
        }
        let mut ordered: Vec<&ManifestRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| newest_first(a, b));
        let evicted: Vec<DocumentId> = ordered[max_files..]
            .iter()
            .map(|record| record.document_id.clone())
            .collect();
        for id in &evicted {
            tracing::info!(document_id = %id, "Evicting recovery entry over capacity");
            self.remove(id);
        }
        evicted.len()
    }

    /// Atomically rewrite the index file.
    ///
    /// # Errors
    /// Returns [`WriteError`] when serialization or the atomic write fails.
    pub fn persist(&self) -> Result<(), WriteError> {
        let mut ordered: Vec<&ManifestRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| newest_first(a, b));
        let mut body = String::new();
        for record in ordered {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        if let Some(parent) = self.index_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_atomic(&self.index_path, body.as_bytes())
    }

    /// Read and validate the full entry for `document_id`.
    ///
    /// A snapshot failing validation is moved to the corrupted list.
    ///
    /// # Returns
    /// `Ok(None)` when no live record exists.
    ///
    /// # Errors
    /// Returns [`RecoveryError::Corrupted`] when validation fails and
    /// [`RecoveryError::Load`] for read failures.
    pub fn read_entry(
        &mut self,
        document_id: &DocumentId,
    ) -> Result<Option<RecoveryEntry>, RecoveryError> {
        let Some(record) = self.records.get(document_id) else {
            return Ok(None);
        };
        let path = self.snapshot_dir.join(&record.snapshot);
        let read = match read_snapshot(&path) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(document_id = %document_id, "Snapshot vanished; dropping record");
                self.records.remove(document_id);
                return Ok(None);
            }
            Err(source) => return Err(LoadError::Io { path, source }.into()),
        };
        match read {
            SnapshotRead::Valid(entry) if &entry.document_id == document_id => Ok(Some(entry)),
            SnapshotRead::Valid(_) => {
                self.move_to_corrupted(document_id, path, "snapshot belongs to another document");
                Err(RecoveryError::Corrupted(document_id.clone()))
            }
            SnapshotRead::Corrupted { reason, .. } => {
                self.move_to_corrupted(document_id, path, &reason);
                Err(RecoveryError::Corrupted(document_id.clone()))
            }
        }
    }

    fn move_to_corrupted(&mut self, document_id: &DocumentId, path: PathBuf, reason: &str) {
        tracing::warn!(document_id = %document_id, reason, "Recovery snapshot failed validation");
        self.records.remove(document_id);
        self.corrupted.push(CorruptedEntry {
            document_id: Some(document_id.clone()),
            snapshot_path: path,
            reason: reason.to_string(),
        });
    }

    /// Delete every corrupted snapshot file.
    ///
    /// # Returns
    /// Number of corrupted entries discarded.
    pub fn discard_corrupted(&mut self) -> usize {
        let corrupted = std::mem::take(&mut self.corrupted);
        for entry in &corrupted {
            self.delete_snapshot_file(&entry.snapshot_path);
        }
        corrupted.len()
    }

    /// Live entry summaries, newest first.
    pub fn summaries(&self) -> Vec<EntrySummary> {
        let mut ordered: Vec<&ManifestRecord> = self.records.values().collect();
        ordered.sort_by(|a, b| newest_first(a, b));
        ordered.into_iter().map(ManifestRecord::summary).collect()
    }

    /// Summaries straight from the index file, without touching snapshots.
    ///
    /// # Errors
    /// Returns [`LoadError::Io`] when the index exists but cannot be read.
    pub fn read_index(&self) -> Result<Vec<EntrySummary>, LoadError> {
        let (mut records, _) = self.read_index_records()?;
        records.sort_by(newest_first);
        Ok(records.iter().map(ManifestRecord::summary).collect())
    }

    /// Corrupted entries awaiting an explicit discard.
    pub fn corrupted(&self) -> &[CorruptedEntry] {
        &self.corrupted
    }

    pub fn contains(&self, document_id: &DocumentId) -> bool {
        self.records.contains_key(document_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
