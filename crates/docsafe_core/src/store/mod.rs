//! Recovery store: the explicitly owned context holding the snapshot writer,
//! the manifest, and the autosave settings.
//!
//! Exactly one [`RecoveryStore`] owns a store directory at a time (enforced by
//! an OS lock). Scheduler and coordinator share it through an `Arc`; every
//! manifest mutation goes through the single internal mutex.

/// Temp-file + rename writes.
pub mod atomic;
/// Owner lock and source-file availability probes.
pub mod lock;
/// Recovery manifest index.
pub mod manifest;
/// Persisted autosave settings.
pub mod settings;
/// Snapshot codec and writer.
pub mod snapshot;
/// Free-space pre-check.
pub mod space;


use crate::config::Config;
use crate::constants::{MANIFEST_FILE_NAME, SETTINGS_FILE_NAME, SNAPSHOT_DIR_NAME};
use crate::error::{LoadError, RecoveryError, WriteError};
use crate::models::entry::{DocumentId, EntrySummary, RecoveryEntry};
use chrono::{DateTime, Utc};
use lock::OwnerLockGuard;
use manifest::{CorruptedEntry, RecoveryManifest};
use settings::SettingsStore;
use snapshot::SnapshotWriter;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Open recovery store. Dropping it releases the owner lock.
pub struct RecoveryStore {
    root: PathBuf,
    writer: SnapshotWriter,
    manifest: Mutex<RecoveryManifest>,
    settings: Arc<SettingsStore>,
    _owner_lock: OwnerLockGuard,
}

impl RecoveryStore {
    /// Open (creating if needed) the store at `config.store_dir`.
    ///
    /// Acquires the owner lock, sweeps temp files left by interrupted writes,
    /// loads settings, and loads + validates the manifest. When the index
    /// diverged from the snapshot files it is rewritten immediately.
    ///
    /// # Errors
    /// Returns [`LoadError::Locked`] when another process owns the store and
    /// [`LoadError::Io`] when the store cannot be read.
    pub fn open(config: &Config) -> Result<Self, RecoveryError> {
        let root = config.store_dir.clone();
        let owner_lock = lock::acquire_owner_lock(&root)?;
        let snapshot_dir = root.join(SNAPSHOT_DIR_NAME);

        let swept = atomic::sweep_stale_temp_files(&root)
            + atomic::sweep_stale_temp_files(&snapshot_dir);
        if swept > 0 {
            tracing::info!(swept, "Removed temp files left by an interrupted write");
        }

        let settings = Arc::new(SettingsStore::load(root.join(SETTINGS_FILE_NAME)));
        let mut manifest =
            RecoveryManifest::new(root.join(MANIFEST_FILE_NAME), snapshot_dir.clone());
        let load = manifest.load()?;
        if load.index_needs_rewrite() {
            if let Err(err) = manifest.persist() {
                tracing::warn!("Failed to rewrite reconciled manifest index: {}", err);
            }
        }

        tracing::info!(
            store = %root.display(),
            live = load.live.len(),
            corrupted = load.corrupted.len(),
            "Opened recovery store"
        );
        Ok(Self {
            writer: SnapshotWriter::new(
                root.clone(),
                snapshot_dir,
                config.min_free_bytes,
                config.write_trace,
            ),
            root,
            manifest: Mutex::new(manifest),
            settings,
            _owner_lock: owner_lock,
        })
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared settings owner.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    #[cfg(test)]
    pub(crate) fn writer(&self) -> &SnapshotWriter {
        &self.writer
    }

    fn manifest(&self) -> Result<MutexGuard<'_, RecoveryManifest>, RecoveryError> {
        self.manifest
            .lock()
            .map_err(|_| RecoveryError::StatePoisoned)
    }

    /// Write a snapshot, then record it in the manifest and persist the index.
    ///
    /// # Errors
    /// Returns [`WriteError`] from the snapshot write or the index persist,
    /// or an interrupted I/O error when the entry was discarded mid-write.
    pub fn record_snapshot(
        &self,
        document_id: &DocumentId,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<RecoveryEntry, WriteError> {
        let since_epoch = self.discard_epoch(document_id);
        self.record_snapshot_since(document_id, since_epoch, source_path, content)?
            .ok_or_else(|| {
                WriteError::Io(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "entry discarded while its snapshot was written",
                ))
            })
    }

    /// Discard epoch of `document_id`; capture it together with the content
    /// handed to [`Self::record_snapshot_since`].
    pub fn discard_epoch(&self, document_id: &DocumentId) -> u64 {
        match self.manifest.lock() {
            Ok(manifest) => manifest.discard_epoch(document_id),
            Err(poisoned) => poisoned.into_inner().discard_epoch(document_id),
        }
    }

    /// Write a snapshot whose content was captured at `since_epoch`.
    ///
    /// The snapshot write runs outside the manifest lock so different
    /// documents write concurrently; only the index update is serialized.
    /// When [`Self::discard`] ran for the document after `since_epoch`, the
    /// written file is deleted and nothing is recorded.
    ///
    /// # Returns
    /// The recorded entry, or `None` when it was superseded by a discard.
    ///
    /// # Errors
    /// Returns [`WriteError`] from the snapshot write or the index persist.
    pub fn record_snapshot_since(
        &self,
        document_id: &DocumentId,
        since_epoch: u64,
        source_path: Option<&Path>,
        content: &str,
    ) -> Result<Option<RecoveryEntry>, WriteError> {
        let entry = self.writer.write(document_id, source_path, content)?;
        let max_files = self.settings.get().max_files;
        let mut manifest = self.manifest.lock().map_err(|_| {
            WriteError::Io(io::Error::new(
                io::ErrorKind::Other,
                "manifest lock poisoned",
            ))
        })?;
        if manifest.discard_epoch(document_id) != since_epoch {
            self.writer.delete(document_id)?;
            tracing::info!(
                document_id = %document_id,
                "Dropped snapshot discarded while it was written"
            );
            return Ok(None);
        }
        manifest.upsert(&entry);
        manifest.enforce_capacity(max_files);
        manifest.persist()?;
        Ok(Some(entry))
    }

    /// Remove the entry for `document_id` and persist the index.
    ///
    /// A snapshot of `document_id` still being written is dropped when it
    /// completes instead of bringing the entry back.
    ///
    /// # Returns
    /// `true` when an entry existed.
    pub fn discard(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        let mut manifest = self.manifest()?;
        if !manifest.discard(document_id) {
            return Ok(false);
        }
        manifest.persist()?;
        tracing::info!(document_id = %document_id, "Discarded recovery entry");
        Ok(true)
    }

    /// Remove every live entry and persist the emptied index.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn clear(&self) -> Result<usize, RecoveryError> {
        let mut manifest = self.manifest()?;
        let removed = manifest.clear();
        manifest.persist()?;
        Ok(removed)
    }

    /// Apply retention with the current settings.
    ///
    /// # Returns
    /// Number of entries removed.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, RecoveryError> {
        let settings = self.settings.get();
        let mut manifest = self.manifest()?;
        let removed = manifest.prune(now, settings.max_age_days, settings.max_files);
        if removed > 0 {
            manifest.persist()?;
            tracing::info!(removed, "Pruned recovery entries");
        }
        Ok(removed)
    }

    /// Read and validate the full entry for `document_id`.
    ///
    /// # Errors
    /// Returns [`RecoveryError::Corrupted`] when validation fails; the entry is
    /// moved to the corrupted list and the index rewritten.
    pub fn read_entry(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<RecoveryEntry>, RecoveryError> {
        let mut manifest = self.manifest()?;
        let result = manifest.read_entry(document_id);
        if matches!(result, Err(RecoveryError::Corrupted(_))) {
            if let Err(err) = manifest.persist() {
                tracing::warn!("Failed to persist index after corruption: {}", err);
            }
        }
        result
    }

    /// Live entry summaries, newest first.
    pub fn summaries(&self) -> Result<Vec<EntrySummary>, RecoveryError> {
        Ok(self.manifest()?.summaries())
    }

    /// Entries that failed validation.
    pub fn corrupted(&self) -> Result<Vec<CorruptedEntry>, RecoveryError> {
        Ok(self.manifest()?.corrupted().to_vec())
    }

    /// Delete every corrupted snapshot.
    ///
    /// # Returns
    /// Number of corrupted entries discarded.
    pub fn discard_corrupted(&self) -> Result<usize, RecoveryError> {
        let mut manifest = self.manifest()?;
        let discarded = manifest.discard_corrupted();
        manifest.persist()?;
        Ok(discarded)
    }

    /// Summaries straight from the index file, without validating snapshots.
    pub fn read_index(&self) -> Result<Vec<EntrySummary>, LoadError> {
        match self.manifest.lock() {
            Ok(manifest) => manifest.read_index(),
            Err(poisoned) => poisoned.into_inner().read_index(),
        }
    }

    /// `true` when a live entry exists for `document_id`.
    pub fn contains(&self, document_id: &DocumentId) -> bool {
        self.manifest()
            .map(|manifest| manifest.contains(document_id))
            .unwrap_or(false)
    }
}
