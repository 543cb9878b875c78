//! Startup recovery: candidate listing and the accept/decline/dismiss workflow.
//!
//! The coordinator never decides presentation. It hands summaries to the
//! host, applies the host's decisions, and keeps conflicting documents
//! pending until an explicit [`ResolutionChoice`] arrives.


use crate::conflict::{ConflictReport, ConflictResolver, Resolution, ResolutionChoice};
use crate::documents::{DocumentStore, RestoredDocument};
use crate::error::{FailureKind, RecoveryError};
use crate::events::AutosaveEvent;
use crate::models::entry::{DocumentId, EntrySummary};
use crate::store::manifest::CorruptedEntry;
use crate::store::RecoveryStore;
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Recovery set offered to the user at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryCandidates {
    /// Live entries, newest first.
    pub entries: Vec<EntrySummary>,
    /// Snapshots that failed validation; offered for explicit discard only.
    pub corrupted: Vec<CorruptedEntry>,
}

impl RecoveryCandidates {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.corrupted.is_empty()
    }
}

/// Per-document result of [`RecoveryCoordinator::accept`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Restored into a dirty session; the entry is gone from the manifest.
    Recovered { document_id: DocumentId },
    /// Source changed on disk; nothing was opened. Answer with
    /// [`RecoveryCoordinator::resolve_conflict`].
    NeedsUserInput(ConflictReport),
    NotFound { document_id: DocumentId },
    /// The entry stays in the manifest for a later attempt.
    Failed {
        document_id: DocumentId,
        kind: Option<FailureKind>,
        message: String,
    },
}

type PendingGuard<'a> = MutexGuard<'a, HashMap<DocumentId, ConflictReport>>;

pub struct RecoveryCoordinator {
    store: Arc<RecoveryStore>,
    documents: Arc<dyn DocumentStore>,
    resolver: ConflictResolver,
    events: Sender<AutosaveEvent>,
    pending: Mutex<HashMap<DocumentId, ConflictReport>>,
}

fn read_source(path: &Path) -> Result<Option<Vec<u8>>, RecoveryError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(RecoveryError::SourceRead {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl RecoveryCoordinator {
    pub fn new(
        store: Arc<RecoveryStore>,
        documents: Arc<dyn DocumentStore>,
        events: Sender<AutosaveEvent>,
    ) -> Self {
        Self {
            store,
            documents,
            resolver: ConflictResolver::default(),
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default conflict resolver.
    pub fn with_resolver(mut self, resolver: ConflictResolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn pending(&self) -> Result<PendingGuard<'_>, RecoveryError> {
        self.pending.lock().map_err(|_| RecoveryError::StatePoisoned)
    }

    fn emit_corrupted(&self, corrupted: &CorruptedEntry) {
        let _ = self.events.send(AutosaveEvent::CorruptedEntryDetected {
            document_id: corrupted.document_id.clone(),
            snapshot_path: corrupted.snapshot_path.clone(),
            reason: corrupted.reason.clone(),
        });
    }

    /// Prune expired entries and return the recovery set.
    ///
    /// Corrupted snapshots are reported through events and in the result.
    pub fn startup(&self, now: DateTime<Utc>) -> Result<RecoveryCandidates, RecoveryError> {
        let pruned = self.store.prune(now)?;
        let candidates = self.candidates()?;
        for corrupted in &candidates.corrupted {
            self.emit_corrupted(corrupted);
        }
        tracing::info!(
            entries = candidates.entries.len(),
            corrupted = candidates.corrupted.len(),
            pruned,
            "Recovery candidates ready"
        );
        Ok(candidates)
    }

    /// Current recovery set without pruning.
    pub fn candidates(&self) -> Result<RecoveryCandidates, RecoveryError> {
        Ok(RecoveryCandidates {
            entries: self.store.summaries()?,
            corrupted: self.store.corrupted()?,
        })
    }

    /// Recover each document independently.
    ///
    /// A failure on one document is reported in its outcome and never stops
    /// the others.
    pub fn accept(&self, document_ids: &[DocumentId]) -> Vec<AcceptOutcome> {
        document_ids
            .iter()
            .map(|document_id| {
                self.accept_one(document_id).unwrap_or_else(|err| {
                    tracing::warn!(document_id = %document_id, "Recovery failed: {}", err);
                    AcceptOutcome::Failed {
                        document_id: document_id.clone(),
                        kind: err.kind(),
                        message: err.to_string(),
                    }
                })
            })
            .collect()
    }

    fn accept_one(&self, document_id: &DocumentId) -> Result<AcceptOutcome, RecoveryError> {
        let entry = match self.store.read_entry(document_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                return Ok(AcceptOutcome::NotFound {
                    document_id: document_id.clone(),
                })
            }
            Err(err @ RecoveryError::Corrupted(_)) => {
                if let Some(corrupted) = self
                    .store
                    .corrupted()?
                    .iter()
                    .rev()
                    .find(|corrupted| corrupted.document_id.as_ref() == Some(document_id))
                {
                    self.emit_corrupted(corrupted);
                }
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let disk = match entry.source_path.as_deref() {
            Some(path) => read_source(path)?,
            None => None,
        };
        match self.resolver.resolve_bytes(&entry, disk.as_deref()) {
            Resolution::Proceed => {
                self.restore(
                    document_id,
                    document_id.clone(),
                    entry.source_path,
                    entry.content,
                )?;
                Ok(AcceptOutcome::Recovered {
                    document_id: document_id.clone(),
                })
            }
            Resolution::NeedsUserInput(report) => {
                self.pending()?.insert(document_id.clone(), report.clone());
                Ok(AcceptOutcome::NeedsUserInput(report))
            }
        }
    }

    /// Open a recovered session, then drop the entry it came from.
    fn restore(
        &self,
        entry_id: &DocumentId,
        document_id: DocumentId,
        source_path: Option<PathBuf>,
        content: String,
    ) -> Result<(), RecoveryError> {
        self.documents
            .open_recovered(RestoredDocument {
                document_id: document_id.clone(),
                source_path,
                content,
            })
            .map_err(|message| RecoveryError::Document {
                document_id: document_id.clone(),
                message,
            })?;
        self.store.discard(entry_id)?;
        tracing::info!(
            entry = %entry_id,
            document_id = %document_id,
            "Recovered document"
        );
        Ok(())
    }

    /// Apply the user's decision for a conflict reported by [`Self::accept`].
    ///
    /// # Returns
    /// The id of the opened session, or `None` for [`ResolutionChoice::KeepDisk`].
    ///
    /// # Errors
    /// [`RecoveryError::NoPendingConflict`] when `document_id` has no open
    /// conflict. On any other failure the conflict stays pending.
    pub fn resolve_conflict(
        &self,
        document_id: &DocumentId,
        choice: ResolutionChoice,
    ) -> Result<Option<DocumentId>, RecoveryError> {
        let report = self
            .pending()?
            .remove(document_id)
            .ok_or_else(|| RecoveryError::NoPendingConflict(document_id.clone()))?;

        let result = match choice {
            ResolutionChoice::KeepRecovered => self
                .restore(
                    document_id,
                    document_id.clone(),
                    report.source_path.clone(),
                    report.recovered_content.clone(),
                )
                .map(|()| Some(document_id.clone())),
            ResolutionChoice::KeepDisk => self.store.discard(document_id).map(|_| None),
            ResolutionChoice::SaveAsNew => {
                let new_id = DocumentId::new_untitled();
                self.restore(
                    document_id,
                    new_id.clone(),
                    None,
                    report.recovered_content.clone(),
                )
                .map(|()| Some(new_id))
            }
        };
        match &result {
            Ok(opened) => tracing::info!(
                document_id = %document_id,
                ?choice,
                opened = ?opened,
                "Conflict resolved"
            ),
            Err(_) => {
                self.pending()?.insert(document_id.clone(), report);
            }
        }
        result
    }

    /// Documents with a conflict awaiting [`Self::resolve_conflict`].
    pub fn pending_conflicts(&self) -> Result<Vec<DocumentId>, RecoveryError> {
        let mut ids: Vec<DocumentId> = self.pending()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Discard every live entry and persist the emptied manifest.
    ///
    /// # Returns
    /// Number of entries discarded.
    pub fn decline_all(&self) -> Result<usize, RecoveryError> {
        let removed = self.store.clear()?;
        self.pending()?.clear();
        tracing::info!(removed, "Declined all recovery entries");
        Ok(removed)
    }

    /// Close the recovery prompt without touching the manifest; the same set
    /// is offered at the next startup.
    pub fn dismiss(&self) {
        if let Ok(mut pending) = self.pending() {
            pending.clear();
        }
        tracing::info!("Recovery prompt dismissed");
    }

    /// Delete every corrupted snapshot.
    pub fn discard_corrupted(&self) -> Result<usize, RecoveryError> {
        let discarded = self.store.discard_corrupted()?;
        tracing::info!(discarded, "Discarded corrupted recovery snapshots");
        Ok(discarded)
    }

    /// Manual-save hook: drop the document's entry once it is saved.
    ///
    /// An autosave of the document still being written is dropped as well.
    ///
    /// # Returns
    /// `true` when an entry was removed.
    pub fn on_manual_save(&self, document_id: &DocumentId) -> Result<bool, RecoveryError> {
        self.pending()?.remove(document_id);
        self.store.discard(document_id)
    }
}
