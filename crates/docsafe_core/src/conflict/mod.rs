//! Conflict detection between a recovered snapshot and its on-disk source.

/// Side-by-side line diff.
pub mod diff;


use crate::error::FailureKind;
use crate::models::entry::{content_checksum, DocumentId, RecoveryEntry};
use diff::{DiffEngine, DiffRow, LineDiff};
use std::path::PathBuf;

/// Diff shown next to a conflict, or why it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffView {
    Available(Vec<DiffRow>),
    /// Both texts are still shown in full, unannotated.
    Unavailable { reason: String },
}

/// Everything the host needs to ask the user about one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub document_id: DocumentId,
    pub source_path: Option<PathBuf>,
    pub disk_content: String,
    pub recovered_content: String,
    pub diff: DiffView,
}

impl ConflictReport {
    /// Failure kinds this report carries.
    pub fn failure_kinds(&self) -> Vec<FailureKind> {
        match self.diff {
            DiffView::Available(_) => vec![FailureKind::ExternalConflict],
            DiffView::Unavailable { .. } => {
                vec![FailureKind::ExternalConflict, FailureKind::DiffUnavailable]
            }
        }
    }
}

/// Result of [`ConflictResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No external change; restore directly.
    Proceed,
    NeedsUserInput(ConflictReport),
}

/// The three-way decision for a conflicting document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionChoice {
    /// Open the recovered content against the original path.
    KeepRecovered,
    /// Keep the file on disk and drop the snapshot.
    KeepDisk,
    /// Open the recovered content as a new untitled document.
    SaveAsNew,
}

pub struct ConflictResolver {
    engine: Box<dyn DiffEngine>,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Box::new(LineDiff::default()))
    }
}

impl ConflictResolver {
    pub fn new(engine: Box<dyn DiffEngine>) -> Self {
        Self { engine }
    }

    /// Decide whether `entry` can be restored without asking the user.
    ///
    /// Absent disk content never conflicts. Disk content conflicts when its
    /// digest differs from the basis recorded at snapshot time, unless it
    /// already equals the recovered text.
    pub fn resolve(&self, entry: &RecoveryEntry, disk_content: Option<&str>) -> Resolution {
        self.resolve_bytes(entry, disk_content.map(str::as_bytes))
    }

    /// [`Self::resolve`] over the raw bytes of the source file.
    ///
    /// The basis digest covers raw bytes, so comparison happens before any
    /// decoding; non-UTF-8 content is decoded lossily for the report only.
    pub fn resolve_bytes(&self, entry: &RecoveryEntry, disk_bytes: Option<&[u8]>) -> Resolution {
        let Some(bytes) = disk_bytes else {
            return Resolution::Proceed;
        };
        let disk_checksum = content_checksum(bytes);
        if entry.base_checksum.as_deref() == Some(disk_checksum.as_str())
            || disk_checksum == entry.checksum
        {
            return Resolution::Proceed;
        }
        let disk = String::from_utf8_lossy(bytes);

        tracing::info!(
            document_id = %entry.document_id,
            "Source changed on disk since the snapshot was taken"
        );
        let diff = match self.engine.side_by_side(&disk, &entry.content) {
            Ok(rows) => DiffView::Available(rows),
            Err(err) => {
                tracing::warn!(
                    document_id = %entry.document_id,
                    "Conflict diff unavailable: {}",
                    err
                );
                DiffView::Unavailable {
                    reason: err.to_string(),
                }
            }
        };
        Resolution::NeedsUserInput(ConflictReport {
            document_id: entry.document_id.clone(),
            source_path: entry.source_path.clone(),
            disk_content: disk.into_owned(),
            recovered_content: entry.content.clone(),
            diff,
        })
    }
}
