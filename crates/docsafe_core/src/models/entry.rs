//! Recovery entry model and document identifiers.

use crate::constants::PREVIEW_CHARS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Stable identifier of a logical document, independent of its file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Wrap a caller-provided identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh identifier for an untitled document.
    pub fn new_untitled() -> Self {
        Self(format!("untitled-{}", uuid::Uuid::new_v4()))
    }

    /// Return this id as a string slice.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Hex BLAKE3 digest of `bytes`.
///
/// Used both for snapshot integrity and for source-file basis hashes.
pub fn content_checksum(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// Leading characters of `content` used for fast listing.
pub fn content_preview(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// One point-in-time snapshot of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEntry {
    pub document_id: DocumentId,
    pub source_path: Option<PathBuf>,
    pub content: String,
    pub checksum: String,
    /// Digest of the on-disk source when the snapshot was taken.
    pub base_checksum: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub preview: String,
}

impl RecoveryEntry {
    /// Build an entry, deriving checksum and listing fields from `content`.
    pub fn new(
        document_id: DocumentId,
        source_path: Option<PathBuf>,
        content: String,
        base_checksum: Option<String>,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let checksum = content_checksum(content.as_bytes());
        let size_bytes = content.len() as u64;
        let preview = content_preview(&content);
        Self {
            document_id,
            source_path,
            content,
            checksum,
            base_checksum,
            saved_at,
            size_bytes,
            preview,
        }
    }

    /// `true` when the stored checksum matches the content.
    pub fn checksum_valid(&self) -> bool {
        content_checksum(self.content.as_bytes()) == self.checksum
    }

    /// Listing view of this entry.
    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            document_id: self.document_id.clone(),
            source_path: self.source_path.clone(),
            saved_at: self.saved_at,
            size_bytes: self.size_bytes,
            preview: self.preview.clone(),
        }
    }
}

/// Lightweight entry view handed to the recovery dialog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub document_id: DocumentId,
    pub source_path: Option<PathBuf>,
    pub saved_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub preview: String,
}
