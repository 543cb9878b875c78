//! Error types and the failure taxonomy for snapshot writes and recovery.
use crate::models::entry::DocumentId;
use std::path::PathBuf;
use thiserror::Error;

/// Closed set of failure categories surfaced to hosts and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    InsufficientSpace,
    TargetUnavailable,
    IoFailure,
    SerializationFailure,
    CorruptedEntry,
    ExternalConflict,
    DiffUnavailable,
}

/// Failure of a single snapshot or index write.
///
/// Every variant is recoverable: the scheduler retries on its next tick.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Insufficient space in recovery store: {available} bytes free, {required} required")]
    InsufficientSpace { available: u64, required: u64 },

    #[error("Source file '{}' is unavailable: {reason}", path.display())]
    TargetUnavailable { path: PathBuf, reason: String },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization failure: {0}")]
    Serialization(String),
}

impl WriteError {
    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientSpace { .. } => FailureKind::InsufficientSpace,
            Self::TargetUnavailable { .. } => FailureKind::TargetUnavailable,
            Self::Io(_) => FailureKind::IoFailure,
            Self::Serialization(_) => FailureKind::SerializationFailure,
        }
    }
}

impl From<bincode::Error> for WriteError {
    fn from(value: bincode::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

impl From<serde_json::Error> for WriteError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}

/// Failure opening or loading the recovery store.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recovery store is locked: {0}")]
    Locked(String),
}

/// Top-level error for coordinator and store operations.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Recovery entry for '{0}' failed checksum validation")]
    Corrupted(DocumentId),

    #[error("No recovery entry for '{0}'")]
    NotFound(DocumentId),

    #[error("No pending conflict for '{0}'")]
    NoPendingConflict(DocumentId),

    #[error("Document '{document_id}' could not be opened: {message}")]
    Document {
        document_id: DocumentId,
        message: String,
    },

    #[error("Source file '{}' could not be read: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Recovery state lock poisoned")]
    StatePoisoned,
}

impl RecoveryError {
    /// Taxonomy bucket, when the error maps onto one.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Write(err) => Some(err.kind()),
            Self::Corrupted(_) => Some(FailureKind::CorruptedEntry),
            Self::SourceRead { .. } | Self::Load(LoadError::Io { .. }) => {
                Some(FailureKind::IoFailure)
            }
            _ => None,
        }
    }
}
