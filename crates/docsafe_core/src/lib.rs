//! Core library for docsafe: crash-safe autosave snapshots and startup recovery.

/// Configuration loading and defaults.
pub mod config;
/// Shared constants used across docsafe crates.
pub mod constants;
/// Recovery orchestration at startup and after manual saves.
pub mod coordinator;
/// Conflict detection between recovered snapshots and on-disk sources.
pub mod conflict;
/// Document-session collaborator interface.
pub mod documents;
/// Process-global environment mutation helpers.
pub mod env;
/// Error types and the failure taxonomy.
pub mod error;
/// Notification events emitted by the engine.
pub mod events;
/// Data models for entries, settings, and save status.
pub mod models;
/// Per-document autosave scheduling.
pub mod scheduler;
/// Recovery store: snapshot files, manifest index, and settings.
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use constants::*;
pub use coordinator::{AcceptOutcome, RecoveryCandidates, RecoveryCoordinator};
pub use conflict::{
    diff::{DiffEngine, DiffRow, LineDiff, RowTag},
    ConflictReport, ConflictResolver, DiffView, Resolution, ResolutionChoice,
};
pub use documents::{DocumentStore, MemoryDocuments, RestoredDocument};
pub use error::{FailureKind, LoadError, RecoveryError, WriteError};
pub use events::{AutosaveEvent, NotificationAction};
pub use models::{
    entry::{DocumentId, EntrySummary, RecoveryEntry},
    settings::AutosaveSettings,
    status::{SaveState, SaveStatus},
};
pub use scheduler::{AutosaveScheduler, SchedulerOptions, SnapshotSink};
pub use store::{manifest::CorruptedEntry, settings::SettingsStore, RecoveryStore};
