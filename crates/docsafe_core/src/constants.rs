//! Shared constants used across docsafe crates.

use std::time::Duration;

/// Default autosave interval in milliseconds.
pub const DEFAULT_AUTOSAVE_INTERVAL_MS: u64 = 30_000;
/// Lower clamp for the autosave interval.
pub const MIN_AUTOSAVE_INTERVAL_MS: u64 = 5_000;
/// Upper clamp for the autosave interval.
pub const MAX_AUTOSAVE_INTERVAL_MS: u64 = 30_000;

/// Default retention age for recovery entries.
pub const DEFAULT_MAX_AGE_DAYS: u32 = 7;
/// Default cap on live recovery entries.
pub const DEFAULT_MAX_FILES: usize = 50;

/// Minimum free space required on the store volume before a snapshot write.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Consecutive failures that trigger a persistent-failure notification.
pub const FAILURE_NOTIFY_THRESHOLD: u32 = 3;

/// Number of characters kept in an entry preview.
pub const PREVIEW_CHARS: usize = 100;

/// Default number of snapshot write workers.
pub const DEFAULT_WRITE_WORKERS: usize = 2;

/// How often the scheduler driver thread re-evaluates timers.
pub const SCHEDULER_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Default upper bound on lines fed to the side-by-side diff.
pub const DEFAULT_DIFF_MAX_LINES: usize = 20_000;

/// Index file name inside the recovery store.
pub const MANIFEST_FILE_NAME: &str = "manifest.jsonl";
/// Persisted autosave settings file name.
pub const SETTINGS_FILE_NAME: &str = "settings.json";
/// Directory holding one snapshot file per live document.
pub const SNAPSHOT_DIR_NAME: &str = "snapshots";
/// Snapshot file extension.
pub const SNAPSHOT_EXTENSION: &str = "snap";
/// Temp-file extension used by atomic writes.
pub const TEMP_EXTENSION: &str = "tmp";
/// Owner lock held for the lifetime of an open store.
pub const STORE_OWNER_LOCK_FILE_NAME: &str = "store.owner.lock";
