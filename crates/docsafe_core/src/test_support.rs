//! Shared fixtures for unit tests across modules.

use crate::config::Config;
use crate::store::RecoveryStore;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Config for a store rooted at `dir` with the free-space floor disabled.
pub(crate) fn test_config(dir: &Path) -> Config {
    Config {
        min_free_bytes: 0,
        ..Config::with_store_dir(dir)
    }
}

/// Open the store rooted at `dir`.
pub(crate) fn open_store(dir: &Path) -> Arc<RecoveryStore> {
    Arc::new(RecoveryStore::open(&test_config(dir)).expect("open recovery store"))
}

/// Fresh temp directory holding an opened store.
pub(crate) fn setup_temp_store() -> (TempDir, Arc<RecoveryStore>) {
    let dir = TempDir::new().expect("temp dir");
    let store = open_store(dir.path());
    (dir, store)
}
