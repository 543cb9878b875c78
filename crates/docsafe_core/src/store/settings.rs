//! Persisted, runtime-mutable autosave settings.

use super::atomic::write_atomic;
use crate::error::{RecoveryError, WriteError};
use crate::models::settings::AutosaveSettings;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Owner of the process-wide [`AutosaveSettings`].
///
/// Reads are cheap snapshots; every update is normalized and persisted
/// atomically before it becomes visible.
pub struct SettingsStore {
    path: PathBuf,
    current: RwLock<AutosaveSettings>,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load(path: PathBuf) -> Self {
        let settings = read_settings(&path).unwrap_or_default().normalized();
        Self {
            path,
            current: RwLock::new(settings),
        }
    }

    /// Current settings snapshot.
    pub fn get(&self) -> AutosaveSettings {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Apply `change`, normalize, persist, then publish the new settings.
    ///
    /// # Returns
    /// The settings now in effect.
    ///
    /// # Errors
    /// Returns [`RecoveryError::Write`] when persisting fails (the in-memory
    /// settings are left unchanged) or [`RecoveryError::StatePoisoned`].
    pub fn update(
        &self,
        change: impl FnOnce(&mut AutosaveSettings),
    ) -> Result<AutosaveSettings, RecoveryError> {
        let mut guard = self
            .current
            .write()
            .map_err(|_| RecoveryError::StatePoisoned)?;
        let mut next = guard.clone();
        change(&mut next);
        let next = next.normalized();
        persist_settings(&self.path, &next)?;
        *guard = next.clone();
        Ok(next)
    }
}

fn read_settings(path: &Path) -> Option<AutosaveSettings> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(
                "Failed to read settings '{}': {}; using defaults",
                path.display(),
                err
            );
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(err) => {
            tracing::warn!(
                "Ignoring malformed settings '{}': {}; using defaults",
                path.display(),
                err
            );
            None
        }
    }
}

fn persist_settings(path: &Path, settings: &AutosaveSettings) -> Result<(), WriteError> {
    let body = serde_json::to_vec_pretty(settings)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    write_atomic(path, &body)
}
