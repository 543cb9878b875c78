//! Runtime autosave settings.

use crate::constants::{
    DEFAULT_AUTOSAVE_INTERVAL_MS, DEFAULT_MAX_AGE_DAYS, DEFAULT_MAX_FILES,
    MAX_AUTOSAVE_INTERVAL_MS, MIN_AUTOSAVE_INTERVAL_MS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide autosave configuration, persisted in the recovery store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_age_days: u32,
    pub max_files: usize,
}

impl Default for AutosaveSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: DEFAULT_AUTOSAVE_INTERVAL_MS,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl AutosaveSettings {
    /// Clamp the interval and replace zero retention limits with defaults.
    pub fn normalized(mut self) -> Self {
        self.interval_ms = self
            .interval_ms
            .clamp(MIN_AUTOSAVE_INTERVAL_MS, MAX_AUTOSAVE_INTERVAL_MS);
        if self.max_age_days == 0 {
            self.max_age_days = DEFAULT_MAX_AGE_DAYS;
        }
        if self.max_files == 0 {
            self.max_files = DEFAULT_MAX_FILES;
        }
        self
    }

    /// Autosave interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}
