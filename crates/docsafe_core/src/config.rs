//! Configuration loading from environment variables.

use crate::constants::{DEFAULT_MIN_FREE_BYTES, DEFAULT_WRITE_WORKERS};
use std::env;
use std::path::PathBuf;

/// Process configuration for the recovery store.
///
/// Runtime-tunable autosave behaviour lives in
/// [`AutosaveSettings`](crate::models::settings::AutosaveSettings); this struct
/// only covers values fixed for the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_dir: PathBuf,
    pub min_free_bytes: u64,
    pub write_workers: usize,
    pub write_trace: bool,
}

fn expand_tilde(path: String) -> PathBuf {
    let expanded = path
        .strip_prefix("~/")
        .and_then(|rest| resolve_home_dir().map(|home| home.join(rest)));
    expanded.unwrap_or_else(|| PathBuf::from(path))
}

/// First non-blank of `HOME`, `USERPROFILE`; the working directory otherwise.
fn resolve_home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
}

/// Default recovery store location (`~/.cache/docsafe/recovery`).
///
/// # Returns
/// The store directory used when `DOCSAFE_STORE_DIR` is unset.
pub fn default_store_dir() -> PathBuf {
    let home = resolve_home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".cache").join("docsafe").join("recovery")
}

/// Parse a boolean-like environment flag value.
///
/// # Supported Values
/// - Truthy: `1`, `true`, `yes`, `on`
/// - Falsy: `0`, `false`, `no`, `off`, empty string
///
/// Matching is case-insensitive and ignores surrounding whitespace.
///
/// # Returns
/// `Some(bool)` when the value is recognized, otherwise `None`.
pub fn parse_env_flag(value: &str) -> Option<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a boolean flag from the environment.
///
/// Missing or unrecognized values are treated as `false`.
pub fn env_flag_enabled(name: &str) -> bool {
    env::var(name)
        .ok()
        .and_then(|value| parse_env_flag(&value))
        .unwrap_or(false)
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}='{}'", name, raw);
            None
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Returns
    /// A populated [`Config`] with defaults applied when env vars are missing.
    pub fn from_env() -> Self {
        Self {
            store_dir: env::var("DOCSAFE_STORE_DIR")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(expand_tilde)
                .unwrap_or_else(default_store_dir),
            min_free_bytes: env_parsed("DOCSAFE_MIN_FREE_BYTES").unwrap_or(DEFAULT_MIN_FREE_BYTES),
            write_workers: env_parsed::<usize>("DOCSAFE_WRITE_WORKERS")
                .filter(|workers| *workers > 0)
                .unwrap_or(DEFAULT_WRITE_WORKERS),
            write_trace: env_flag_enabled("DOCSAFE_WRITE_TRACE"),
        }
    }

    /// Configuration rooted at an explicit store directory with defaults elsewhere.
    pub fn with_store_dir(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            write_workers: DEFAULT_WRITE_WORKERS,
            write_trace: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{expand_tilde, parse_env_flag, Config};
    use crate::constants::{DEFAULT_MIN_FREE_BYTES, DEFAULT_WRITE_WORKERS};
    use crate::env::{env_lock, EnvGuard};
    use std::path::PathBuf;

    #[test]
    fn parse_env_flag_accepts_truthy_values() {
        for value in ["1", "true", "TRUE", " yes ", "on"] {
            assert_eq!(parse_env_flag(value), Some(true), "value: {}", value);
        }
    }

    #[test]
    fn parse_env_flag_accepts_falsy_values() {
        for value in ["", "0", "false", "FALSE", " no ", "off"] {
            assert_eq!(parse_env_flag(value), Some(false), "value: {}", value);
        }
    }

    #[test]
    fn parse_env_flag_rejects_unknown_values() {
        assert_eq!(parse_env_flag("maybe"), None);
        assert_eq!(parse_env_flag("enabled"), None);
    }

    #[test]
    fn from_env_reads_overrides_and_expands_tilde() {
        let _lock = env_lock().lock().expect("env lock");
        let _home = EnvGuard::set("HOME", "/home/tester");
        let _dir = EnvGuard::set("DOCSAFE_STORE_DIR", "~/recovery");
        let _space = EnvGuard::set("DOCSAFE_MIN_FREE_BYTES", "4096");
        let _workers = EnvGuard::set("DOCSAFE_WRITE_WORKERS", "4");
        let _trace = EnvGuard::set("DOCSAFE_WRITE_TRACE", "on");

        let config = Config::from_env();
        assert_eq!(config.store_dir, PathBuf::from("/home/tester/recovery"));
        assert_eq!(config.min_free_bytes, 4096);
        assert_eq!(config.write_workers, 4);
        assert!(config.write_trace);
    }

    #[test]
    fn blank_home_falls_back_to_user_profile() {
        let _lock = env_lock().lock().expect("env lock");
        let _home = EnvGuard::set("HOME", "  ");
        let _profile = EnvGuard::set("USERPROFILE", "/profiles/tester");

        assert_eq!(
            expand_tilde("~/notes".to_string()),
            PathBuf::from("/profiles/tester/notes")
        );
        assert_eq!(
            expand_tilde("/srv/~/notes".to_string()),
            PathBuf::from("/srv/~/notes")
        );
    }

    #[test]
    fn from_env_falls_back_on_missing_or_invalid_values() {
        let _lock = env_lock().lock().expect("env lock");
        let _home = EnvGuard::set("HOME", "/home/tester");
        let _dir = EnvGuard::remove("DOCSAFE_STORE_DIR");
        let _space = EnvGuard::set("DOCSAFE_MIN_FREE_BYTES", "lots");
        let _workers = EnvGuard::set("DOCSAFE_WRITE_WORKERS", "0");
        let _trace = EnvGuard::remove("DOCSAFE_WRITE_TRACE");

        let config = Config::from_env();
        assert_eq!(
            config.store_dir,
            PathBuf::from("/home/tester/.cache/docsafe/recovery")
        );
        assert_eq!(config.min_free_bytes, DEFAULT_MIN_FREE_BYTES);
        assert_eq!(config.write_workers, DEFAULT_WRITE_WORKERS);
        assert!(!config.write_trace);
    }
}
