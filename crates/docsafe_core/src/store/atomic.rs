//! Write-to-temp then rename: the single atomicity boundary for store files.

use crate::constants::TEMP_EXTENSION;
use crate::error::WriteError;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Test hook that simulates a crash at a chosen point of an atomic write.
#[cfg_attr(not(test), allow(dead_code))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteFailpoint {
    /// Temp file fully written and synced, process dies before the rename.
    CrashBeforeRename,
    /// Temp file truncated mid-write, process dies before the rename.
    CrashMidWrite,
}

fn temp_path_for(final_path: &Path) -> io::Result<PathBuf> {
    let parent = final_path.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "atomic target has no parent")
    })?;
    let stem = final_path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(parent.join(format!(
        ".{}.{}.{}",
        stem,
        uuid::Uuid::new_v4().simple(),
        TEMP_EXTENSION
    )))
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => File::open(parent)?.sync_all(),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Durably replace `final_path` with `bytes`.
///
/// A crash before the rename leaves the previous file untouched; a crash
/// after it leaves the new file intact. The temp file is removed on every
/// failure path.
///
/// # Errors
/// Returns [`WriteError::Io`] when writing, syncing, or renaming fails.
pub(crate) fn write_atomic(final_path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    write_atomic_with(final_path, bytes, None)
}

/// [`write_atomic`] with an optional injected crash.
pub(crate) fn write_atomic_with(
    final_path: &Path,
    bytes: &[u8],
    failpoint: Option<WriteFailpoint>,
) -> Result<(), WriteError> {
    let temp_path = temp_path_for(final_path)?;

    if let Some(point) = failpoint {
        let written = match point {
            WriteFailpoint::CrashBeforeRename => bytes,
            WriteFailpoint::CrashMidWrite => &bytes[..bytes.len() / 2],
        };
        // Leave the temp file behind exactly as a dead process would.
        write_and_sync(&temp_path, written)?;
        return Err(WriteError::Io(io::Error::new(
            io::ErrorKind::Interrupted,
            format!("Injected write failpoint: {:?}", point),
        )));
    }
    if let Err(err) = write_and_sync(&temp_path, bytes) {
        discard_temp(&temp_path);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&temp_path, final_path) {
        discard_temp(&temp_path);
        return Err(err.into());
    }
    if let Err(err) = sync_parent_dir(final_path) {
        // The rename already happened; a failed directory sync only weakens durability.
        tracing::warn!(
            "Failed to sync directory for '{}': {}",
            final_path.display(),
            err
        );
    }
    Ok(())
}

fn discard_temp(temp_path: &Path) {
    if let Err(err) = fs::remove_file(temp_path) {
        if err.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                "Failed to remove temp file '{}': {}",
                temp_path.display(),
                err
            );
        }
    }
}

/// Remove temp files left behind by an interrupted write.
///
/// # Returns
/// Number of temp files removed from `dir`.
pub(crate) fn sweep_stale_temp_files(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to scan '{}' for temp files: {}", dir.display(), err);
            }
            return 0;
        }
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_temp = path
            .extension()
            .is_some_and(|ext| ext == TEMP_EXTENSION)
            && path
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if !is_temp {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => tracing::warn!(
                "Failed to remove stale temp file '{}': {}",
                path.display(),
                err
            ),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("index.jsonl");
        write_atomic(&target, b"first").expect("first write");
        write_atomic(&target, b"second").expect("second write");
        assert_eq!(fs::read(&target).expect("read"), b"second");
        assert_eq!(sweep_stale_temp_files(dir.path()), 0);
    }

    #[test]
    fn crash_before_rename_keeps_previous_content_and_leaves_temp() {
        let dir = TempDir::new().expect("temp dir");
        let target = dir.path().join("entry.snap");
        write_atomic(&target, b"stable").expect("seed");

        let err = write_atomic_with(
            &target,
            b"never visible",
            Some(WriteFailpoint::CrashBeforeRename),
        )
        .expect_err("failpoint must fail");
        assert!(matches!(err, WriteError::Io(_)));
        assert_eq!(fs::read(&target).expect("read"), b"stable");

        assert_eq!(sweep_stale_temp_files(dir.path()), 1);
        assert_eq!(sweep_stale_temp_files(dir.path()), 0);
    }

    #[test]
    fn failed_rename_removes_temp_file() {
        let dir = TempDir::new().expect("temp dir");
        // Renaming a file onto a non-empty directory fails on every platform.
        let target = dir.path().join("occupied");
        fs::create_dir(&target).expect("create dir");
        fs::write(target.join("child"), b"x").expect("child");

        assert!(write_atomic(&target, b"payload").is_err());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .expect("read dir")
            .flatten()
            .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp file must be cleaned up");
    }

    #[test]
    fn sweep_ignores_regular_files() {
        let dir = TempDir::new().expect("temp dir");
        fs::write(dir.path().join("keep.tmp"), b"user file").expect("write");
        fs::write(dir.path().join("manifest.jsonl"), b"").expect("write");
        assert_eq!(sweep_stale_temp_files(dir.path()), 0);
        assert!(dir.path().join("keep.tmp").exists());
    }
}
