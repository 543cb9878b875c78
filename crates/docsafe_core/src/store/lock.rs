//! Store ownership and source-file availability probes.

use crate::constants::STORE_OWNER_LOCK_FILE_NAME;
use crate::error::{LoadError, WriteError};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Process-lifetime owner lock guard.
///
/// Keeping this value alive holds an exclusive OS lock on `store.owner.lock`,
/// so only one process mutates a recovery store at a time.
pub struct OwnerLockGuard {
    file: File,
    lock_path: PathBuf,
}

impl Drop for OwnerLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(
                "Failed to release owner lock {:?} during drop: {}",
                self.lock_path,
                err
            );
        }
    }
}

fn is_contention(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::PermissionDenied
    )
}

/// Acquire and hold an exclusive owner lock on the store directory.
///
/// # Returns
/// [`OwnerLockGuard`] that keeps the owner lock held until dropped.
///
/// # Errors
/// Returns [`LoadError::Locked`] when another process holds the lock, or
/// [`LoadError::Io`] when the lock file cannot be opened.
pub fn acquire_owner_lock(store_dir: &Path) -> Result<OwnerLockGuard, LoadError> {
    let lock_path = store_dir.join(STORE_OWNER_LOCK_FILE_NAME);
    fs::create_dir_all(store_dir).map_err(|source| LoadError::Io {
        path: store_dir.to_path_buf(),
        source,
    })?;
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|source| LoadError::Io {
            path: lock_path.clone(),
            source,
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(OwnerLockGuard { file, lock_path }),
        Err(err) if is_contention(&err) => Err(LoadError::Locked(format!(
            "'{}' is already held by another docsafe process",
            lock_path.display()
        ))),
        Err(source) => Err(LoadError::Io {
            path: lock_path,
            source,
        }),
    }
}

/// Reject snapshotting when the document's source file is read-only or
/// exclusively locked by another process.
///
/// A missing source is fine: the document may be untitled or deleted.
///
/// # Errors
/// Returns [`WriteError::TargetUnavailable`] for read-only or locked files and
/// [`WriteError::Io`] for other metadata failures.
pub fn ensure_target_available(source_path: &Path) -> Result<(), WriteError> {
    let metadata = match fs::metadata(source_path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if !metadata.is_file() {
        return Err(WriteError::TargetUnavailable {
            path: source_path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    if metadata.permissions().readonly() {
        return Err(WriteError::TargetUnavailable {
            path: source_path.to_path_buf(),
            reason: "file is read-only".to_string(),
        });
    }

    let file = match File::open(source_path) {
        Ok(file) => file,
        // Windows reports sharing violations for exclusively opened files this way.
        Err(err) if is_contention(&err) => {
            return Err(WriteError::TargetUnavailable {
                path: source_path.to_path_buf(),
                reason: "file is locked by another process".to_string(),
            })
        }
        Err(err) => return Err(err.into()),
    };
    match FileExt::try_lock_shared(&file) {
        Ok(()) => {
            if let Err(err) = FileExt::unlock(&file) {
                tracing::warn!(
                    "Failed to release probe lock on '{}': {}",
                    source_path.display(),
                    err
                );
            }
            Ok(())
        }
        Err(err) if is_contention(&err) => Err(WriteError::TargetUnavailable {
            path: source_path.to_path_buf(),
            reason: "file is locked by another process".to_string(),
        }),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn owner_lock_is_exclusive_until_dropped() {
        let dir = TempDir::new().expect("temp dir");
        let guard = acquire_owner_lock(dir.path()).expect("first lock");
        assert!(matches!(
            acquire_owner_lock(dir.path()),
            Err(LoadError::Locked(_))
        ));
        drop(guard);
        acquire_owner_lock(dir.path()).expect("lock after release");
    }

    #[test]
    fn missing_source_is_available() {
        let dir = TempDir::new().expect("temp dir");
        ensure_target_available(&dir.path().join("gone.txt")).expect("missing is fine");
    }

    #[test]
    fn read_only_source_is_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("ro.txt");
        fs::write(&path, "text").expect("write");
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).expect("set readonly");

        let err = ensure_target_available(&path).expect_err("read-only must fail");
        assert!(matches!(err, WriteError::TargetUnavailable { .. }));
    }

    #[test]
    fn exclusively_locked_source_is_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("locked.txt");
        fs::write(&path, "text").expect("write");
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .expect("open holder");
        holder.try_lock_exclusive().expect("hold lock");

        let err = ensure_target_available(&path).expect_err("locked must fail");
        assert!(matches!(err, WriteError::TargetUnavailable { .. }));

        FileExt::unlock(&holder).expect("unlock");
        ensure_target_available(&path).expect("available after unlock");
    }
}
