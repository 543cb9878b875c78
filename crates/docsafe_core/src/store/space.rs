//! Free-space pre-check for the recovery store volume.

use crate::error::WriteError;
use std::path::Path;

/// Fail with [`WriteError::InsufficientSpace`] when the volume holding
/// `store_dir` has less than `required` bytes available.
///
/// # Errors
/// Returns [`WriteError::Io`] when free space cannot be queried.
pub fn ensure_free_space(store_dir: &Path, required: u64) -> Result<(), WriteError> {
    if required == 0 {
        return Ok(());
    }
    let available = fs2::available_space(store_dir)?;
    if available < required {
        return Err(WriteError::InsufficientSpace {
            available,
            required,
        });
    }
    Ok(())
}
