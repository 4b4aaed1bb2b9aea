//! Resolved credential handles and owned-temp-file lifetime discipline.
//!
//! A handle either borrows a pre-existing cookie file (user-supplied, never
//! deleted) or owns a temporary file this run materialized. Owned files are
//! deleted exactly once: an explicit [`CredentialHandle::release`] at attempt
//! exit, backstopped by `Drop` so no exit path can leak the file.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::cookies::{CookieFileError, CookieRecord, write_cookie_file};

/// A usable reference to a cookie source.
#[derive(Debug)]
pub struct CredentialHandle {
    path: PathBuf,
    owned: bool,
    released: bool,
}

impl CredentialHandle {
    /// Wraps a pre-existing file this run must never delete.
    #[must_use]
    pub fn borrowed(path: PathBuf) -> Self {
        Self {
            path,
            owned: false,
            released: false,
        }
    }

    /// Wraps a freshly materialized temporary file this run must delete.
    #[must_use]
    pub fn owned(path: PathBuf) -> Self {
        Self {
            path,
            owned: true,
            released: false,
        }
    }

    /// Path to hand to the transfer capability.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this run is responsible for deleting the file.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Deletes the underlying file if (and only if) it is owned.
    ///
    /// Idempotent: the deletion happens at most once across any combination
    /// of `release` calls and the `Drop` backstop.
    pub fn release(&mut self) {
        if !self.owned || self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temporary credential file"),
            Err(error) => warn!(
                path = %self.path.display(),
                %error,
                "failed to remove temporary credential file"
            ),
        }
    }
}

impl Drop for CredentialHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Writes `records` to a fresh temporary file and returns an owned handle.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] when the temp file cannot be created or
/// written; a partially written temp file is removed before returning.
pub fn materialize_cookie_file(
    records: &[CookieRecord],
) -> Result<CredentialHandle, CookieFileError> {
    let file = tempfile::Builder::new()
        .prefix("audiograb-cookies-")
        .suffix(".txt")
        .tempfile()?;

    if let Err(error) = write_cookie_file(file.as_file(), records) {
        // NamedTempFile removes itself on drop.
        return Err(error);
    }

    let (_file, path) = file.keep().map_err(|e| CookieFileError::Io(e.error))?;
    debug!(count = records.len(), "materialized temporary cookie file");
    Ok(CredentialHandle::owned(path))
}
