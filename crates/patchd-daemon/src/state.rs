//! Last-applied digest persistence.
//!
//! The daemon remembers the digest of the last patch that reached the
//! commit stage in a side-file, so a restart neither re-applies a
//! committed patch nor forgets one that failed mid-way (the failed one is
//! retried once its file changes).

use std::path::{Path, PathBuf};

use patchd_core::text::atomic_write;
use tracing::warn;

/// Name of the digest side-file inside the watch directory.
pub const LAST_DIGEST_FILE_NAME: &str = ".lastpatch";

/// The persisted last-applied digest.
pub struct LastDigest {
    path: PathBuf,
}

impl LastDigest {
    /// Binds the store to its side-file path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Loads the persisted digest, if any.
    #[must_use]
    pub fn load(&self) -> Option<String> {
        let s = std::fs::read_to_string(&self.path).ok()?;
        let s = s.trim();
        if s.is_empty() { None } else { Some(s.to_string()) }
    }

    /// Persists `digest` atomically. Failures are logged, not fatal: the
    /// worst case is one redundant re-apply after a restart.
    pub fn store(&self, digest: &str) {
        let data = format!("{digest}\n");
        if let Err(e) = atomic_write(&self.path, data.as_bytes(), None) {
            warn!("⚠️ failed to persist last digest to {}: {e}", self.path.display());
        }
    }

    /// The side-file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
