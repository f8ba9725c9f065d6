//! Instruction-file readiness detection.
//!
//! A patch is ready when its size has been stable for 300 ms and its last
//! non-blank line equals the sentinel. The "waiting for sentinel" notice
//! is emitted once per not-terminated phase, so a half-written file does
//! not flood the log at poll frequency.

use std::path::PathBuf;
use std::time::Duration;

use md5::{Digest, Md5};
use patchd_core::text::last_nonblank_line;
use tracing::warn;

/// Result of one readiness poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    /// Missing, empty, still growing, or not sentinel-terminated.
    NotReady,
    /// Stable and terminated; safe to parse.
    Ready {
        /// File size in bytes at the stable observation.
        size: u64,
        /// First 8 hex chars of the MD5 over the file bytes.
        digest8: String,
    },
}

/// Polls one instruction file for readiness.
pub struct Watcher {
    path: PathBuf,
    sentinel: String,
    stability_wait: Duration,
    sentinel_warned: bool,
}

impl Watcher {
    /// Creates a watcher over `path` with the given sentinel.
    #[must_use]
    pub fn new(path: PathBuf, sentinel: impl Into<String>) -> Self {
        Self {
            path,
            sentinel: sentinel.into(),
            stability_wait: Duration::from_millis(300),
            sentinel_warned: false,
        }
    }

    /// Overrides the stability wait (tests use a short one).
    #[must_use]
    pub fn with_stability_wait(mut self, wait: Duration) -> Self {
        self.stability_wait = wait;
        self
    }

    /// One readiness check. Blocks for the stability wait when the file
    /// exists and is non-empty.
    pub fn poll(&mut self) -> WatchState {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return WatchState::NotReady;
        };
        let size1 = meta.len();
        if size1 == 0 {
            return WatchState::NotReady;
        }

        std::thread::sleep(self.stability_wait);

        let Ok(meta2) = std::fs::metadata(&self.path) else {
            return WatchState::NotReady;
        };
        if meta2.len() != size1 {
            return WatchState::NotReady;
        }

        let Ok(bytes) = std::fs::read(&self.path) else {
            return WatchState::NotReady;
        };
        let text = String::from_utf8_lossy(&bytes);
        if last_nonblank_line(&text) != Some(self.sentinel.as_str()) {
            if !self.sentinel_warned {
                warn!("⏳ waiting for sentinel {:?}", self.sentinel);
                self.sentinel_warned = true;
            }
            return WatchState::NotReady;
        }
        self.sentinel_warned = false;

        WatchState::Ready {
            size: size1,
            digest8: digest8(&bytes),
        }
    }
}

/// First 8 hex chars of the MD5 over `bytes`.
#[must_use]
pub fn digest8(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = Md5::digest(bytes);
    let mut hex = String::with_capacity(8);
    for b in &digest[..4] {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watcher(dir: &std::path::Path, name: &str) -> Watcher {
        Watcher::new(dir.join(name), "=== PATCH EOF ===")
            .with_stability_wait(Duration::from_millis(5))
    }

    #[test]
    fn test_missing_and_empty_files_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = watcher(dir.path(), "p.txt");
        assert_eq!(w.poll(), WatchState::NotReady);
        std::fs::write(dir.path().join("p.txt"), "").unwrap();
        assert_eq!(w.poll(), WatchState::NotReady);
    }

    #[test]
    fn test_unterminated_file_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.txt"), "half written\n").unwrap();
        let mut w = watcher(dir.path(), "p.txt");
        assert_eq!(w.poll(), WatchState::NotReady);
    }

    #[test]
    fn test_terminated_file_ready_with_digest() {
        let dir = tempfile::tempdir().unwrap();
        let body = "x\n=== PATCH EOF ===\n";
        std::fs::write(dir.path().join("p.txt"), body).unwrap();
        let mut w = watcher(dir.path(), "p.txt");
        match w.poll() {
            WatchState::Ready { size, digest8 } => {
                assert_eq!(size, body.len() as u64);
                assert_eq!(digest8.len(), 8);
                assert!(digest8.chars().all(|c| c.is_ascii_hexdigit()));
            },
            WatchState::NotReady => panic!("expected Ready"),
        }
    }

    #[test]
    fn test_trailing_blank_lines_and_crlf_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("p.txt"), "x\r\n=== PATCH EOF ===\r\n\r\n").unwrap();
        let mut w = watcher(dir.path(), "p.txt");
        assert!(matches!(w.poll(), WatchState::Ready { .. }));
    }

    #[test]
    fn test_digest_differs_for_different_content() {
        assert_ne!(digest8(b"a"), digest8(b"b"));
        assert_eq!(digest8(b"same"), digest8(b"same"));
    }
}
