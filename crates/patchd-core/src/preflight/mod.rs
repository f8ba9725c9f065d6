//! Per-file preflight hooks.
//!
//! After an executor mutates a file, the registry looks up the first
//! runner whose predicate matches the path and lets it normalize the
//! file (always via the atomic writer, preserving mode and mtime).
//! Runners never cross file boundaries and never change meaning, only
//! formatting.

mod json;
mod rustfmt;

use std::path::Path;

pub use json::JsonPrettyRunner;
pub use rustfmt::RustfmtRunner;
use tracing::info;

/// Errors from preflight runners.
#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    /// The file could not be read or written.
    #[error("{runner}: I/O failure on {path}: {source}")]
    Io {
        /// The runner name.
        runner: &'static str,
        /// The file it was processing.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file content is not valid for its format.
    #[error("{runner}: {path}: {reason}")]
    Invalid {
        /// The runner name.
        runner: &'static str,
        /// The file it was processing.
        path: String,
        /// What was wrong.
        reason: String,
    },

    /// The atomic rewrite failed.
    #[error("{runner}: failed to rewrite {path}: {source}")]
    Write {
        /// The runner name.
        runner: &'static str,
        /// The file it was processing.
        path: String,
        /// The text-layer failure.
        #[source]
        source: crate::text::TextError,
    },
}

/// One per-file normalizer.
pub trait Preflight: Send + Sync {
    /// Short name for log lines.
    fn name(&self) -> &'static str;

    /// Whether this runner handles the given repository-relative path.
    fn matches(&self, rel: &str) -> bool;

    /// Runs the normalizer. Returns `true` when the file was rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`PreflightError`] when the content is invalid or the
    /// rewrite fails.
    fn run(&self, repo: &Path, rel: &str) -> Result<bool, PreflightError>;
}

/// Extension-keyed registry; the first matching runner wins.
#[derive(Default)]
pub struct PreflightRegistry {
    runners: Vec<Box<dyn Preflight>>,
}

impl PreflightRegistry {
    /// An empty registry (no preflights run).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in runner set: rustfmt for `*.rs`, JSON pretty-printing
    /// for `*.json`.
    #[must_use]
    pub fn with_builtin_runners() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(RustfmtRunner));
        reg.register(Box::new(JsonPrettyRunner));
        reg
    }

    /// Appends a runner; earlier registrations take precedence.
    pub fn register(&mut self, runner: Box<dyn Preflight>) {
        self.runners.push(runner);
    }

    /// Finds the first runner matching `rel`.
    #[must_use]
    pub fn lookup(&self, rel: &str) -> Option<&dyn Preflight> {
        self.runners
            .iter()
            .map(AsRef::as_ref)
            .find(|r| r.matches(rel))
    }

    /// Runs the first matching runner on one file.
    ///
    /// Returns `None` when no runner matches, `Some(changed)` otherwise.
    ///
    /// # Errors
    ///
    /// Propagates the runner's [`PreflightError`].
    pub fn run_one(&self, repo: &Path, rel: &str) -> Result<Option<bool>, PreflightError> {
        let Some(runner) = self.lookup(rel) else {
            return Ok(None);
        };
        info!("🧪 preflight({}) {rel}", runner.name());
        let changed = runner.run(repo, rel)?;
        if changed {
            info!("🛠️ preflight({}) rewrote {rel}", runner.name());
        } else {
            info!("✔ preflight({}) no change: {rel}", runner.name());
        }
        Ok(Some(changed))
    }

    /// Runs the registry over a list of changed files, reporting whether
    /// any file was rewritten. Missing files (deleted by the patch) are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Stops at the first runner failure.
    pub fn run_all(&self, repo: &Path, files: &[String]) -> Result<bool, PreflightError> {
        let mut any = false;
        for rel in files {
            let rel = rel.trim();
            if rel.is_empty() || !repo.join(rel).exists() {
                continue;
            }
            if let Some(true) = self.run_one(repo, rel)? {
                any = true;
            }
        }
        Ok(any)
    }
}
