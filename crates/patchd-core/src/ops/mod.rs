//! Operation dispatch and the file/line/block executors.
//!
//! The dispatcher is an exhaustive match over [`OpKind`]; every mutation
//! flows through the atomic writer in [`crate::text`] and, on success,
//! stages the touched path and feeds it to the preflight registry.

mod block;
mod file;
mod line;

use std::path::{Path, PathBuf};

use tracing::info;

use crate::locator::LocateError;
use crate::model::{Op, OpKind};
use crate::preflight::PreflightRegistry;
use crate::text::TextError;
use crate::vcs::{Git, VcsError};

/// Errors from executors.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// A required argument was absent.
    #[error("{op}: missing required argument {arg:?}")]
    MissingArg {
        /// The verb.
        op: &'static str,
        /// The argument name.
        arg: &'static str,
    },

    /// `file.chmod` received a non-octal mode.
    #[error("file.chmod: invalid octal mode {0:?} (expected e.g. 644 or 755)")]
    InvalidMode(String),

    /// `file.eol` received an unknown style.
    #[error("file.eol: unknown style {0:?} (expected lf or crlf)")]
    InvalidEolStyle(String),

    /// Base64 decoding of an op body failed.
    #[error("{op}: base64 decode failed: {source}")]
    Base64 {
        /// The verb.
        op: &'static str,
        /// The decoder error.
        #[source]
        source: base64::DecodeError,
    },

    /// The op body was empty where content is required.
    #[error("{op}: empty body")]
    EmptyBody {
        /// The verb.
        op: &'static str,
    },

    /// A regular expression failed to compile.
    #[error("file.replace: pattern failed to compile: {0}")]
    BadPattern(#[from] regex::Error),

    /// Content validation (text/binary sniffing) rejected the write.
    #[error("{op}: {reason}")]
    ContentRejected {
        /// The verb.
        op: &'static str,
        /// Human-readable refusal.
        reason: String,
    },

    /// A `line.*` target was missing and `allow_noop` was not set.
    #[error("{op} {path}: {source}")]
    Locate {
        /// The verb.
        op: &'static str,
        /// The target path.
        path: String,
        /// The locator failure.
        #[source]
        source: LocateError,
    },

    /// An I/O failure while reading or writing the target.
    #[error("{op} {path}: {source}")]
    Io {
        /// The verb.
        op: &'static str,
        /// The target path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A failure in the atomic writer.
    #[error("{op} {path}: {source}")]
    Write {
        /// The verb.
        op: &'static str,
        /// The target path.
        path: String,
        /// The text-layer failure.
        #[source]
        source: TextError,
    },

    /// Staging or another VCS call failed after the mutation.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// A preflight runner rejected the mutated file.
    #[error("preflight failed for {path}: {reason}")]
    Preflight {
        /// The file the runner rejected.
        path: String,
        /// The runner's failure.
        reason: String,
    },
}

impl ExecError {
    pub(crate) fn io(op: &'static str, path: &str, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn write(op: &'static str, path: &str, source: TextError) -> Self {
        Self::Write {
            op,
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn locate(op: &'static str, path: &str, source: LocateError) -> Self {
        Self::Locate {
            op,
            path: path.to_string(),
            source,
        }
    }
}

/// Everything an executor needs besides the op itself.
pub struct ExecCtx<'a> {
    /// The VCS bound to the target repository.
    pub git: Git<'a>,
    /// The preflight registry to run on mutated files.
    pub preflights: &'a PreflightRegistry,
}

impl ExecCtx<'_> {
    /// Absolute path of a repository-relative file.
    #[must_use]
    pub fn abs(&self, rel: &str) -> PathBuf {
        self.git.repo().join(rel)
    }

    /// Stages `rel` and runs the preflight registry on it (skipping the
    /// preflight when the file no longer exists, e.g. after a delete).
    pub(crate) fn stage_and_preflight(&self, rel: &str) -> Result<(), ExecError> {
        self.git.add_path(rel)?;
        if !self.abs(rel).exists() {
            return Ok(());
        }
        match self.preflights.run_one(self.git.repo(), rel) {
            Ok(Some(changed)) => {
                if changed {
                    // The runner rewrote the file; restage it.
                    self.git.add_path(rel)?;
                }
                Ok(())
            },
            Ok(None) => Ok(()),
            Err(e) => Err(ExecError::Preflight {
                path: rel.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Routes one operation to its executor.
///
/// `git.*` verbs are not handled here; the transaction orchestrator owns
/// them. Calling this with one is a logic error surfaced as a panic in
/// debug builds and a no-op otherwise.
///
/// # Errors
///
/// The first [`ExecError`] from the executor.
pub fn dispatch(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    match op.kind {
        OpKind::FileWrite => file::write(ctx, op),
        OpKind::FileAppend => file::append(ctx, op),
        OpKind::FilePrepend => file::prepend(ctx, op),
        OpKind::FileReplace => file::replace(ctx, op),
        OpKind::FileDelete => file::delete(ctx, op),
        OpKind::FileMove => file::r#move(ctx, op),
        OpKind::FileChmod => file::chmod(ctx, op),
        OpKind::FileEol => file::eol(ctx, op),
        OpKind::FileImage => file::image(ctx, op),
        OpKind::FileBinary => file::binary(ctx, op),
        OpKind::LineInsert => line::insert(ctx, op),
        OpKind::LineAppend => line::append(ctx, op),
        OpKind::LineReplace => line::replace(ctx, op),
        OpKind::LineDelete => line::delete(ctx, op),
        OpKind::BlockDelete => block::delete(ctx, op),
        OpKind::BlockReplace => block::replace(ctx, op),
        OpKind::GitDiff | OpKind::GitRevert | OpKind::GitTag | OpKind::GitCommit => {
            debug_assert!(false, "git.* ops are dispatched by the orchestrator");
            info!("⚠️ {} reached the file dispatcher; ignored", op.kind);
            Ok(())
        },
    }
}

/// Walks from the parent of `removed` up to (but never including) `root`,
/// removing directories that became empty.
pub(crate) fn prune_empty_parents(root: &Path, removed: &Path) {
    let mut dir = removed.parent().map(Path::to_path_buf);
    while let Some(d) = dir {
        if d == root || !d.starts_with(root) {
            break;
        }
        match std::fs::read_dir(&d) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            },
            Err(_) => break,
        }
        if std::fs::remove_dir(&d).is_err() {
            break;
        }
        dir = d.parent().map(Path::to_path_buf);
    }
}
