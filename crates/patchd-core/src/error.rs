//! The umbrella error a transaction surfaces.
//!
//! Executors, the locator, the diff applier and the VCS port each carry
//! their own error enum; the orchestrator folds the first failure into an
//! [`ApplyError`], logs it, and rolls back.

use crate::diff::DiffError;
use crate::locator::LocateError;
use crate::ops::ExecError;
use crate::parser::ParseError;
use crate::repos::ResolveError;
use crate::vcs::VcsError;

/// Any failure that aborts a patch transaction.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// Document parsing failed; no executor ran.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Repository-name resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A line/scope could not be located.
    #[error(transparent)]
    Locate(#[from] LocateError),

    /// An executor failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The unified-diff applier failed.
    #[error(transparent)]
    Diff(#[from] DiffError),

    /// The external VCS failed.
    #[error(transparent)]
    Vcs(#[from] VcsError),

    /// Strict clean mode found a dirty working tree.
    #[error("working tree is dirty; aborting (clean mode: strict)")]
    DirtyTree,

    /// The commit was created but the push to origin failed. The local
    /// commit is kept; no rollback happens for this variant.
    #[error("commit created but push failed: {0}")]
    PushFailed(#[source] VcsError),
}
