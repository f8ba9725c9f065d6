//! Transactional patch application.
//!
//! A batch either commits exactly once or leaves the repository
//! indistinguishable from the pre-patch state: the orchestrator captures
//! `HEAD` before touching anything, dispatches the ops in document order,
//! and on the first failure hard-resets to the captured revision and
//! removes untracked leftovers. Push failures are the one exception: the
//! local commit is kept and the failure is surfaced.

use std::path::Path;

use tracing::{error, info, warn};

use crate::diff::apply_diff;
use crate::error::ApplyError;
use crate::model::{Op, OpKind, Patch};
use crate::ops::{ExecCtx, ExecError, dispatch};
use crate::preflight::PreflightRegistry;
use crate::vcs::{Git, Vcs};

/// Default commit message when the patch header carries none.
pub const DEFAULT_COMMIT_MSG: &str = "chore: apply patch";

/// Default commit author when the patch header carries none.
pub const DEFAULT_AUTHOR: &str = "XGit Bot <bot@xgit.local>";

/// Working-tree cleaning policy before a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanMode {
    /// `reset --hard` + `clean -fd` before dispatch.
    #[default]
    Auto,
    /// Refuse to run on a dirty tree.
    Strict,
    /// Leave the tree alone.
    Ignore,
}

impl CleanMode {
    /// Parses the CLI spelling.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "strict" => Some(Self::Strict),
            "ignore" => Some(Self::Ignore),
            _ => None,
        }
    }
}

/// Batch-level options.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Cleaning policy (default [`CleanMode::Auto`]).
    pub clean: CleanMode,
    /// Whether to `push origin HEAD` after a commit.
    pub push: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            clean: CleanMode::Auto,
            push: true,
        }
    }
}

/// Everything a batch needs.
pub struct ApplyContext<'a> {
    /// The VCS port.
    pub vcs: &'a dyn Vcs,
    /// The preflight registry executors feed mutated files to.
    pub preflights: &'a PreflightRegistry,
    /// Batch options.
    pub opts: ApplyOptions,
}

/// Outcome of a successful batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// All ops ran but nothing was staged; no commit was created.
    NothingToCommit,
    /// Exactly one commit was created (and pushed, when enabled).
    Committed,
}

/// A snapshot-bearing transaction over one repository.
struct Tx<'a> {
    git: &'a Git<'a>,
    pre_head: Option<String>,
}

impl<'a> Tx<'a> {
    fn begin(git: &'a Git<'a>) -> Result<Self, ApplyError> {
        let pre_head = git.head()?;
        match &pre_head {
            Some(rev) => info!("ℹ️ transaction snapshot: {rev}"),
            None => info!("ℹ️ transaction snapshot: empty repository (no HEAD)"),
        }
        Ok(Self { git, pre_head })
    }

    fn clean(&self, mode: CleanMode) -> Result<(), ApplyError> {
        match mode {
            CleanMode::Auto => {
                info!("ℹ️ cleaning working tree: reset --hard / clean -fd");
                // An empty repository has no HEAD to reset.
                if self.pre_head.is_some() {
                    self.git.reset_hard(None)?;
                }
                self.git.clean_fd()?;
                Ok(())
            },
            CleanMode::Strict => {
                if self.git.changed_files()?.is_empty() {
                    Ok(())
                } else {
                    Err(ApplyError::DirtyTree)
                }
            },
            CleanMode::Ignore => Ok(()),
        }
    }

    fn rollback(&self) {
        let target = self.pre_head.as_deref();
        if let Some(rev) = target {
            if let Err(e) = self.git.reset_hard(Some(rev)) {
                error!("❌ rollback reset failed: {e}");
            }
        }
        if let Err(e) = self.git.clean_fd() {
            error!("❌ rollback clean failed: {e}");
        }
        match target {
            Some(rev) => info!("↩️ rolled back to {rev}"),
            None => info!("↩️ rolled back (no pre-patch HEAD)"),
        }
    }
}

/// Runs one `git.*` op inside the transaction.
fn dispatch_git_op(git: &Git<'_>, op: &Op) -> Result<(), ApplyError> {
    match op.kind {
        OpKind::GitDiff => {
            apply_diff(git, &op.body)?;
            Ok(())
        },
        OpKind::GitRevert => {
            let spec = op.args.str_or("spec", "");
            let refspec = op.args.str_or("ref", spec);
            let refspec = if refspec.trim().is_empty() {
                op.body.trim()
            } else {
                refspec.trim()
            };
            if refspec.is_empty() {
                return Err(ApplyError::Exec(ExecError::MissingArg {
                    op: "git.revert",
                    arg: "ref",
                }));
            }
            let strategy = op.args.str_or("strategy", "abort");
            info!("↩️ git.revert: inverting {refspec} (no commit)");
            if let Err(e) = git.run_ok(&["revert", "--no-commit", refspec]) {
                // A conflicted revert leaves state behind; unless asked
                // to keep it for inspection, clear it before surfacing
                // the error.
                if strategy.eq_ignore_ascii_case("abort") {
                    let _ = git.run(&["revert", "--abort"]);
                }
                return Err(ApplyError::Vcs(e));
            }
            info!("✅ git.revert done: {refspec}");
            Ok(())
        },
        OpKind::GitTag => {
            let name = op.args.str_or("name", "").trim().to_string();
            if name.is_empty() {
                return Err(ApplyError::Exec(ExecError::MissingArg {
                    op: "git.tag",
                    arg: "name",
                }));
            }
            let refspec = op.args.str_or("ref", "HEAD").trim().to_string();
            let message = op.args.str_or("message", "").to_string();
            let annotate = op.args.bool_or("annotate", !message.is_empty());
            let force = op.args.bool_or("force", false);

            let mut args: Vec<&str> = vec!["tag"];
            if annotate {
                args.extend_from_slice(&["-a", &name, &refspec, "-m", &message]);
            } else {
                args.extend_from_slice(&[&name, &refspec]);
            }
            if force {
                args.push("-f");
            }
            info!("🏷️ git.tag: {name} -> {refspec}");
            git.run_ok(&args)?;
            info!("✅ git.tag created: {name}");

            if op.args.bool_or("push", false) {
                info!("🚀 pushing tag: origin {name}");
                git.push_ref(&name).map_err(ApplyError::PushFailed)?;
                info!("✅ tag pushed: {name}");
            }
            Ok(())
        },
        // The commit itself is the orchestrator's epilogue; the op only
        // contributes its message.
        OpKind::GitCommit => Ok(()),
        _ => unreachable!("non-git op routed to dispatch_git_op"),
    }
}

/// Applies a parsed patch to `repo` as one transaction.
///
/// On success returns whether a commit was created. On any op failure the
/// repository is rolled back to the captured pre-patch state and the
/// error is returned.
///
/// # Errors
///
/// The first [`ApplyError`] in the batch. [`ApplyError::PushFailed`]
/// means the commit exists locally but the push did not succeed.
pub fn apply_patch(
    ctx: &ApplyContext<'_>,
    repo: &Path,
    patch: &Patch,
) -> Result<ApplyOutcome, ApplyError> {
    let git = Git::new(ctx.vcs, repo);
    info!("ℹ️ repository: {}", repo.display());

    let tx = Tx::begin(&git)?;

    // A commit-only patch exists to commit previously staged work; the
    // clean step would wipe exactly that.
    if patch.is_commit_only() {
        info!("ℹ️ git.commit-only patch: skipping working-tree clean");
    } else {
        tx.clean(ctx.opts.clean)?;
    }

    for (index, op) in patch.ops.iter().enumerate() {
        let result = match op.kind {
            OpKind::GitDiff | OpKind::GitRevert | OpKind::GitTag | OpKind::GitCommit => {
                dispatch_git_op(&git, op)
            },
            _ => {
                let exec = ExecCtx {
                    git: Git::new(ctx.vcs, repo),
                    preflights: ctx.preflights,
                };
                dispatch(&exec, op).map_err(ApplyError::from)
            },
        };
        if let Err(e) = result {
            error!("❌ op #{} ({}) failed: {e}", index + 1, op.kind);
            tx.rollback();
            return Err(e);
        }
    }

    git.add_all()?;
    let staged = git.staged_names()?;
    if staged.is_empty() {
        info!("ℹ️ nothing to commit");
        return Ok(ApplyOutcome::NothingToCommit);
    }

    let commit_op_msg = patch
        .ops
        .iter()
        .find(|op| op.kind == OpKind::GitCommit)
        .map(|op| op.args.str_or("message", "").trim().to_string())
        .filter(|m| !m.is_empty());
    let message = commit_op_msg
        .or_else(|| patch.commit_msg.clone())
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_COMMIT_MSG.to_string());
    let author = patch
        .author
        .clone()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| DEFAULT_AUTHOR.to_string());

    info!("ℹ️ commit message: {message}");
    info!("ℹ️ commit author: {author}");
    if let Err(e) = git.commit(&author, &message) {
        error!("❌ commit failed: {e}");
        tx.rollback();
        return Err(ApplyError::Vcs(e));
    }
    info!("✅ committed: {message}");

    if ctx.opts.push {
        info!("🚀 pushing (origin HEAD)…");
        if let Err(e) = git.push_head() {
            // The commit stays; pushing is retried by a human, not by us.
            warn!("⚠️ push failed, local commit kept: {e}");
            return Err(ApplyError::PushFailed(e));
        }
        info!("🚀 push complete");
    } else {
        info!("ℹ️ push disabled");
    }

    Ok(ApplyOutcome::Committed)
}
