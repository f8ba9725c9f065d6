//! The external VCS port.
//!
//! The core never talks to git's object store; everything goes through
//! [`Vcs::run`], which takes a repository directory and an argv and
//! returns captured stdout/stderr plus the exit status. [`GitCli`] is the
//! production implementation over the `git` binary; tests substitute
//! their own.

use std::path::Path;
use std::process::Command;

/// Errors from VCS invocations.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// The VCS binary could not be spawned at all.
    #[error("failed to spawn {binary}: {source}")]
    Spawn {
        /// Binary name.
        binary: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited non-zero.
    #[error("git {args} failed (status {status}): {stderr}")]
    CommandFailed {
        /// The argv that failed, space-joined.
        args: String,
        /// Exit status code (-1 when terminated by signal).
        status: i32,
        /// Captured stderr (merged with stdout when stderr is empty).
        stderr: String,
    },
}

/// Captured output of one VCS invocation.
#[derive(Debug, Clone)]
pub struct VcsOutput {
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Exit status code (-1 when terminated by signal).
    pub status: i32,
}

impl VcsOutput {
    /// True when the command exited zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.status == 0
    }

    /// stderr, falling back to stdout when stderr is empty (git prints
    /// some diagnostics to stdout).
    #[must_use]
    pub fn diagnostics(&self) -> &str {
        if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// The port the core consumes.
pub trait Vcs {
    /// Runs the VCS with `args` inside `repo`, capturing output.
    ///
    /// A non-zero exit is **not** an error at this level; only a spawn
    /// failure is.
    ///
    /// # Errors
    ///
    /// Returns [`VcsError::Spawn`] when the binary cannot be started.
    fn run(&self, repo: &Path, args: &[&str]) -> Result<VcsOutput, VcsError>;
}

/// Production implementation over the `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCli;

impl Vcs for GitCli {
    fn run(&self, repo: &Path, args: &[&str]) -> Result<VcsOutput, VcsError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(repo)
            .args(args)
            .output()
            .map_err(|source| VcsError::Spawn {
                binary: "git".to_string(),
                source,
            })?;
        Ok(VcsOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        })
    }
}

/// A [`Vcs`] bound to one repository, with the typed helpers the core
/// relies on.
pub struct Git<'a> {
    vcs: &'a dyn Vcs,
    repo: &'a Path,
}

impl<'a> Git<'a> {
    /// Binds a port to a repository directory.
    #[must_use]
    pub fn new(vcs: &'a dyn Vcs, repo: &'a Path) -> Self {
        Self { vcs, repo }
    }

    /// The bound repository directory.
    #[must_use]
    pub const fn repo(&self) -> &Path {
        self.repo
    }

    /// Raw invocation; non-zero status is not an error.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub fn run(&self, args: &[&str]) -> Result<VcsOutput, VcsError> {
        self.vcs.run(self.repo, args)
    }

    /// Invocation that treats non-zero exit as [`VcsError::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn run_ok(&self, args: &[&str]) -> Result<VcsOutput, VcsError> {
        let out = self.run(args)?;
        if out.success() {
            Ok(out)
        } else {
            Err(VcsError::CommandFailed {
                args: args.join(" "),
                status: out.status,
                stderr: out.diagnostics().trim().to_string(),
            })
        }
    }

    /// `rev-parse --verify HEAD`; `None` for a repository with no commits.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub fn head(&self) -> Result<Option<String>, VcsError> {
        let out = self.run(&["rev-parse", "--verify", "HEAD"])?;
        if out.success() {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }

    /// `reset --hard [rev]`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn reset_hard(&self, rev: Option<&str>) -> Result<(), VcsError> {
        match rev {
            Some(rev) => self.run_ok(&["reset", "--hard", rev])?,
            None => self.run_ok(&["reset", "--hard"])?,
        };
        Ok(())
    }

    /// `clean -fd`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn clean_fd(&self) -> Result<(), VcsError> {
        self.run_ok(&["clean", "-fd"])?;
        Ok(())
    }

    /// `add -- <path>`; also records deletions of tracked paths.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn add_path(&self, rel: &str) -> Result<(), VcsError> {
        self.run_ok(&["add", "--", rel])?;
        Ok(())
    }

    /// `add -N <path>` (intent to add); failures are reported via the
    /// returned output, not as errors, because pre-staging is advisory.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub fn add_intent(&self, rel: &str) -> Result<VcsOutput, VcsError> {
        self.run(&["add", "-N", "--", rel])
    }

    /// `add -A`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn add_all(&self) -> Result<(), VcsError> {
        self.run_ok(&["add", "-A"])?;
        Ok(())
    }

    /// Staged paths from `diff --cached --name-only`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn staged_names(&self) -> Result<Vec<String>, VcsError> {
        let out = self.run_ok(&["diff", "--cached", "--name-only"])?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// True when `ls-files --error-unmatch` knows the path.
    ///
    /// # Errors
    ///
    /// Spawn failures only.
    pub fn is_tracked(&self, rel: &str) -> Result<bool, VcsError> {
        Ok(self
            .run(&["ls-files", "--error-unmatch", "--", rel])?
            .success())
    }

    /// Changed files from `status --porcelain`, rename lines resolved to
    /// their new path.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn changed_files(&self) -> Result<Vec<String>, VcsError> {
        let out = self.run_ok(&["status", "--porcelain"])?;
        let mut changed = Vec::new();
        for line in out.stdout.lines() {
            if line.len() < 4 {
                continue;
            }
            let mut path = line[3..].trim();
            if let Some((_, to)) = path.split_once("->") {
                path = to.trim();
            }
            let path = path.trim_matches('"');
            if !path.is_empty() {
                changed.push(path.to_string());
            }
        }
        Ok(changed)
    }

    /// `commit --author <author> -m <message>`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn commit(&self, author: &str, message: &str) -> Result<(), VcsError> {
        self.run_ok(&["commit", "--author", author, "-m", message])?;
        Ok(())
    }

    /// `push origin HEAD`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn push_head(&self) -> Result<(), VcsError> {
        self.run_ok(&["push", "origin", "HEAD"])?;
        Ok(())
    }

    /// `push origin <tag>`.
    ///
    /// # Errors
    ///
    /// Spawn failures and non-zero exits.
    pub fn push_ref(&self, name: &str) -> Result<(), VcsError> {
        self.run_ok(&["push", "origin", name])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_diagnostics_fallback() {
        let out = VcsOutput {
            stdout: "from stdout".into(),
            stderr: String::new(),
            status: 1,
        };
        assert_eq!(out.diagnostics(), "from stdout");
        let out = VcsOutput {
            stdout: "x".into(),
            stderr: "real error".into(),
            status: 128,
        };
        assert_eq!(out.diagnostics(), "real error");
    }

    #[test]
    fn test_changed_files_parses_porcelain() {
        struct Fake(&'static str);
        impl Vcs for Fake {
            fn run(&self, _repo: &Path, _args: &[&str]) -> Result<VcsOutput, VcsError> {
                Ok(VcsOutput {
                    stdout: self.0.to_string(),
                    stderr: String::new(),
                    status: 0,
                })
            }
        }
        let fake = Fake(" M src/a.rs\n?? new.txt\nR  old.txt -> new/name.txt\n");
        let git = Git::new(&fake, Path::new("/tmp"));
        assert_eq!(
            git.changed_files().unwrap(),
            vec!["src/a.rs", "new.txt", "new/name.txt"]
        );
    }
}
