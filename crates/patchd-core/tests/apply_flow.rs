//! End-to-end transaction tests against throwaway git repositories.
//!
//! Every test skips silently when no usable `git` binary is on PATH.

use std::path::{Path, PathBuf};
use std::process::Command;

use patchd_core::parser::parse_patch;
use patchd_core::preflight::PreflightRegistry;
use patchd_core::txn::{ApplyContext, ApplyOptions, ApplyOutcome, CleanMode, apply_patch};
use patchd_core::vcs::{Git, GitCli, Vcs};
use patchd_core::ApplyError;

const EOF: &str = "=== PATCH EOF ===";

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

fn sh(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(args)
        .output()
        .expect("git invocation");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

/// `git init` + identity config + one initial commit.
fn init_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().to_path_buf();
    let branch_flag = Command::new("git")
        .arg("-C")
        .arg(&repo)
        .args(["init", "-q", "-b", "main"])
        .output()
        .expect("git invocation");
    if !branch_flag.status.success() {
        sh(&repo, &["init", "-q"]);
    }
    sh(&repo, &["config", "user.email", "tests@patchd.local"]);
    sh(&repo, &["config", "user.name", "patchd tests"]);
    std::fs::write(repo.join("README.md"), "# fixture\n").unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "init"]);
    (dir, repo)
}

fn no_push_ctx<'a>(vcs: &'a GitCli, preflights: &'a PreflightRegistry) -> ApplyContext<'a> {
    ApplyContext {
        vcs,
        preflights,
        opts: ApplyOptions {
            clean: CleanMode::Auto,
            push: false,
        },
    }
}

fn commit_count(repo: &Path) -> usize {
    sh(repo, &["rev-list", "--count", "HEAD"])
        .trim()
        .parse()
        .unwrap()
}

fn worktree_clean(repo: &Path) -> bool {
    sh(repo, &["status", "--porcelain"]).trim().is_empty()
}

#[test]
fn file_write_batch_commits_once() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "commitmsg: add a.txt\nauthor: Tester <t@x>\n\
               === file.write: \"a.txt\" ===\nhello\n=== end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let outcome = apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(outcome, ApplyOutcome::Committed);
    assert_eq!(std::fs::read_to_string(repo.join("a.txt")).unwrap(), "hello\n");
    assert_eq!(commit_count(&repo), 2);
    assert!(worktree_clean(&repo));
    let last = sh(&repo, &["log", "-1", "--format=%s|%an"]);
    assert_eq!(last.trim(), "add a.txt|Tester");
}

#[test]
fn failing_op_rolls_back_everything() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);
    let pre_head = Git::new(&vcs, &repo).head().unwrap().unwrap();

    // `c` does not exist, so the third op fails after a and b were
    // written and staged.
    let doc = "=== file.write: \"a.txt\" ===\nA\n=== end ===\n\
               === file.write: \"b.txt\" ===\nB\n=== end ===\n\
               === file.move: \"c\" ===\nto = d\n=== end ===\n\
               === PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let err = apply_patch(&ctx, &repo, &patch).unwrap_err();
    assert!(matches!(err, ApplyError::Exec(_)));

    assert_eq!(Git::new(&vcs, &repo).head().unwrap().unwrap(), pre_head);
    assert!(worktree_clean(&repo));
    assert!(!repo.join("a.txt").exists());
    assert!(!repo.join("b.txt").exists());
    assert_eq!(commit_count(&repo), 1);
}

#[test]
fn identical_content_is_nothing_to_commit() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "=== file.write: \"README.md\" ===\n# fixture\n=== end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let outcome = apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(outcome, ApplyOutcome::NothingToCommit);
    assert_eq!(commit_count(&repo), 1);
}

#[test]
fn line_and_block_ops_edit_in_place() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(
        repo.join("src.txt"),
        "import os\nimport re\nimport sys\nbody\n",
    )
    .unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "fixture"]);

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "=== line.append: \"src.txt\" ===\nkeys = import\nnthl = 3\nimport json\n\
               === end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.join("src.txt")).unwrap(),
        "import os\nimport re\nimport sys\nimport json\nbody\n"
    );
}

#[test]
fn replace_promotes_to_trailing_newline_fix() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(repo.join("n.txt"), "no newline at end").unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "fixture"]);

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "=== file.replace: \"n.txt\" ===\npattern = definitely-not-present\n\
               ensure_eof_nl = 1\nreplacement\n=== end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.join("n.txt")).unwrap(),
        "no newline at end\n"
    );
}

#[test]
fn replace_contains_line_ignores_space_runs() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(repo.join("s.txt"), "foo   bar\n").unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "fixture"]);

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "=== file.replace: \"s.txt\" ===\npattern = foo bar\nmode = contains_line\n\
               ignore_spaces = 1\nFOO BAR\n=== end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.join("s.txt")).unwrap(),
        "FOO BAR\n"
    );
}

#[test]
fn git_diff_op_applies_modification() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(repo.join("code.txt"), "alpha\nbeta\ngamma\n").unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "fixture"]);

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "commitmsg: patch via diff\n\
               === git.diff: \"\" ===\n\
               diff --git a/code.txt b/code.txt\n\
               --- a/code.txt\n\
               +++ b/code.txt\n\
               @@ -1,3 +1,3 @@\n\
               \x20alpha\n\
               -beta\n\
               +BETA\n\
               \x20gamma\n\
               === end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.join("code.txt")).unwrap(),
        "alpha\nBETA\ngamma\n"
    );
    assert_eq!(commit_count(&repo), 3);
}

#[test]
fn planted_rej_artifact_fails_the_diff() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(repo.join("code.txt"), "alpha\n").unwrap();
    sh(&repo, &["add", "-A"]);
    sh(&repo, &["commit", "-q", "-m", "fixture"]);
    // Clean mode Ignore keeps the planted artifact in place.
    std::fs::write(repo.join("stale.rej"), "leftover\n").unwrap();

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = ApplyContext {
        vcs: &vcs,
        preflights: &preflights,
        opts: ApplyOptions {
            clean: CleanMode::Ignore,
            push: false,
        },
    };

    let doc = "=== git.diff: \"\" ===\n\
               diff --git a/code.txt b/code.txt\n\
               --- a/code.txt\n\
               +++ b/code.txt\n\
               @@ -1 +1 @@\n\
               -alpha\n\
               +omega\n\
               === end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let err = apply_patch(&ctx, &repo, &patch).unwrap_err();
    assert!(matches!(err, ApplyError::Diff(_)), "got: {err}");
}

#[test]
fn commit_only_patch_keeps_staged_work() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    // Work staged outside of any patch; a clean would wipe it.
    std::fs::write(repo.join("staged.txt"), "pre-staged\n").unwrap();
    sh(&repo, &["add", "-A"]);

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = no_push_ctx(&vcs, &preflights);

    let doc = "=== git.commit: \"\" ===\nmessage = commit staged work\n=== end ===\n\
               === PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let outcome = apply_patch(&ctx, &repo, &patch).unwrap();

    assert_eq!(outcome, ApplyOutcome::Committed);
    assert_eq!(commit_count(&repo), 2);
    let last = sh(&repo, &["log", "-1", "--format=%s"]);
    assert_eq!(last.trim(), "commit staged work");
    assert!(repo.join("staged.txt").exists());
}

#[test]
fn strict_clean_refuses_dirty_tree() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    std::fs::write(repo.join("README.md"), "# dirtied\n").unwrap();

    let vcs = GitCli;
    let preflights = PreflightRegistry::new();
    let ctx = ApplyContext {
        vcs: &vcs,
        preflights: &preflights,
        opts: ApplyOptions {
            clean: CleanMode::Strict,
            push: false,
        },
    };

    let doc = "=== file.write: \"a.txt\" ===\nx\n=== end ===\n=== PATCH EOF ===\n";
    let patch = parse_patch(doc, EOF).unwrap();
    let err = apply_patch(&ctx, &repo, &patch).unwrap_err();
    assert!(matches!(err, ApplyError::DirtyTree));
    assert!(!repo.join("a.txt").exists());
}

#[test]
fn vcs_port_reports_status_without_erroring() {
    if !git_available() {
        return;
    }
    let (_t, repo) = init_repo();
    let vcs = GitCli;
    let out = vcs.run(&repo, &["rev-parse", "--verify", "HEAD"]).unwrap();
    assert!(out.success());
    let out = vcs
        .run(&repo, &["rev-parse", "--verify", "no-such-ref"])
        .unwrap();
    assert!(!out.success());
}
