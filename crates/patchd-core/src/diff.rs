//! Unified-diff application through the external VCS.
//!
//! The pipeline: sanitize the text, classify it, validate hunk headers,
//! check filesystem preconditions, pre-stage new paths, write a
//! readback-verified temp patch, run `apply --check`, then walk a graded
//! strategy ladder until one argument set applies cleanly. A "success"
//! that leaves `*.rej` artifacts behind is a failure.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::vcs::{Git, VcsError};

/// Errors from the diff applier.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The body was empty.
    #[error("git.diff: empty diff")]
    Empty,

    /// The (sanitized) text does not look like a unified diff.
    #[error("git.diff: input is not a valid diff (missing diff headers)")]
    NotADiff,

    /// One or more `@@` lines are malformed.
    #[error("git.diff: malformed hunk header(s) at line(s) {0:?}")]
    BadHunkHeaders(Vec<usize>),

    /// Filesystem preconditions failed (A/M/D/R existence rules).
    #[error("git.diff: file existence preflight failed:\n{0}")]
    FsPreflight(String),

    /// The temp patch file did not read back byte-identical.
    #[error(
        "git.diff: temp patch readback mismatch (hash {want_hash}→{got_hash}, \
         lines {want_lines}→{got_lines})"
    )]
    ReadbackMismatch {
        /// SHA-256 prefix of the in-memory text.
        want_hash: String,
        /// SHA-256 prefix of what came back from disk.
        got_hash: String,
        /// Newline count of the in-memory text.
        want_lines: usize,
        /// Newline count read back.
        got_lines: usize,
    },

    /// `apply --check` rejected the patch before any strategy ran.
    #[error("git.diff: pre-check failed: {0}")]
    PrecheckFailed(String),

    /// Every strategy failed.
    #[error("git.diff: all apply strategies failed; last error: {0}")]
    AllStrategiesFailed(String),

    /// The apply reported success but `*.rej` artifacts exist.
    #[error("git.diff: hunks were rejected (.rej files):\n{0}")]
    Rejects(String),

    /// A newly-created file's line count does not match the patch.
    #[error("git.diff: new file {path} line count mismatch: expected {expected}, got {got}")]
    NewFileLineMismatch {
        /// The added path.
        path: String,
        /// `+`-line count from the patch.
        expected: usize,
        /// Actual working-tree line count.
        got: usize,
    },

    /// An I/O failure around the temp patch file.
    #[error("git.diff: {context}: {source}")]
    Io {
        /// The failing step.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The VCS itself failed to run.
    #[error(transparent)]
    Vcs(#[from] VcsError),
}

/// File-level summary of a diff.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiffSummary {
    /// Newly created paths.
    pub adds: Vec<String>,
    /// Deleted paths.
    pub dels: Vec<String>,
    /// Modified paths.
    pub mods: Vec<String>,
    /// Renames as `(from, to)`.
    pub renames: Vec<(String, String)>,
}

/// Strips Markdown code fences (exact first/last lines only), normalizes
/// line endings, and guarantees exactly one trailing newline. Hunk bodies
/// are never touched beyond EOL normalization.
#[must_use]
pub fn sanitize_diff(s: &str) -> String {
    let mut s = s.to_string();
    if s.starts_with("```") {
        let mut lines: Vec<&str> = s.split('\n').collect();
        if lines.first().is_some_and(|l| l.trim().starts_with("```")) {
            lines.remove(0);
        }
        if lines.last().is_some_and(|l| l.trim() == "```") {
            lines.pop();
        }
        s = lines.join("\n");
    }
    s = s.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = s.trim_end_matches('\n');
    format!("{trimmed}\n")
}

/// Rough validity check: a diff header or a `---`/`+++` pair must be
/// present.
#[must_use]
pub fn looks_like_diff(s: &str) -> bool {
    s.contains("diff --git ") || (s.contains("\n--- ") && s.contains("\n+++ "))
}

/// Whether 3-way merging is admissible: adds/deletes and renames skip it.
#[must_use]
pub fn classify_kinds(s: &str) -> (bool, bool) {
    let mut has_add_or_delete = false;
    let mut has_rename = false;
    for line in s.lines() {
        let t = line.trim();
        if t.starts_with("new file mode ")
            || t.starts_with("deleted file mode ")
            || t.starts_with("--- /dev/null")
            || t.starts_with("+++ /dev/null")
        {
            has_add_or_delete = true;
        }
        if t.starts_with("rename from ") || t.starts_with("rename to ") {
            has_rename = true;
        }
    }
    (has_add_or_delete, has_rename)
}

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@\s+-\d+(?:,\d+)?\s+\+\d+(?:,\d+)?\s+@@").expect("static regex")
});

/// Validates every `@@` line; returns the 1-based line numbers of the
/// malformed ones.
#[must_use]
pub fn bad_hunk_headers(s: &str) -> Vec<usize> {
    s.lines()
        .enumerate()
        .filter(|(_, l)| l.starts_with("@@") && !HUNK_HEADER.is_match(l))
        .map(|(i, _)| i + 1)
        .collect()
}

/// Ordered argument sets for `git apply`, selected by diff kind.
#[must_use]
pub fn strategy_ladder(diff: &str) -> Vec<Vec<&'static str>> {
    let (has_add_or_delete, has_rename) = classify_kinds(diff);
    if has_add_or_delete || has_rename {
        vec![
            vec!["--recount", "--whitespace=nowarn"],
            vec!["--index", "--recount", "--whitespace=nowarn"],
        ]
    } else {
        vec![
            vec!["--index", "--3way", "--recount", "--whitespace=nowarn"],
            vec!["--3way", "--recount", "--whitespace=nowarn"],
            vec!["--index", "--recount", "--whitespace=nowarn"],
            vec!["--recount", "--whitespace=nowarn"],
        ]
    }
}

/// Summarizes file-level operations from the diff text.
#[must_use]
#[allow(clippy::missing_panics_doc)] // string splits guarded by prefixes
pub fn summarize_files(s: &str) -> DiffSummary {
    let mut out = DiffSummary::default();
    let mut last_new_file = false;
    let mut last_deleted_file = false;
    let mut rename_from: Option<String> = None;

    for raw in s.lines() {
        let t = raw.trim();

        if t.starts_with("new file mode ") {
            last_new_file = true;
            last_deleted_file = false;
            continue;
        }
        if t.starts_with("deleted file mode ") {
            last_deleted_file = true;
            last_new_file = false;
            continue;
        }
        if let Some(path) = t.strip_prefix("+++ ") {
            if let Some(p) = path.strip_prefix("b/") {
                if last_new_file {
                    out.adds.push(p.to_string());
                    last_new_file = false;
                }
            }
            continue;
        }
        if let Some(path) = t.strip_prefix("--- ") {
            if let Some(p) = path.strip_prefix("a/") {
                if last_deleted_file {
                    out.dels.push(p.to_string());
                    last_deleted_file = false;
                }
            }
            continue;
        }
        if t.starts_with("diff --git a/") {
            let fields: Vec<&str> = t.split_whitespace().collect();
            if fields.len() >= 4 {
                let ap = fields[2].strip_prefix("a/").unwrap_or(fields[2]);
                let bp = fields[3].strip_prefix("b/").unwrap_or(fields[3]);
                if ap == bp && ap != "/dev/null" {
                    out.mods.push(ap.to_string());
                }
            }
            continue;
        }
        if let Some(from) = t.strip_prefix("rename from ") {
            rename_from = Some(from.trim().to_string());
            continue;
        }
        if let Some(to) = t.strip_prefix("rename to ") {
            if let Some(from) = rename_from.take() {
                out.renames.push((from, to.trim().to_string()));
            }
        }
    }

    // A file recorded as added or deleted is not also a modification.
    out.mods.retain(|m| {
        !out.adds.contains(m)
            && !out.dels.contains(m)
            && !out.renames.iter().any(|(f, t)| f == m || t == m)
    });
    out
}

/// Paths mentioned on `--- a/` and `+++ b/` lines plus rename endpoints.
fn mentioned_paths(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in s.lines() {
        let t = line.trim();
        for (prefix, strip) in [("--- ", "a/"), ("+++ ", "b/")] {
            if let Some(rest) = t.strip_prefix(prefix) {
                let rest = rest.trim();
                if rest != "/dev/null" {
                    if let Some(p) = rest.strip_prefix(strip) {
                        out.push(p.to_string());
                    }
                }
            }
        }
        if let Some(p) = t.strip_prefix("rename from ") {
            out.push(p.trim().to_string());
        }
        if let Some(p) = t.strip_prefix("rename to ") {
            out.push(p.trim().to_string());
        }
    }
    out.retain(|p| !p.is_empty() && !p.ends_with('/'));
    out.dedup();
    out
}

/// Counts the `+` body lines (excluding `+++`) belonging to one file.
#[must_use]
pub fn count_plus_lines_for(diff: &str, rel: &str) -> usize {
    let mut in_target = false;
    let mut in_hunk = false;
    let mut plus = 0usize;
    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            in_target = line.contains(&format!(" b/{rel}"));
            in_hunk = false;
            continue;
        }
        if !in_target {
            continue;
        }
        if line.starts_with("@@ ") {
            in_hunk = true;
            continue;
        }
        if in_hunk && line.starts_with('+') && !line.starts_with("+++") {
            plus += 1;
        }
    }
    plus
}

fn sha256_prefix(s: &str) -> String {
    let digest = Sha256::digest(s.as_bytes());
    let mut hex = String::with_capacity(16);
    for b in &digest[..4] {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}

fn newline_count(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

/// Extracts `at line N` from git output.
#[must_use]
pub fn extract_error_line(out: &str) -> Option<usize> {
    static AT_LINE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\bat line\s+(\d+)\b").expect("static regex"));
    AT_LINE
        .captures(out)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Renders ±`around` lines of context around `line` (1-based).
fn render_context(text: &str, line: usize, around: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let line = line.max(1);
    let start = line.saturating_sub(around).max(1);
    let end = (line + around).min(lines.len());
    let mut out = String::new();
    for i in start..=end {
        let _ = writeln!(out, "{i:5}| {}", lines[i - 1]);
    }
    out
}

fn find_rejects(repo: &Path) -> Vec<String> {
    let mut out = Vec::new();
    for entry in WalkDir::new(repo)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(Result::ok)
    {
        if entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("rej"))
        {
            if let Ok(rel) = entry.path().strip_prefix(repo) {
                out.push(rel.display().to_string());
            }
        }
    }
    out.sort();
    out
}

fn fs_preflight(repo: &Path, summary: &DiffSummary) -> Result<(), DiffError> {
    let exists = |p: &str| {
        let abs = repo.join(p);
        abs.is_file()
    };
    let mut conflicts = String::new();
    for p in &summary.adds {
        if exists(p) {
            let _ = writeln!(conflicts, " - [A] {p}: target already exists");
        }
    }
    for p in &summary.mods {
        if !exists(p) {
            let _ = writeln!(conflicts, " - [M] {p}: target does not exist");
        }
    }
    for p in &summary.dels {
        if !exists(p) {
            let _ = writeln!(conflicts, " - [D] {p}: target does not exist");
        }
    }
    for (from, to) in &summary.renames {
        if !exists(from) {
            let _ = writeln!(conflicts, " - [R] {from}: rename source does not exist");
        }
        if exists(to) {
            let _ = writeln!(conflicts, " - [R] {to}: rename target already exists");
        }
    }
    if conflicts.is_empty() {
        info!("🔒 preflight: file existence checks passed (A/M/D/R)");
        Ok(())
    } else {
        Err(DiffError::FsPreflight(conflicts))
    }
}

/// Writes the sanitized diff to a temp `.patch` file inside the repo,
/// fsyncs, and verifies the readback (hash + newline count).
fn write_temp_patch(
    repo: &Path,
    text: &str,
) -> Result<tempfile::NamedTempFile, DiffError> {
    let io = |context: &'static str| move |source| DiffError::Io { context, source };

    let mut tmp = tempfile::Builder::new()
        .prefix(".xgit_")
        .suffix(".patch")
        .tempfile_in(repo)
        .map_err(io("create temp patch"))?;
    tmp.write_all(text.as_bytes()).map_err(io("write temp patch"))?;
    tmp.flush().map_err(io("flush temp patch"))?;
    tmp.as_file().sync_all().map_err(io("fsync temp patch"))?;

    let back = std::fs::read_to_string(tmp.path()).map_err(io("read back temp patch"))?;
    let (want_hash, want_lines) = (sha256_prefix(text), newline_count(text));
    let (got_hash, got_lines) = (sha256_prefix(&back), newline_count(&back));
    if want_hash != got_hash || want_lines != got_lines {
        return Err(DiffError::ReadbackMismatch {
            want_hash,
            got_hash,
            want_lines,
            got_lines,
        });
    }
    Ok(tmp)
}

/// Applies a unified diff to the repository.
///
/// # Errors
///
/// Returns [`DiffError`] on any pipeline failure; the working tree may
/// carry partial changes, which the enclosing transaction rolls back.
#[allow(clippy::too_many_lines)]
pub fn apply_diff(git: &Git<'_>, diff_text: &str) -> Result<(), DiffError> {
    if diff_text.trim().is_empty() {
        return Err(DiffError::Empty);
    }

    let orig = diff_text;
    info!(
        "📝 diff before sanitize: {} bytes, {} lines, hash={}",
        orig.len(),
        newline_count(orig),
        sha256_prefix(orig)
    );

    let diff = sanitize_diff(orig);
    info!(
        "📝 diff after sanitize: {} bytes, {} lines, hash={}",
        diff.len(),
        newline_count(&diff),
        sha256_prefix(&diff)
    );

    if !looks_like_diff(&diff) {
        return Err(DiffError::NotADiff);
    }

    let bad = bad_hunk_headers(&diff);
    if !bad.is_empty() {
        return Err(DiffError::BadHunkHeaders(bad));
    }

    let summary = summarize_files(&diff);
    fs_preflight(git.repo(), &summary)?;

    // Intent-to-add for every mentioned path so `--index` strategies see
    // new and renamed files. Advisory: failures are expected for paths
    // that do not exist yet.
    for p in mentioned_paths(&diff) {
        let _ = git.add_intent(&p);
    }

    let tmp = write_temp_patch(git.repo(), &diff)?;
    let tmp_path = tmp.path().to_string_lossy().into_owned();
    info!("📄 applying patch file: {tmp_path}");

    let precheck = git.run(&["apply", "--check", "--recount", "--verbose", &tmp_path])?;
    if !precheck.success() {
        let msg = precheck.diagnostics().trim().to_string();
        if let Some(line) = extract_error_line(&msg) {
            info!(
                "🧭 pre-check failed at line {line}, context (±20):\n{}",
                render_context(&diff, line, 20)
            );
        }
        return Err(DiffError::PrecheckFailed(msg));
    }

    let mut last_err = String::new();
    let ladder = strategy_ladder(&diff);
    for (i, strategy) in ladder.iter().enumerate() {
        let mut args: Vec<&str> = vec!["apply"];
        args.extend_from_slice(strategy);
        args.push(&tmp_path);

        let out = git.run(&args)?;
        if !out.success() {
            last_err = out.diagnostics().trim().to_string();
            warn!("⚠️ git apply {strategy:?} failed (strategy #{})", i + 1);
            if let Some(line) = extract_error_line(&last_err) {
                info!(
                    "🧭 failure context (±20):\n{}",
                    render_context(&diff, line, 20)
                );
            }
            continue;
        }

        let rejects = find_rejects(git.repo());
        if !rejects.is_empty() {
            let listing: String = rejects.iter().map(|r| format!(" - {r}\n")).collect();
            return Err(DiffError::Rejects(listing));
        }

        for p in &summary.adds {
            info!("✅ git.diff done (strategy #{}) added    {p}", i + 1);
        }
        for p in &summary.dels {
            info!("✅ git.diff done (strategy #{}) deleted  {p}", i + 1);
        }
        for p in &summary.mods {
            info!("✅ git.diff done (strategy #{}) modified {p}", i + 1);
        }
        for (from, to) in &summary.renames {
            info!("✅ git.diff done (strategy #{}) renamed  {from} -> {to}", i + 1);
        }
        if summary == DiffSummary::default() {
            info!("✅ git.diff done (strategy #{})", i + 1);
        }

        // New files get a strong check: `+` lines must equal the
        // working-tree line count.
        for p in &summary.adds {
            let expected = count_plus_lines_for(&diff, p);
            if expected == 0 {
                info!("ℹ️ added {p}: skipping line-count check (no '+' lines found)");
                continue;
            }
            let data = std::fs::read(git.repo().join(p)).map_err(|source| DiffError::Io {
                context: "read added file",
                source,
            })?;
            let mut got = data.iter().filter(|&&b| b == b'\n').count();
            if !data.is_empty() && data.last() != Some(&b'\n') {
                got += 1;
            }
            if got != expected {
                return Err(DiffError::NewFileLineMismatch {
                    path: p.clone(),
                    expected,
                    got,
                });
            }
            info!("🔎 verified {p}: {expected} lines");
        }
        return Ok(());
    }

    let rejects = find_rejects(git.repo());
    if rejects.is_empty() {
        Err(DiffError::AllStrategiesFailed(last_err))
    } else {
        let listing: String = rejects.iter().map(|r| format!(" - {r}\n")).collect();
        Err(DiffError::Rejects(listing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOD_DIFF: &str = "diff --git a/src/a.rs b/src/a.rs\n\
        index 000..111 100644\n\
        --- a/src/a.rs\n\
        +++ b/src/a.rs\n\
        @@ -1,2 +1,2 @@\n\
        -old\n\
        +new\n\
        \x20keep\n";

    #[test]
    fn test_sanitize_strips_fences_and_normalizes() {
        let fenced = format!("```diff\n{MOD_DIFF}```");
        let clean = sanitize_diff(&fenced);
        assert!(clean.starts_with("diff --git"));
        assert!(!clean.contains("```"));
        assert!(clean.ends_with("keep\n"));
        // trailing-newline collapse
        assert_eq!(sanitize_diff("x\n\n\n"), "x\n");
        // CRLF normalization
        assert_eq!(sanitize_diff("a\r\nb\r"), "a\nb\n");
    }

    #[test]
    fn test_sanitize_does_not_touch_inner_fences() {
        let inner = "diff --git a/x b/x\n--- a/x\n+++ b/x\n@@ -1 +1 @@\n-```\n+code\n";
        assert_eq!(sanitize_diff(inner), inner);
    }

    #[test]
    fn test_classification_and_ladder() {
        let (ad, ren) = classify_kinds(MOD_DIFF);
        assert!(!ad && !ren);
        let ladder = strategy_ladder(MOD_DIFF);
        assert_eq!(ladder.len(), 4);
        assert!(ladder[0].contains(&"--3way"));

        let add_diff = "diff --git a/n b/n\nnew file mode 100644\n--- /dev/null\n+++ b/n\n";
        let (ad, _) = classify_kinds(add_diff);
        assert!(ad);
        let ladder = strategy_ladder(add_diff);
        assert_eq!(ladder.len(), 2);
        assert!(!ladder.iter().flatten().any(|a| *a == "--3way"));
    }

    #[test]
    fn test_bad_hunk_headers() {
        let good = "@@ -1,2 +1,2 @@ fn main\nbody\n@@ -9 +9 @@\n";
        assert!(bad_hunk_headers(good).is_empty());
        let bad = "@@ -1,2 1,2 @@\nx\n@@ broken @@\n";
        assert_eq!(bad_hunk_headers(bad), vec![1, 3]);
    }

    #[test]
    fn test_summarize_files() {
        let diff = "diff --git a/m.rs b/m.rs\n--- a/m.rs\n+++ b/m.rs\n@@ -1 +1 @@\n-x\n+y\n\
            diff --git a/new.txt b/new.txt\nnew file mode 100644\n--- /dev/null\n+++ b/new.txt\n\
            @@ -0,0 +1 @@\n+hi\n\
            diff --git a/gone.txt b/gone.txt\ndeleted file mode 100644\n--- a/gone.txt\n+++ /dev/null\n\
            diff --git a/old.rs b/new.rs\nrename from old.rs\nrename to new.rs\n";
        let s = summarize_files(diff);
        assert_eq!(s.mods, vec!["m.rs"]);
        assert_eq!(s.adds, vec!["new.txt"]);
        assert_eq!(s.dels, vec!["gone.txt"]);
        assert_eq!(s.renames, vec![("old.rs".to_string(), "new.rs".to_string())]);
    }

    #[test]
    fn test_count_plus_lines_for_file() {
        let diff = "diff --git a/new.txt b/new.txt\nnew file mode 100644\n--- /dev/null\n\
            +++ b/new.txt\n@@ -0,0 +3 @@\n+one\n+two\n+three\n\
            diff --git a/other b/other\n--- a/other\n+++ b/other\n@@ -1 +1 @@\n+x\n";
        assert_eq!(count_plus_lines_for(diff, "new.txt"), 3);
        assert_eq!(count_plus_lines_for(diff, "other"), 1);
        assert_eq!(count_plus_lines_for(diff, "absent"), 0);
    }

    #[test]
    fn test_extract_error_line() {
        assert_eq!(extract_error_line("corrupt patch at line 40"), Some(40));
        assert_eq!(extract_error_line("error: At Line 7."), Some(7));
        assert_eq!(extract_error_line("nothing here"), None);
    }

    #[test]
    fn test_looks_like_diff() {
        assert!(looks_like_diff(MOD_DIFF));
        assert!(!looks_like_diff("just some prose\n"));
    }
}
