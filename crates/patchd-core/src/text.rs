//! Text and atomic file I/O primitives.
//!
//! Everything that touches file content goes through this module: newline
//! normalization, the line model used by the `line.*`/`block.*` executors,
//! and the atomic write protocol (temp file in the same directory, write,
//! fsync, rename) that guarantees a reader never observes a partial file.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;

/// Errors from text-level file operations.
#[derive(Debug, thiserror::Error)]
pub enum TextError {
    /// The target path has no parent directory to host the temp file.
    #[error("path has no parent directory: {0}")]
    NoParentDirectory(String),

    /// An I/O error occurred during the operation.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Description of the failing step.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl TextError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Normalizes `\r\n` and bare `\r` to `\n`.
#[must_use]
pub fn normalize_lf(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n")
}

/// Converts all line endings to CRLF (normalizing first so existing CRLF
/// pairs are not doubled).
#[must_use]
pub fn to_crlf(s: &str) -> String {
    normalize_lf(s).replace('\n', "\r\n")
}

/// Returns true when the content uses CRLF line endings anywhere.
///
/// Used to restore the original EOL style after an LF-normalized edit.
#[must_use]
pub fn has_crlf(s: &str) -> bool {
    s.contains("\r\n")
}

/// Ensures the string ends with exactly one `\n`.
#[must_use]
pub fn ensure_trailing_newline(s: &str) -> String {
    let trimmed = s.trim_end_matches('\n');
    let mut out = String::with_capacity(trimmed.len() + 1);
    out.push_str(trimmed);
    out.push('\n');
    out
}

/// Returns the last non-blank line with any trailing `\r` stripped.
#[must_use]
pub fn last_nonblank_line(s: &str) -> Option<&str> {
    s.lines()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.trim().is_empty())
        .last()
}

/// Splits content into the line model: every element keeps its trailing
/// `\n` except possibly the last one, which is newline-less exactly when
/// the content does not end in `\n`.
///
/// An empty input produces an empty vector.
#[must_use]
pub fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<String> = Vec::new();
    let mut rest = content;
    while let Some(pos) = rest.find('\n') {
        lines.push(rest[..=pos].to_string());
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() {
        lines.push(rest.to_string());
    }
    lines
}

/// Joins a line model back into file content.
#[must_use]
pub fn join_lines(lines: &[String]) -> String {
    lines.concat()
}

/// Splits an operation body into insertable lines, each carrying a
/// trailing `\n`.
///
/// A body that already ends with `\n` does not produce a trailing empty
/// line; an empty body produces no lines at all.
#[must_use]
pub fn split_payload(body: &str) -> Vec<String> {
    if body.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let parts: Vec<&str> = body.split('\n').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 && part.is_empty() {
            continue;
        }
        out.push(format!("{part}\n"));
    }
    out
}

/// Replaces `del` lines starting at `start` (0-based) with `insert`,
/// clamping out-of-range boundaries.
#[must_use]
pub fn splice(lines: &[String], start: usize, del: usize, insert: &[String]) -> Vec<String> {
    let start = start.min(lines.len());
    let end = start.saturating_add(del).min(lines.len());
    let mut out = Vec::with_capacity(lines.len() - (end - start) + insert.len());
    out.extend_from_slice(&lines[..start]);
    out.extend_from_slice(insert);
    out.extend_from_slice(&lines[end..]);
    out
}

/// Inserts `insert` before index `idx` (0-based), clamped to the line
/// count.
#[must_use]
pub fn insert_at(lines: &[String], idx: usize, insert: &[String]) -> Vec<String> {
    splice(lines, idx, 0, insert)
}

/// Ensures the last line of the model carries a trailing `\n`.
#[must_use]
pub fn ensure_model_trailing_newline(mut lines: Vec<String>) -> Vec<String> {
    if let Some(last) = lines.last_mut() {
        if !last.ends_with('\n') {
            last.push('\n');
        }
    }
    lines
}

/// Permission bits and mtime captured from a file before it is rewritten.
#[derive(Debug, Clone, Copy)]
pub struct Preserve {
    #[cfg(unix)]
    mode: u32,
    mtime: Option<SystemTime>,
}

impl Preserve {
    /// Captures the mode and mtime of `path`, if it exists.
    #[must_use]
    pub fn capture(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            #[cfg(unix)]
            mode: {
                use std::os::unix::fs::PermissionsExt;
                meta.permissions().mode()
            },
            mtime: meta.modified().ok(),
        })
    }
}

/// Writes `data` to `path` atomically: temp file in the same directory,
/// write, flush, fsync, rename into place.
///
/// When `preserve` is given, the original permission bits and mtime are
/// restored on the new file. No temp sibling survives either outcome.
///
/// # Errors
///
/// Returns [`TextError`] if any filesystem step fails.
pub fn atomic_write(path: &Path, data: &[u8], preserve: Option<Preserve>) -> Result<(), TextError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| TextError::NoParentDirectory(path.display().to_string()))?;

    fs::create_dir_all(parent).map_err(|e| TextError::io("create parent directory", e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| TextError::io("create temp file", e))?;
    tmp.write_all(data)
        .map_err(|e| TextError::io("write to temp file", e))?;
    tmp.flush()
        .map_err(|e| TextError::io("flush temp file", e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| TextError::io("fsync temp file", e))?;

    #[cfg(unix)]
    if let Some(p) = preserve {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(p.mode))
            .map_err(|e| TextError::io("restore permissions", e))?;
    }

    tmp.persist(path)
        .map_err(|e| TextError::io("atomic rename to final path", e.error))?;

    if let Some(Preserve {
        mtime: Some(mtime), ..
    }) = preserve
    {
        // Best effort: a failed utime does not invalidate the write.
        if let Ok(file) = fs::File::options().write(true).open(path) {
            let _ = file.set_modified(mtime);
        }
    }

    Ok(())
}

/// Convenience wrapper: capture mode/mtime from the existing file at
/// `path` (if any), then [`atomic_write`] preserving them.
///
/// # Errors
///
/// Returns [`TextError`] if any filesystem step fails.
pub fn atomic_write_preserving(path: &Path, data: &[u8]) -> Result<(), TextError> {
    let preserve = Preserve::capture(path);
    atomic_write(path, data, preserve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_lf() {
        assert_eq!(normalize_lf("a\r\nb\rc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_ensure_trailing_newline_collapses_extras() {
        assert_eq!(ensure_trailing_newline("a"), "a\n");
        assert_eq!(ensure_trailing_newline("a\n\n\n"), "a\n");
    }

    #[test]
    fn test_last_nonblank_line_strips_cr() {
        let doc = "one\ntwo\r\n\n   \n";
        assert_eq!(last_nonblank_line(doc), Some("two"));
        assert_eq!(last_nonblank_line("\n  \n"), None);
    }

    #[test]
    fn test_split_lines_keeps_newlines() {
        let lines = split_lines("a\nb\nc");
        assert_eq!(lines, vec!["a\n", "b\n", "c"]);
        assert_eq!(join_lines(&lines), "a\nb\nc");
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_split_payload_drops_trailing_empty() {
        assert_eq!(split_payload("x\ny\n"), vec!["x\n", "y\n"]);
        assert_eq!(split_payload("x\ny"), vec!["x\n", "y\n"]);
        assert!(split_payload("").is_empty());
    }

    #[test]
    fn test_splice_and_insert() {
        let lines: Vec<String> = vec!["a\n".into(), "b\n".into(), "c\n".into()];
        let out = splice(&lines, 1, 1, &["X\n".into(), "Y\n".into()]);
        assert_eq!(out, vec!["a\n", "X\n", "Y\n", "c\n"]);
        let out = insert_at(&lines, 3, &["z\n".into()]);
        assert_eq!(out, vec!["a\n", "b\n", "c\n", "z\n"]);
    }

    #[test]
    fn test_atomic_write_preserves_mode_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, "old").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o751)).unwrap();
        }

        atomic_write_preserving(&path, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o7777, 0o751);
        }
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() != "f.txt")
            .collect();
        assert!(leftovers.is_empty(), "temp sibling left behind");
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        atomic_write(&path, b"deep\n", None).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "deep\n");
    }
}
