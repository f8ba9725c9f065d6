//! Content sniffing: binary/text heuristics and magic-number matching.
//!
//! The text executors refuse to write binary-looking bytes into files with
//! text extensions, and `file.binary` refuses content that is plainly
//! text. Detection is heuristic; it exists to catch the common accident
//! (base64 pasted into `file.write`, source pasted into `file.binary`),
//! not to be a MIME oracle.

use std::path::Path;

/// Known text extensions (lowercase, without the dot).
const TEXT_EXTS: &[&str] = &[
    "txt", "md", "markdown", "rs", "go", "js", "ts", "py", "json", "toml", "ini", "conf", "yaml",
    "yml", "css", "scss", "html", "htm", "xml", "sh", "bash", "zsh", "fish",
];

/// Common binary extensions (lowercase, without the dot).
const BINARY_EXTS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "pdf", "zip", "gz", "tar", "rar", "exe", "dll", "so",
    "dylib", "ico", "woff", "woff2",
];

/// What a byte buffer looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Plain text.
    Text,
    /// Binary with no recognized signature.
    Binary,
    /// Binary with a recognized signature.
    Magic(&'static str),
}

/// Matches the leading bytes against a handful of well-known signatures.
#[must_use]
pub fn match_magic(b: &[u8]) -> Option<&'static str> {
    if b.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("png");
    }
    if b.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("jpeg");
    }
    if b.starts_with(b"GIF87a") || b.starts_with(b"GIF89a") {
        return Some("gif");
    }
    if b.starts_with(b"%PDF") {
        return Some("pdf");
    }
    if b.len() >= 4 && b[0] == b'P' && b[1] == b'K' && matches!(b[2], 3 | 5 | 7) {
        return Some("zip");
    }
    if b.starts_with(&[0x7F, b'E', b'L', b'F']) {
        return Some("elf");
    }
    if b.starts_with(&[0xFE, 0xED, 0xFA]) || b.starts_with(&[0xCF, 0xFA, 0xED, 0xFE]) {
        return Some("macho");
    }
    None
}

/// Returns true when the buffer looks binary: contains NUL, or more than
/// 5% of its bytes are non-printable control characters (TAB/LF/CR
/// allowed).
#[must_use]
pub fn looks_binary(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let mut ctrl = 0usize;
    for &b in data {
        if b == 0 {
            return true;
        }
        if b < 0x09 || (b > 0x0D && b < 0x20) {
            ctrl += 1;
        }
    }
    ctrl * 20 > data.len()
}

/// Classifies a buffer.
#[must_use]
pub fn sniff_kind(data: &[u8]) -> Kind {
    if let Some(m) = match_magic(data) {
        return Kind::Magic(m);
    }
    if looks_binary(data) {
        Kind::Binary
    } else {
        Kind::Text
    }
}

fn ext_of(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn is_text_path(path: &str) -> bool {
    let ext = ext_of(path);
    // No extension (Makefile, LICENSE, ...) is treated as text.
    ext.is_empty() || TEXT_EXTS.contains(&ext.as_str())
}

/// Validates content headed for a text write (`file.write` / `file.append`
/// / `file.prepend`).
///
/// # Errors
///
/// Returns a message when a text-suffixed (or suffix-less) path would
/// receive binary-looking content.
pub fn validate_text_write(path: &str, data: &[u8]) -> Result<(), String> {
    if is_text_path(path) && sniff_kind(data) != Kind::Text {
        return Err(format!(
            "content looks binary; refusing to write it into text file {path} (use file.binary)"
        ));
    }
    Ok(())
}

/// Validates content headed for `file.binary`.
///
/// # Errors
///
/// Returns a message when the decoded bytes are plainly text and the
/// extension is not a known binary one.
pub fn validate_binary_write(path: &str, data: &[u8]) -> Result<(), String> {
    let ext = ext_of(path);
    if sniff_kind(data) == Kind::Text && !BINARY_EXTS.contains(&ext.as_str()) {
        return Err(format!(
            "content looks like plain text; file.binary is not appropriate for {path}"
        ));
    }
    Ok(())
}
