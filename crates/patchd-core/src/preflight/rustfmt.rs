//! rustfmt preflight.

use std::io::Write as _;
use std::path::Path;
use std::process::Command;

use tracing::warn;

use super::{Preflight, PreflightError};
use crate::text::{atomic_write_preserving, has_crlf, normalize_lf, to_crlf};

/// Formats `*.rs` files with the external `rustfmt` binary.
///
/// The file is formatted on a temp copy so a rustfmt crash never leaves a
/// half-written source file; the result lands through the atomic writer
/// with the original mode and mtime. A missing `rustfmt` binary degrades
/// to a logged skip so minimal hosts keep working.
pub struct RustfmtRunner;

const NAME: &str = "rustfmt";

impl Preflight for RustfmtRunner {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, rel: &str) -> bool {
        Path::new(rel)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("rs"))
    }

    fn run(&self, repo: &Path, rel: &str) -> Result<bool, PreflightError> {
        let abs = repo.join(rel);
        let io_err = |source| PreflightError::Io {
            runner: NAME,
            path: rel.to_string(),
            source,
        };

        let orig = std::fs::read_to_string(&abs).map_err(io_err)?;
        let was_crlf = has_crlf(&orig);
        let input = normalize_lf(&orig);

        let mut tmp = tempfile::Builder::new()
            .suffix(".rs")
            .tempfile_in(repo)
            .map_err(io_err)?;
        tmp.write_all(input.as_bytes()).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;

        let output = match Command::new("rustfmt")
            .arg("--edition")
            .arg("2021")
            .arg(tmp.path())
            .output()
        {
            Ok(out) => out,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("⚠️ preflight({NAME}): rustfmt not installed, skipping {rel}");
                return Ok(false);
            },
            Err(e) => return Err(io_err(e)),
        };
        if !output.status.success() {
            return Err(PreflightError::Invalid {
                runner: NAME,
                path: rel.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let formatted = std::fs::read_to_string(tmp.path()).map_err(io_err)?;
        let mut out = normalize_lf(&formatted);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        if was_crlf {
            out = to_crlf(&out);
        }

        if out == orig {
            return Ok(false);
        }
        atomic_write_preserving(&abs, out.as_bytes()).map_err(|source| PreflightError::Write {
            runner: NAME,
            path: rel.to_string(),
            source,
        })?;
        Ok(true)
    }
}
