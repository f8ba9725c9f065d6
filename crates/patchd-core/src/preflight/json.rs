//! JSON pretty-printing preflight.

use std::path::Path;

use super::{Preflight, PreflightError};
use crate::text::{atomic_write_preserving, has_crlf, normalize_lf, to_crlf};

/// Reformats `*.json` files to 2-space-indented canonical form, keeping
/// the original EOL style and guaranteeing exactly one trailing newline.
pub struct JsonPrettyRunner;

const NAME: &str = "json-pretty";

impl Preflight for JsonPrettyRunner {
    fn name(&self) -> &'static str {
        NAME
    }

    fn matches(&self, rel: &str) -> bool {
        Path::new(rel)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }

    fn run(&self, repo: &Path, rel: &str) -> Result<bool, PreflightError> {
        let abs = repo.join(rel);
        let orig = std::fs::read_to_string(&abs).map_err(|source| PreflightError::Io {
            runner: NAME,
            path: rel.to_string(),
            source,
        })?;

        let value: serde_json::Value =
            serde_json::from_str(&orig).map_err(|e| PreflightError::Invalid {
                runner: NAME,
                path: rel.to_string(),
                reason: e.to_string(),
            })?;
        let pretty = serde_json::to_string_pretty(&value).map_err(|e| PreflightError::Invalid {
            runner: NAME,
            path: rel.to_string(),
            reason: e.to_string(),
        })?;

        let mut out = normalize_lf(&pretty);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        if has_crlf(&orig) {
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
