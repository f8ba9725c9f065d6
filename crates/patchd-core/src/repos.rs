//! Logical repository name resolution.
//!
//! The daemon never receives filesystem paths from a patch; it receives a
//! logical name and translates it through an alias table (`.repos` next
//! to the instruction file). Three line forms are accepted:
//!
//! ```text
//! # comment            ; also a comment
//! web = /srv/checkouts/web
//! site  ../site
//! default = web
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Errors from alias-table loading and name resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The alias table could not be read.
    #[error("failed to read alias table {path}: {source}")]
    TableUnreadable {
        /// The table path.
        path: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No logical name was given and the table has no default.
    #[error("no repository named: patch has no repo field and the alias table has no default")]
    NoName,

    /// The logical name is not a bare name.
    #[error("invalid repository name {0:?}: only logical names are allowed (no paths)")]
    NotALogicalName(String),

    /// The name is not in the table.
    #[error("unknown repository alias {0:?}")]
    UnknownAlias(String),

    /// The aliased directory does not exist.
    #[error("repository alias {alias:?} points to {path}, which is not a directory")]
    NotADirectory {
        /// The alias.
        alias: String,
        /// Where it pointed.
        path: String,
    },
}

/// A parsed alias table.
#[derive(Debug, Default, Clone)]
pub struct RepoTable {
    aliases: BTreeMap<String, PathBuf>,
    default: Option<String>,
}

impl RepoTable {
    /// Loads the table from `path`, resolving relative targets against
    /// the table's own directory.
    ///
    /// # Errors
    ///
    /// [`ResolveError::TableUnreadable`] when the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ResolveError> {
        let content =
            std::fs::read_to_string(path).map_err(|source| ResolveError::TableUnreadable {
                path: path.display().to_string(),
                source,
            })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::parse(&content, base))
    }

    /// Parses table content; `base` anchors relative right-hand sides.
    #[must_use]
    pub fn parse(content: &str, base: &Path) -> Self {
        let mut table = Self::default();
        for raw in content.lines() {
            let line = match raw.find(['#', ';']) {
                Some(i) => &raw[..i],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (name, target) = if let Some((k, v)) = line.split_once('=') {
                (k.trim(), v.trim())
            } else if let Some((k, v)) = line.split_once(char::is_whitespace) {
                (k.trim(), v.trim())
            } else {
                continue;
            };
            if name.is_empty() || target.is_empty() {
                continue;
            }

            if name.eq_ignore_ascii_case("default") {
                table.default = Some(target.to_string());
                continue;
            }

            let target = target.trim_matches('"');
            let path = Path::new(target);
            let abs = if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            };
            table.aliases.insert(name.to_string(), abs);
        }
        table
    }

    /// The table's default alias, if any.
    #[must_use]
    pub fn default_alias(&self) -> Option<&str> {
        self.default.as_deref()
    }

    /// Resolves a logical name (or the default when `None`) to the
    /// repository directory.
    ///
    /// # Errors
    ///
    /// See [`ResolveError`] variants; names containing path separators or
    /// `~`, and absolute paths, are rejected outright.
    pub fn resolve(&self, name: Option<&str>) -> Result<PathBuf, ResolveError> {
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(n) => n,
            None => self
                .default
                .as_deref()
                .ok_or(ResolveError::NoName)?,
        };

        if name.contains('/') || name.contains('\\') || name.starts_with('~') {
            return Err(ResolveError::NotALogicalName(name.to_string()));
        }

        let path = self
            .aliases
            .get(name)
            .ok_or_else(|| ResolveError::UnknownAlias(name.to_string()))?;
        if !path.is_dir() {
            return Err(ResolveError::NotADirectory {
                alias: name.to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(path.clone())
    }
}
