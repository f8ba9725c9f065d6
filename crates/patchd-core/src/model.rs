//! The operation model: a parsed patch and its declarative operations.
//!
//! The verb set is closed ([`OpKind`]); the dispatcher matches it
//! exhaustively so an unknown verb is a parse-time concern, never a
//! runtime one.

use std::collections::BTreeMap;
use std::fmt;

/// A parsed instruction document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Patch {
    /// Commit message from the `commitmsg:` header field.
    pub commit_msg: Option<String>,

    /// Author from the `author:` header field (`Name <email>`).
    pub author: Option<String>,

    /// Logical repository name from the `repo:` header field.
    pub repo: Option<String>,

    /// Operations in document order.
    pub ops: Vec<Op>,
}

impl Patch {
    /// True when the patch consists of a single `git.commit` op.
    #[must_use]
    pub fn is_commit_only(&self) -> bool {
        self.ops.len() == 1 && self.ops[0].kind == OpKind::GitCommit
    }
}

/// One declarative operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Op {
    /// The verb.
    pub kind: OpKind,

    /// Repository-relative path for `file.*`/`line.*`; the symbolic block
    /// name for `block.*`; empty for `git.*`.
    pub path: String,

    /// Parameter region, keys lowercased, later assignment wins.
    pub args: ArgMap,

    /// Body: the verbatim post-parameter region, LF-normalized, empty or
    /// `\n`-terminated.
    pub body: String,
}

/// The closed set of verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)] // names mirror the wire verbs one-to-one
pub enum OpKind {
    FileWrite,
    FileAppend,
    FilePrepend,
    FileReplace,
    FileDelete,
    FileMove,
    FileChmod,
    FileEol,
    FileImage,
    FileBinary,
    LineInsert,
    LineAppend,
    LineReplace,
    LineDelete,
    BlockDelete,
    BlockReplace,
    GitDiff,
    GitRevert,
    GitTag,
    GitCommit,
}

impl OpKind {
    /// Parses a `namespace.verb` pair from a block header.
    #[must_use]
    pub fn from_verb(verb: &str) -> Option<Self> {
        Some(match verb {
            "file.write" => Self::FileWrite,
            "file.append" => Self::FileAppend,
            "file.prepend" => Self::FilePrepend,
            "file.replace" => Self::FileReplace,
            "file.delete" => Self::FileDelete,
            "file.move" => Self::FileMove,
            "file.chmod" => Self::FileChmod,
            "file.eol" => Self::FileEol,
            "file.image" => Self::FileImage,
            "file.binary" => Self::FileBinary,
            "line.insert" => Self::LineInsert,
            "line.append" => Self::LineAppend,
            "line.replace" => Self::LineReplace,
            "line.delete" => Self::LineDelete,
            "block.delete" => Self::BlockDelete,
            "block.replace" => Self::BlockReplace,
            "git.diff" => Self::GitDiff,
            "git.revert" => Self::GitRevert,
            "git.tag" => Self::GitTag,
            "git.commit" => Self::GitCommit,
            _ => return None,
        })
    }

    /// The wire name of the verb.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FileWrite => "file.write",
            Self::FileAppend => "file.append",
            Self::FilePrepend => "file.prepend",
            Self::FileReplace => "file.replace",
            Self::FileDelete => "file.delete",
            Self::FileMove => "file.move",
            Self::FileChmod => "file.chmod",
            Self::FileEol => "file.eol",
            Self::FileImage => "file.image",
            Self::FileBinary => "file.binary",
            Self::LineInsert => "line.insert",
            Self::LineAppend => "line.append",
            Self::LineReplace => "line.replace",
            Self::LineDelete => "line.delete",
            Self::BlockDelete => "block.delete",
            Self::BlockReplace => "block.replace",
            Self::GitDiff => "git.diff",
            Self::GitRevert => "git.revert",
            Self::GitTag => "git.tag",
            Self::GitCommit => "git.commit",
        }
    }

    /// True for verbs whose header argument is a repository-relative path.
    #[must_use]
    pub const fn takes_path(self) -> bool {
        !matches!(
            self,
            Self::GitDiff | Self::GitRevert | Self::GitTag | Self::GitCommit
        )
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase-keyed parameter map with typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgMap(BTreeMap<String, String>);

impl ArgMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key` (lowercased) → `value`, overriding any earlier
    /// assignment.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_lowercase(), value.into());
    }

    /// Raw value lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// True when the key is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// String accessor with default; empty values fall back to the
    /// default.
    #[must_use]
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.get(key) {
            Some(v) if !v.trim().is_empty() => v,
            _ => default,
        }
    }

    /// Boolean accessor: `1/true/yes/y/on` and `0/false/no/n/off`,
    /// anything else (or absence) yields the default.
    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(|v| v.trim().to_lowercase()) {
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "y" | "on") => true,
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "n" | "off") => false,
            _ => default,
        }
    }

    /// Integer accessor with default on absence or parse failure.
    #[must_use]
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Non-negative integer accessor, clamping parse failures to 0.
    #[must_use]
    pub fn uint(&self, key: &str) -> usize {
        self.get(key)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0)
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_round_trip() {
        for verb in [
            "file.write",
            "file.replace",
            "line.insert",
            "block.delete",
            "git.commit",
        ] {
            assert_eq!(OpKind::from_verb(verb).unwrap().name(), verb);
        }
        assert!(OpKind::from_verb("file.unknown").is_none());
        assert!(OpKind::from_verb("write").is_none());
    }

    #[test]
    fn test_argmap_lowercases_and_overrides() {
        let mut args = ArgMap::new();
        args.set("Keys", "a");
        args.set("KEYS", "b");
        assert_eq!(args.get("keys"), Some("b"));
    }

    #[test]
    fn test_argmap_typed_accessors() {
        let mut args = ArgMap::new();
        args.set("regex", "Yes");
        args.set("count", " 3 ");
        args.set("style", "");
        assert!(args.bool_or("regex", false));
        assert!(!args.bool_or("missing", false));
        assert!(args.bool_or("missing", true));
        assert_eq!(args.int_or("count", 0), 3);
        assert_eq!(args.str_or("style", "lf"), "lf");
    }

    #[test]
    fn test_commit_only() {
        let mut p = Patch::default();
        p.ops.push(Op {
            kind: OpKind::GitCommit,
            path: String::new(),
            args: ArgMap::new(),
            body: String::new(),
        });
        assert!(p.is_commit_only());
        let dup = p.ops[0].clone();
        p.ops.push(dup);
        assert!(!p.is_commit_only());
    }
}
