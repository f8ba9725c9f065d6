//! Instruction-file parser.
//!
//! A document is a header region (`commitmsg:` / `author:` / `repo:`
//! fields), zero or more blocks, and a mandatory sentinel as the last
//! non-blank line. Each block is
//!
//! ```text
//! === file.write: "path/to/file" ===
//! key = value
//! multi<
//!  line one
//!  line two
//! >multi
//! body line 1
//! body line 2
//! === end ===
//! ```
//!
//! The parameter region is the contiguous prefix of the block that parses
//! as single-line or multi-line assignments; the first line that is
//! neither switches the block to body mode for good. Inside a multi-line
//! value every non-blank line must start with exactly one space (indent
//! protection), which is stripped.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ArgMap, Op, OpKind, Patch};
use crate::text::{last_nonblank_line, normalize_lf};

/// Errors from document parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The last non-blank line was not the configured sentinel.
    #[error("strict EOF check failed: expected {expected:?}, got {got:?}")]
    StrictEofMismatch {
        /// The configured sentinel.
        expected: String,
        /// What the document actually ends with.
        got: String,
    },

    /// A block header argument was not double-quoted.
    #[error("line {line}: block header argument must be double-quoted: {header}")]
    UnquotedArgument {
        /// 1-based line number of the header.
        line: usize,
        /// The offending header line.
        header: String,
    },

    /// The verb in a block header is not part of the grammar.
    #[error("line {line}: unknown verb {verb:?}")]
    UnknownVerb {
        /// 1-based line number of the header.
        line: usize,
        /// The unrecognized verb.
        verb: String,
    },

    /// A block was never closed with `=== end ===`.
    #[error("line {line}: block {verb} is missing its '=== end ===' terminator")]
    UnterminatedBlock {
        /// 1-based line number of the opening header.
        line: usize,
        /// The verb of the open block.
        verb: String,
    },

    /// A multi-line parameter was never closed with `>KEY`.
    #[error("line {line}: multi-line parameter {key:?} is missing its closing '>{key}'")]
    UnterminatedParam {
        /// 1-based line number of the `KEY<` opener.
        line: usize,
        /// The parameter key.
        key: String,
    },

    /// A non-blank line inside a multi-line parameter did not start with
    /// one space.
    #[error("line {line}: multi-line parameter {key:?}: content line must start with one space")]
    IndentProtectionViolated {
        /// 1-based line number of the offending content line.
        line: usize,
        /// The parameter key.
        key: String,
    },

    /// A positive `lineno` appeared on an op other than the first, or on
    /// more than one op.
    #[error("op #{index} ({verb}): explicit lineno is only allowed on the first op of a patch")]
    LinenoNotFirst {
        /// 0-based index of the offending op.
        index: usize,
        /// The verb of the offending op.
        verb: String,
    },

    /// `git.commit` was combined with other ops.
    #[error("git.commit must be the only op in a patch ({count} ops present)")]
    CommitNotAlone {
        /// Total op count of the patch.
        count: usize,
    },
}

static BLOCK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^===\s*([a-z]+(?:\.[a-z_]+)?)\s*:\s*(.*?)\s*===\s*$").expect("static regex")
});
static PARAM_SINGLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*)$").expect("static regex")
});
static PARAM_MULTI_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)<$").expect("static regex"));

const END_MARKER: &str = "=== end ===";

/// Parses a document against the configured sentinel.
///
/// # Errors
///
/// Returns the first [`ParseError`] encountered; no partial patch is
/// produced.
pub fn parse_patch(raw: &str, sentinel: &str) -> Result<Patch, ParseError> {
    let doc = normalize_lf(raw);

    let last = last_nonblank_line(&doc).unwrap_or_default();
    if last != sentinel {
        return Err(ParseError::StrictEofMismatch {
            expected: sentinel.to_string(),
            got: last.to_string(),
        });
    }

    let lines: Vec<&str> = doc.split('\n').collect();
    let mut patch = Patch::default();

    let mut i = 0usize;
    let mut in_header = true;
    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed == sentinel {
            break;
        }

        if in_header {
            if let Some(v) = line.strip_prefix("commitmsg:") {
                patch.commit_msg.get_or_insert_with(|| v.trim().to_string());
                i += 1;
                continue;
            }
            if let Some(v) = line.strip_prefix("author:") {
                patch.author.get_or_insert_with(|| v.trim().to_string());
                i += 1;
                continue;
            }
            if let Some(v) = line.strip_prefix("repo:") {
                patch.repo.get_or_insert_with(|| v.trim().to_string());
                i += 1;
                continue;
            }
        }

        if let Some(caps) = BLOCK_HEADER.captures(line) {
            in_header = false;
            let header_line = i + 1;
            let verb = caps.get(1).map_or("", |m| m.as_str());
            let arg = caps.get(2).map_or("", |m| m.as_str());

            let Some(kind) = OpKind::from_verb(verb) else {
                return Err(ParseError::UnknownVerb {
                    line: header_line,
                    verb: verb.to_string(),
                });
            };
            let Some(arg) = unquote(arg) else {
                return Err(ParseError::UnquotedArgument {
                    line: header_line,
                    header: line.trim().to_string(),
                });
            };

            let (op, next) = parse_block(kind, arg, &lines, i + 1, header_line, verb)?;
            patch.ops.push(op);
            i = next;
            continue;
        }

        i += 1;
    }

    validate(&patch)?;
    Ok(patch)
}

/// Strips the mandatory surrounding double quotes from a header argument.
fn unquote(arg: &str) -> Option<String> {
    let arg = arg.trim();
    if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
        Some(arg[1..arg.len() - 1].to_string())
    } else {
        None
    }
}

/// Normalizes a header path argument: trims, strips a leading `./`,
/// collapses doubled slashes.
fn norm_path(p: &str) -> String {
    let p = p.trim();
    let p = p.strip_prefix("./").unwrap_or(p);
    let mut out = p.to_string();
    while out.contains("//") {
        out = out.replace("//", "/");
    }
    out
}

/// Parses one block starting at `start` (index of the first line after
/// the header). Returns the op and the index of the line after
/// `=== end ===`.
fn parse_block(
    kind: OpKind,
    arg: String,
    lines: &[&str],
    start: usize,
    header_line: usize,
    verb: &str,
) -> Result<(Op, usize), ParseError> {
    let mut args = ArgMap::new();
    let mut body = String::new();
    let mut in_params = true;
    let mut terminated = false;

    let mut i = start;
    while i < lines.len() {
        let line = lines[i];

        if line.trim() == END_MARKER {
            terminated = true;
            i += 1;
            break;
        }

        if in_params {
            if let Some(caps) = PARAM_MULTI_OPEN.captures(line) {
                let key = caps.get(1).map_or("", |m| m.as_str()).to_string();
                let closer = format!(">{key}");
                let open_line = i + 1;
                let mut value = String::new();
                let mut closed = false;
                i += 1;
                while i < lines.len() {
                    let inner = lines[i];
                    if inner == closer {
                        closed = true;
                        i += 1;
                        break;
                    }
                    if inner.trim() == END_MARKER {
                        break;
                    }
                    if inner.is_empty() {
                        value.push('\n');
                    } else if let Some(stripped) = inner.strip_prefix(' ') {
                        value.push_str(stripped);
                        value.push('\n');
                    } else {
                        return Err(ParseError::IndentProtectionViolated {
                            line: i + 1,
                            key,
                        });
                    }
                    i += 1;
                }
                if !closed {
                    return Err(ParseError::UnterminatedParam {
                        line: open_line,
                        key,
                    });
                }
                args.set(&key, value);
                continue;
            }
            if let Some(caps) = PARAM_SINGLE.captures(line) {
                let key = caps.get(1).map_or("", |m| m.as_str());
                let value = caps.get(2).map_or("", |m| m.as_str()).trim();
                args.set(key, value);
                i += 1;
                continue;
            }
            // First non-parameter line: switch to body mode for good.
            in_params = false;
        }

        body.push_str(line);
        body.push('\n');
        i += 1;
    }

    if !terminated {
        return Err(ParseError::UnterminatedBlock {
            line: header_line,
            verb: verb.to_string(),
        });
    }

    let path = if kind.takes_path() {
        norm_path(&arg)
    } else {
        String::new()
    };
    if matches!(kind, OpKind::BlockDelete | OpKind::BlockReplace) {
        args.set("block_name", path.clone());
    }

    Ok((
        Op {
            kind,
            path,
            args,
            body,
        },
        i,
    ))
}

/// Patch-level invariants: the `lineno` first-op rule and the
/// `git.commit` exclusivity rule.
fn validate(patch: &Patch) -> Result<(), ParseError> {
    for (index, op) in patch.ops.iter().enumerate() {
        if op.args.uint("lineno") > 0 && index != 0 {
            return Err(ParseError::LinenoNotFirst {
                index,
                verb: op.kind.name().to_string(),
            });
        }
    }
    if patch.ops.len() > 1 && patch.ops.iter().any(|op| op.kind == OpKind::GitCommit) {
        return Err(ParseError::CommitNotAlone {
            count: patch.ops.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOF: &str = "=== PATCH EOF ===";

    #[test]
    fn test_single_block_header_body_switch() {
        let doc = "=== file.write: \"a.txt\" ===\nhello\n=== end ===\n=== PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        assert_eq!(patch.ops.len(), 1);
        let op = &patch.ops[0];
        assert_eq!(op.kind, OpKind::FileWrite);
        assert_eq!(op.path, "a.txt");
        assert!(op.args.iter().next().is_none());
        assert_eq!(op.body, "hello\n");
    }

    #[test]
    fn test_sentinel_strictness() {
        let doc = "=== file.write: \"a.txt\" ===\nhello\n=== end ===\n=== PATCH EOF===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::StrictEofMismatch { .. }));
        // Trailing blank lines after the sentinel are fine.
        let doc = "=== file.write: \"a.txt\" ===\nx\n=== end ===\n=== PATCH EOF ===\n\n  \n";
        assert!(parse_patch(doc, EOF).is_ok());
    }

    #[test]
    fn test_header_fields_first_occurrence_wins() {
        let doc = "commitmsg: first\nauthor: A <a@x>\ncommitmsg: second\nrepo: web\n\
                   === PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        assert_eq!(patch.commit_msg.as_deref(), Some("first"));
        assert_eq!(patch.author.as_deref(), Some("A <a@x>"));
        assert_eq!(patch.repo.as_deref(), Some("web"));
    }

    #[test]
    fn test_single_line_params_and_body() {
        let doc = "=== line.insert: \"src/m.rs\" ===\nkeys = fn main\nnthl = 2\nlet x = 1;\n\
                   === end ===\n=== PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        let op = &patch.ops[0];
        assert_eq!(op.args.get("keys"), Some("fn main"));
        assert_eq!(op.args.uint("nthl"), 2);
        // `let x = 1;` matches the KEY=VALUE shape... but `let x` is not an
        // identifier, so it lands in the body.
        assert_eq!(op.body, "let x = 1;\n");
    }

    #[test]
    fn test_multi_line_param_strips_one_space() {
        let doc = "=== file.replace: \"a.txt\" ===\npattern<\n line1\n line2\n>pattern\n\
                   body\n=== end ===\n=== PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        let op = &patch.ops[0];
        assert_eq!(op.args.get("pattern"), Some("line1\nline2\n"));
        assert_eq!(op.body, "body\n");
    }

    #[test]
    fn test_multi_line_param_blank_lines_pass_through() {
        let doc = "=== file.replace: \"a.txt\" ===\nwith<\n line1\n\n line2\n>with\n\
                   === end ===\n=== PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        assert_eq!(
            patch.ops[0].args.get("with"),
            Some("line1\n\nline2\n")
        );
        assert!(patch.ops[0].body.is_empty());
    }

    #[test]
    fn test_indent_protection_violation() {
        let doc = "=== file.replace: \"a.txt\" ===\nwith<\n ok\nbad\n>with\n\
                   === end ===\n=== PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(
            err,
            ParseError::IndentProtectionViolated { line: 4, .. }
        ));
    }

    #[test]
    fn test_unterminated_multi_line_param() {
        let doc = "=== file.replace: \"a.txt\" ===\nwith<\n x\n=== end ===\n=== PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedParam { .. }));
    }

    #[test]
    fn test_unquoted_argument() {
        let doc = "=== file.write: a.txt ===\nx\n=== end ===\n=== PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::UnquotedArgument { line: 1, .. }));
    }

    #[test]
    fn test_unknown_verb() {
        let doc = "=== file.explode: \"a.txt\" ===\nx\n=== end ===\n=== PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::UnknownVerb { .. }));
    }

    #[test]
    fn test_unterminated_block() {
        let doc = "=== file.write: \"a.txt\" ===\nhello\n=== PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::UnterminatedBlock { line: 1, .. }));
    }

    #[test]
    fn test_lineno_only_on_first_op() {
        let doc = "=== file.write: \"a.txt\" ===\nx\n=== end ===\n\
                   === line.delete: \"b.txt\" ===\nlineno = 3\n=== end ===\n\
                   === PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::LinenoNotFirst { index: 1, .. }));

        let doc = "=== line.delete: \"b.txt\" ===\nlineno = 3\n=== end ===\n\
                   === file.write: \"a.txt\" ===\nx\n=== end ===\n\
                   === PATCH EOF ===\n";
        assert!(parse_patch(doc, EOF).is_ok());
    }

    #[test]
    fn test_git_commit_must_be_alone() {
        let doc = "=== git.commit: \"\" ===\nmessage = wip\n=== end ===\n\
                   === file.write: \"a.txt\" ===\nx\n=== end ===\n\
                   === PATCH EOF ===\n";
        let err = parse_patch(doc, EOF).unwrap_err();
        assert!(matches!(err, ParseError::CommitNotAlone { count: 2 }));
    }

    #[test]
    fn test_crlf_document_normalized() {
        let doc = "=== file.write: \"a.txt\" ===\r\nhello\r\n=== end ===\r\n=== PATCH EOF ===\r\n";
        let patch = parse_patch(doc, EOF).unwrap();
        assert_eq!(patch.ops[0].body, "hello\n");
    }

    #[test]
    fn test_path_normalization() {
        let doc = "=== file.write: \"./a//b.txt\" ===\nx\n=== end ===\n=== PATCH EOF ===\n";
        let patch = parse_patch(doc, EOF).unwrap();
        assert_eq!(patch.ops[0].path, "a/b.txt");
    }
}
