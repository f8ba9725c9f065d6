//! Line and scope location within a file's line model.
//!
//! The `line.*` and `block.*` executors never address lines directly;
//! they describe a target with keys and let this module resolve it. A key
//! set matches a line when every key is contained in the line after
//! stripping leading whitespace and (by default) case-folding. Because a
//! full conjunction is often over-constrained and a single key often
//! under-constrained, resolution walks a loose ladder: any single key
//! that hits exactly one line wins, then any pair, then the full set,
//! and only then an explicit `nth` pick among the remaining candidates.

use crate::model::ArgMap;

/// Errors from line/scope resolution.
#[derive(Debug, thiserror::Error)]
pub enum LocateError {
    /// No key matched any line in range.
    #[error("keys {keys:?} matched no line in [{from}..{to}]")]
    NoMatch {
        /// The offending key set.
        keys: Vec<String>,
        /// Search range start (1-based).
        from: usize,
        /// Search range end (1-based).
        to: usize,
    },

    /// Several candidate lines and no `nth` selector.
    #[error("keys matched lines {candidates:?}; disambiguate with {selector}=1..{n}", n = candidates.len())]
    Ambiguous {
        /// All candidate line numbers (1-based).
        candidates: Vec<usize>,
        /// The selector parameter that would disambiguate.
        selector: &'static str,
    },

    /// Neither `lineno` nor `keys` was supplied.
    #[error("missing lineno or keys")]
    MissingTarget,

    /// An explicit line number fell outside the scope.
    #[error("lineno={lineno} outside scope [{start}..{end}]")]
    LinenoOutOfScope {
        /// The relative line number given.
        lineno: usize,
        /// Scope start (1-based, absolute).
        start: usize,
        /// Scope end (1-based, absolute).
        end: usize,
    },

    /// `offset` used together with a restricted scope.
    #[error("offset is only valid when no scope is set")]
    OffsetWithScope,

    /// An offset pushed the target outside the file.
    #[error("offset moved target to line {0}, outside the file")]
    OffsetOutOfRange(i64),

    /// Scope boundaries resolved inverted.
    #[error("invalid scope: end ({end}) before start ({start})")]
    InvertedScope {
        /// Resolved start line.
        start: usize,
        /// Resolved end line.
        end: usize,
    },

    /// A scope sub-resolution failed.
    #[error("{which}: {source}")]
    ScopeKeys {
        /// Which boundary failed (`start-keys` or `end-keys`).
        which: &'static str,
        /// The underlying failure.
        #[source]
        source: Box<LocateError>,
    },
}

/// A closed 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scope {
    /// First line of the scope.
    pub start: usize,
    /// Last line of the scope.
    pub end: usize,
}

impl Scope {
    /// The whole-file scope for `n` lines.
    #[must_use]
    pub const fn whole(n: usize) -> Self {
        Self { start: 1, end: n }
    }

    /// True when the scope covers the whole file of `n` lines.
    #[must_use]
    pub const fn is_whole(self, n: usize) -> bool {
        self.start == 1 && self.end == n
    }
}

/// Splits a keys value into its tokens: newline-, `|`- and `,`-separated
/// forms are all accepted; blanks are dropped.
#[must_use]
pub fn explode_keys(value: &str) -> Vec<String> {
    let normalized = value.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = Vec::new();
    for seg in normalized.split('\n') {
        let seg = seg.trim();
        if seg.is_empty() {
            continue;
        }
        let pieces: Vec<&str> = if seg.contains('|') {
            seg.split('|').collect()
        } else if seg.contains(',') {
            seg.split(',').collect()
        } else {
            vec![seg]
        };
        for p in pieces {
            let p = p.trim();
            if !p.is_empty() {
                out.push(p.to_string());
            }
        }
    }
    out
}

fn fold(s: &str, icase: bool) -> String {
    let stripped = s.trim_start_matches([' ', '\t']);
    if icase {
        stripped.to_lowercase()
    } else {
        stripped.to_string()
    }
}

fn collect<F: Fn(&str) -> bool>(folded: &[String], from: usize, to: usize, hit: F) -> Vec<usize> {
    (from..=to)
        .filter(|&n| hit(&folded[n - 1]))
        .collect()
}

/// Loose-ladder resolution of a unique line in `[from..to]` (1-based,
/// inclusive).
///
/// Ladder: any single key unique → any key pair unique → all keys, where
/// a multi-candidate all-keys result may be picked with `nth` (1-based).
/// `selector` names the parameter an ambiguity error should suggest
/// (`nthl` for line keys, `nthb` for scope keys).
///
/// # Errors
///
/// [`LocateError::NoMatch`] when the conjunction hits nothing,
/// [`LocateError::Ambiguous`] when several candidates remain and `nth` is
/// 0 or out of range.
pub fn pick_unique_loose(
    lines: &[String],
    keys: &[String],
    from: usize,
    to: usize,
    nth: usize,
    icase: bool,
    selector: &'static str,
) -> Result<usize, LocateError> {
    let from = from.max(1);
    let to = to.min(lines.len());
    if keys.is_empty() {
        return Err(LocateError::MissingTarget);
    }
    if from > to {
        return Err(LocateError::NoMatch {
            keys: keys.to_vec(),
            from,
            to,
        });
    }

    let folded: Vec<String> = lines.iter().map(|l| fold(l, icase)).collect();
    let folded_keys: Vec<String> = keys
        .iter()
        .map(|k| if icase { k.to_lowercase() } else { k.clone() })
        .collect();

    // Rung 1: any single key hitting exactly one line.
    for k in &folded_keys {
        let hits = collect(&folded, from, to, |l| l.contains(k.as_str()));
        if hits.len() == 1 {
            return Ok(hits[0]);
        }
    }

    // Rung 2: any pair of keys hitting exactly one line.
    for a in 0..folded_keys.len() {
        for b in a + 1..folded_keys.len() {
            let (ka, kb) = (&folded_keys[a], &folded_keys[b]);
            let hits = collect(&folded, from, to, |l| {
                l.contains(ka.as_str()) && l.contains(kb.as_str())
            });
            if hits.len() == 1 {
                return Ok(hits[0]);
            }
        }
    }

    // Rung 3: full conjunction.
    let hits = collect(&folded, from, to, |l| {
        folded_keys.iter().all(|k| l.contains(k.as_str()))
    });
    match hits.len() {
        0 => Err(LocateError::NoMatch {
            keys: keys.to_vec(),
            from,
            to,
        }),
        1 => Ok(hits[0]),
        _ if nth >= 1 && nth <= hits.len() => Ok(hits[nth - 1]),
        _ => Err(LocateError::Ambiguous {
            candidates: hits,
            selector,
        }),
    }
}

/// Resolves a scope from `start-keys` / `end-keys` / `nthb`.
///
/// No `start-keys` → whole file. No `end-keys` → scope runs to EOF. The
/// end is searched strictly after the start and the first match wins.
///
/// # Errors
///
/// Propagates ladder failures tagged with the failing boundary, and
/// rejects an end that resolves before the start.
pub fn resolve_scope(lines: &[String], args: &ArgMap) -> Result<Scope, LocateError> {
    let n = lines.len();
    let icase = args.bool_or("icase", true);

    let Some(start_keys) = args.get("start-keys").map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Scope::whole(n));
    };

    let nthb = args.uint("nthb");
    let start = pick_unique_loose(lines, &explode_keys(start_keys), 1, n, nthb, icase, "nthb").map_err(
        |e| LocateError::ScopeKeys {
            which: "start-keys",
            source: Box::new(e),
        },
    )?;

    let Some(end_keys) = args.get("end-keys").map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(Scope { start, end: n });
    };

    // First match after the start wins.
    let end = pick_unique_loose(lines, &explode_keys(end_keys), start + 1, n, 1, icase, "nthb").map_err(
        |e| LocateError::ScopeKeys {
            which: "end-keys",
            source: Box::new(e),
        },
    )?;

    if end < start {
        return Err(LocateError::InvertedScope { start, end });
    }
    Ok(Scope { start, end })
}

fn parse_offset(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.starts_with('+') || raw.starts_with('-') {
        raw.parse::<i64>().ok()
    } else {
        None
    }
}

/// Resolves the target line (1-based, absolute) within a scope.
///
/// `lineno` (relative to the scope start) takes precedence; otherwise
/// `keys`/`nthl` run the loose ladder inside the scope. A signed `offset`
/// shifts a keys-resolved target, and is only legal when the scope is the
/// whole file.
///
/// # Errors
///
/// See [`LocateError`] variants.
pub fn resolve_line_in_scope(
    lines: &[String],
    scope: Scope,
    args: &ArgMap,
) -> Result<usize, LocateError> {
    let n = lines.len();
    let icase = args.bool_or("icase", true);
    let has_scope = !scope.is_whole(n);
    let off_raw = args.get("offset").map(str::trim).unwrap_or_default();

    if has_scope && !off_raw.is_empty() {
        return Err(LocateError::OffsetWithScope);
    }

    let lineno = args.uint("lineno");
    if lineno > 0 {
        let abs = scope.start + lineno - 1;
        if abs < scope.start || abs > scope.end {
            return Err(LocateError::LinenoOutOfScope {
                lineno,
                start: scope.start,
                end: scope.end,
            });
        }
        return Ok(abs);
    }

    let keys = args.get("keys").map(str::trim).unwrap_or_default();
    if keys.is_empty() {
        return Err(LocateError::MissingTarget);
    }
    let nthl = args.uint("nthl");
    let idx = pick_unique_loose(
        lines,
        &explode_keys(keys),
        scope.start,
        scope.end,
        nthl,
        icase,
        "nthl",
    )?;

    if let Some(offset) = parse_offset(off_raw) {
        let target = idx as i64 + offset;
        if target < 1 || target > n as i64 {
            return Err(LocateError::OffsetOutOfRange(target));
        }
        #[allow(clippy::cast_sign_loss)]
        return Ok(target as usize);
    }
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(src: &[&str]) -> Vec<String> {
        src.iter().map(|s| format!("{s}\n")).collect()
    }

    fn args(pairs: &[(&str, &str)]) -> ArgMap {
        let mut m = ArgMap::new();
        for (k, v) in pairs {
            m.set(k, *v);
        }
        m
    }

    #[test]
    fn test_explode_keys_forms() {
        assert_eq!(explode_keys("a\nb"), vec!["a", "b"]);
        assert_eq!(explode_keys("a | b"), vec!["a", "b"]);
        assert_eq!(explode_keys("a, b,"), vec!["a", "b"]);
        assert!(explode_keys("  \n").is_empty());
    }

    #[test]
    fn test_ladder_two_keys_conjunction() {
        let l = lines(&["import os", "import re", "import sys"]);
        let keys = explode_keys("import\nsys");
        assert_eq!(pick_unique_loose(&l, &keys, 1, 3, 0, true, "nthl").unwrap(), 3);
    }

    #[test]
    fn test_ladder_ambiguous_without_nth() {
        let l = lines(&["import os", "import re", "import sys"]);
        let keys = explode_keys("import");
        let err = pick_unique_loose(&l, &keys, 1, 3, 0, true, "nthl").unwrap_err();
        assert!(matches!(err, LocateError::Ambiguous { .. }));
        assert_eq!(pick_unique_loose(&l, &keys, 1, 3, 2, true, "nthl").unwrap(), 2);
    }

    #[test]
    fn test_ladder_ignores_indentation_and_case() {
        let l = lines(&["    FN Main()", "other"]);
        let keys = explode_keys("fn main");
        assert_eq!(pick_unique_loose(&l, &keys, 1, 2, 0, true, "nthl").unwrap(), 1);
        let err = pick_unique_loose(&l, &keys, 1, 2, 0, false, "nthl").unwrap_err();
        assert!(matches!(err, LocateError::NoMatch { .. }));
    }

    #[test]
    fn test_scope_defaults_to_whole_file() {
        let l = lines(&["a", "b", "c"]);
        let sc = resolve_scope(&l, &ArgMap::new()).unwrap();
        assert_eq!(sc, Scope::whole(3));
    }

    #[test]
    fn test_scope_start_to_eof_and_bounded() {
        let l = lines(&["head", "begin", "x", "end", "tail"]);
        let sc = resolve_scope(&l, &args(&[("start-keys", "begin")])).unwrap();
        assert_eq!(sc, Scope { start: 2, end: 5 });
        let sc = resolve_scope(&l, &args(&[("start-keys", "begin"), ("end-keys", "end")])).unwrap();
        assert_eq!(sc, Scope { start: 2, end: 4 });
    }

    #[test]
    fn test_lineno_relative_to_scope() {
        let l = lines(&["head", "begin", "x", "end", "tail"]);
        let sc = Scope { start: 2, end: 4 };
        let m = args(&[("lineno", "2")]);
        assert_eq!(resolve_line_in_scope(&l, sc, &m).unwrap(), 3);
        let m = args(&[("lineno", "4")]);
        assert!(matches!(
            resolve_line_in_scope(&l, sc, &m).unwrap_err(),
            LocateError::LinenoOutOfScope { .. }
        ));
    }

    #[test]
    fn test_offset_requires_whole_file_scope() {
        let l = lines(&["a", "target", "c"]);
        let m = args(&[("keys", "target"), ("offset", "+1")]);
        assert_eq!(resolve_line_in_scope(&l, Scope::whole(3), &m).unwrap(), 3);

        let m = args(&[("keys", "target"), ("offset", "-5")]);
        assert!(matches!(
            resolve_line_in_scope(&l, Scope::whole(3), &m).unwrap_err(),
            LocateError::OffsetOutOfRange(_)
        ));

        let m = args(&[("keys", "target"), ("offset", "+1")]);
        assert!(matches!(
            resolve_line_in_scope(&l, Scope { start: 1, end: 2 }, &m).unwrap_err(),
            LocateError::OffsetWithScope
        ));
    }

    #[test]
    fn test_unsigned_offset_is_ignored() {
        // An offset without an explicit sign is not an offset.
        let l = lines(&["a", "target", "c"]);
        let m = args(&[("keys", "target"), ("offset", "1")]);
        assert_eq!(resolve_line_in_scope(&l, Scope::whole(3), &m).unwrap(), 2);
    }
}
