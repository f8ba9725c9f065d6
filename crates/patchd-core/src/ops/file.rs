//! `file.*` executors.

use std::fs;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::{NoExpand, Regex};
use tracing::{debug, info, warn};

use super::{ExecCtx, ExecError, prune_empty_parents};
use crate::model::Op;
use crate::sniff;
use crate::text::{
    atomic_write, atomic_write_preserving, ensure_trailing_newline, has_crlf, normalize_lf,
    to_crlf,
};

/// `file.write`: replace contents with the body, LF-normalized and
/// `\n`-terminated.
pub(super) fn write(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let content = ensure_trailing_newline(&normalize_lf(&op.body));
    sniff::validate_text_write(rel, content.as_bytes()).map_err(|reason| {
        ExecError::ContentRejected {
            op: "file.write",
            reason,
        }
    })?;
    atomic_write_preserving(&ctx.abs(rel), content.as_bytes())
        .map_err(|e| ExecError::write("file.write", rel, e))?;
    info!("✅ file.write done: {rel}");
    ctx.stage_and_preflight(rel)
}

/// `file.append`: create if missing; a missing trailing `\n` on the
/// existing tail is repaired before the body is concatenated.
pub(super) fn append(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let abs = ctx.abs(rel);
    let old = match fs::read_to_string(&abs) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ExecError::io("file.append", rel, e)),
    };
    let body = ensure_trailing_newline(&normalize_lf(&op.body));
    sniff::validate_text_write(rel, body.as_bytes()).map_err(|reason| {
        ExecError::ContentRejected {
            op: "file.append",
            reason,
        }
    })?;
    let mut out = if old.is_empty() {
        String::new()
    } else {
        ensure_trailing_newline(&old)
    };
    out.push_str(&body);
    atomic_write_preserving(&abs, out.as_bytes())
        .map_err(|e| ExecError::write("file.append", rel, e))?;
    info!("✅ file.append done: {rel}");
    ctx.stage_and_preflight(rel)
}

/// `file.prepend`: create if missing; normalized body ahead of the old
/// bytes.
pub(super) fn prepend(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let abs = ctx.abs(rel);
    let old = match fs::read_to_string(&abs) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ExecError::io("file.prepend", rel, e)),
    };
    let body = ensure_trailing_newline(&normalize_lf(&op.body));
    sniff::validate_text_write(rel, body.as_bytes()).map_err(|reason| {
        ExecError::ContentRejected {
            op: "file.prepend",
            reason,
        }
    })?;
    let out = format!("{body}{old}");
    atomic_write_preserving(&abs, out.as_bytes())
        .map_err(|e| ExecError::write("file.prepend", rel, e))?;
    info!("✅ file.prepend done: {rel}");
    ctx.stage_and_preflight(rel)
}

/// Builds the effective search regex for `file.replace`.
fn build_pattern(op: &Op, pattern: &str) -> Result<Regex, ExecError> {
    let mode = op.args.str_or("mode", "contains_line");
    let is_regex = op.args.bool_or("regex", false) || mode == "regex";
    let ci = op.args.bool_or("ci", false);
    let multiline = op.args.bool_or("multiline", false);

    let mut flags = String::from("(?s)");
    if ci {
        flags.push_str("(?i)");
    }

    let pat = if is_regex {
        if multiline {
            flags.push_str("(?m)");
        }
        pattern.to_string()
    } else {
        let mut escaped = regex::escape(pattern);
        if op.args.bool_or("ignore_spaces", false) {
            // Any literal space matches a run of Unicode whitespace,
            // including ideographic space, zero-width characters and BOM.
            escaped = escaped.replace(
                ' ',
                r"[\s\x{3000}\x{200B}\x{200C}\x{200D}\x{FEFF}]+",
            );
        }
        match mode {
            "equals_line" => {
                flags.push_str("(?m)");
                format!("^{escaped}$")
            },
            "contains_file" => escaped,
            // contains_line and the empty default
            _ => {
                flags.push_str("(?m)");
                escaped
            },
        }
    };

    Regex::new(&format!("{flags}{pat}")).map_err(ExecError::from)
}

/// `file.replace`: pattern substitution inside an optional line range,
/// with literal/regex modes, case folding, whitespace-insensitive
/// matching and a replacement-count cap.
#[allow(clippy::too_many_lines)]
pub(super) fn replace(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let Some(pattern) = op.args.get("pattern").filter(|p| !p.is_empty()) else {
        return Err(ExecError::MissingArg {
            op: "file.replace",
            arg: "pattern",
        });
    };
    // A multi-line pattern parameter carries the closing newline of its
    // last line; that newline is not part of the needle.
    let pattern = pattern.strip_suffix('\n').unwrap_or(pattern);

    let abs = ctx.abs(rel);
    let raw = fs::read_to_string(&abs).map_err(|e| ExecError::io("file.replace", rel, e))?;
    let was_crlf = has_crlf(&raw);
    let text = normalize_lf(&raw);

    let ensure_eof_nl = op.args.bool_or("ensure_eof_nl", true);
    let count = op.args.int_or("count", 0);
    let debug_on = op.args.bool_or("debug", false);

    // Line-range segmentation (1-based closed range; 0 = unbounded).
    let lines: Vec<&str> = text.split('\n').collect();
    let total = lines.len();
    let start = match op.args.uint("start_line") {
        0 => 1,
        n => n.min(total),
    };
    let end = match op.args.uint("end_line") {
        0 => total,
        n => n.clamp(start, total),
    };
    let segment = lines[start - 1..end].join("\n");

    let re = build_pattern(op, pattern)?;
    let found = re.find_iter(&segment).count();
    if debug_on {
        debug!(
            "🔎 file.replace pattern={:?} range={start}-{end} matches={found}",
            re.as_str()
        );
    }

    if found == 0 {
        if ensure_eof_nl && !text.ends_with('\n') {
            // Promotion: the one effect left is the trailing newline.
            let mut out = ensure_trailing_newline(&text);
            if was_crlf {
                out = to_crlf(&out);
            }
            atomic_write_preserving(&abs, out.as_bytes())
                .map_err(|e| ExecError::write("file.replace", rel, e))?;
            info!("✏️ file.replace ensured trailing newline: {rel}");
            return ctx.stage_and_preflight(rel);
        }
        warn!("⚠️ file.replace matched nothing: {rel} (range {start}-{end})");
        return Ok(());
    }

    let repl = op.body.strip_suffix('\n').unwrap_or(&op.body);
    #[allow(clippy::cast_sign_loss)]
    let limit = if count > 0 { count as usize } else { 0 };
    let seg_out = re.replacen(&segment, limit, NoExpand(repl));
    let replaced = if limit > 0 { found.min(limit) } else { found };

    let mut result = String::with_capacity(text.len());
    if start > 1 {
        result.push_str(&lines[..start - 1].join("\n"));
        result.push('\n');
    }
    result.push_str(&seg_out);
    if end < total {
        result.push('\n');
        result.push_str(&lines[end..].join("\n"));
    }

    if ensure_eof_nl && !result.ends_with('\n') {
        result.push('\n');
    }
    if was_crlf {
        result = to_crlf(&result);
    }

    atomic_write_preserving(&abs, result.as_bytes())
        .map_err(|e| ExecError::write("file.replace", rel, e))?;
    info!("✏️ file.replace done: {rel} (hits {replaced}, range {start}-{end})");
    ctx.stage_and_preflight(rel)
}

/// `file.delete`: recursive removal, then empty-parent pruning.
pub(super) fn delete(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let abs = ctx.abs(rel);
    if !abs.exists() {
        info!("ℹ️ file.delete skipped (missing): {rel}");
        return Ok(());
    }
    if abs.is_dir() {
        fs::remove_dir_all(&abs).map_err(|e| ExecError::io("file.delete", rel, e))?;
    } else {
        fs::remove_file(&abs).map_err(|e| ExecError::io("file.delete", rel, e))?;
    }
    prune_empty_parents(ctx.git.repo(), &abs);
    info!("🗑️ file.delete done: {rel}");
    // Stages the deletion for tracked paths; an untracked removal has
    // nothing to stage.
    let _ = ctx.git.add_path(rel);
    Ok(())
}

/// `file.move`: rename, creating the target parent first.
pub(super) fn r#move(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let Some(to) = op.args.get("to").map(str::trim).filter(|t| !t.is_empty()) else {
        return Err(ExecError::MissingArg {
            op: "file.move",
            arg: "to",
        });
    };
    let from_abs = ctx.abs(rel);
    let to_abs = ctx.abs(to);

    if !from_abs.exists() {
        if op.args.bool_or("allow_noop", false) {
            info!("ℹ️ file.move skipped (missing): {rel}");
            return Ok(());
        }
        return Err(ExecError::io(
            "file.move",
            rel,
            std::io::Error::new(std::io::ErrorKind::NotFound, "source does not exist"),
        ));
    }
    if let Some(parent) = to_abs.parent() {
        fs::create_dir_all(parent).map_err(|e| ExecError::io("file.move", to, e))?;
    }
    fs::rename(&from_abs, &to_abs).map_err(|e| ExecError::io("file.move", rel, e))?;
    info!("🔁 file.move done: {rel} -> {to}");
    let _ = ctx.git.add_path(rel);
    ctx.stage_and_preflight(to)
}

/// `file.chmod`: apply an octal mode string.
pub(super) fn chmod(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let Some(mode_str) = op.args.get("mode").map(str::trim).filter(|m| !m.is_empty()) else {
        return Err(ExecError::MissingArg {
            op: "file.chmod",
            arg: "mode",
        });
    };
    let mode = u32::from_str_radix(mode_str, 8)
        .map_err(|_| ExecError::InvalidMode(mode_str.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(ctx.abs(rel), fs::Permissions::from_mode(mode))
            .map_err(|e| ExecError::io("file.chmod", rel, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    info!("🔐 file.chmod done: {rel} -> {mode_str}");
    ctx.stage_and_preflight(rel)
}

/// `file.eol`: convert line endings, optionally guaranteeing a trailing
/// newline.
pub(super) fn eol(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let abs = ctx.abs(rel);
    let raw = fs::read_to_string(&abs).map_err(|e| ExecError::io("file.eol", rel, e))?;

    let style = op.args.str_or("style", "lf").trim().to_lowercase();
    let ensure_nl = op.args.bool_or("ensure_nl", true);

    let mut out = match style.as_str() {
        "lf" => normalize_lf(&raw),
        "crlf" => to_crlf(&raw),
        other => return Err(ExecError::InvalidEolStyle(other.to_string())),
    };
    if ensure_nl && !out.is_empty() && !out.ends_with('\n') {
        out.push_str(if style == "crlf" { "\r\n" } else { "\n" });
    }

    atomic_write_preserving(&abs, out.as_bytes())
        .map_err(|e| ExecError::write("file.eol", rel, e))?;
    info!("🧹 file.eol done: {rel} ({style}, ensure_nl={ensure_nl})");
    ctx.stage_and_preflight(rel)
}

fn decode_base64_body(op_name: &'static str, body: &str) -> Result<Vec<u8>, ExecError> {
    let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(ExecError::EmptyBody { op: op_name });
    }
    BASE64.decode(compact.as_bytes()).map_err(|source| ExecError::Base64 {
        op: op_name,
        source,
    })
}

/// `file.image`: body is base64; decoded bytes written verbatim.
pub(super) fn image(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let raw = decode_base64_body("file.image", &op.body)?;
    atomic_write(&ctx.abs(rel), &raw, None)
        .map_err(|e| ExecError::write("file.image", rel, e))?;
    info!("🖼️ file.image done: {rel} (size={})", raw.len());
    ctx.stage_and_preflight(rel)
}

/// `file.binary`: like `file.image`, but refuses plainly-text content.
pub(super) fn binary(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let raw = decode_base64_body("file.binary", &op.body)?;
    sniff::validate_binary_write(rel, &raw).map_err(|reason| ExecError::ContentRejected {
        op: "file.binary",
        reason,
    })?;
    atomic_write(&ctx.abs(rel), &raw, None)
        .map_err(|e| ExecError::write("file.binary", rel, e))?;
    info!("✅ file.binary done: {rel} (size={})", raw.len());
    ctx.stage_and_preflight(rel)
}
