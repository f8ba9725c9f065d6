//! `line.*` executors.
//!
//! All four verbs locate a single target line through the locator (scope
//! first, then line-in-scope) and edit the line model around it.

use std::fs;

use tracing::info;

use super::{ExecCtx, ExecError};
use crate::locator::{resolve_line_in_scope, resolve_scope};
use crate::model::Op;
use crate::text::{
    ensure_model_trailing_newline, insert_at, join_lines, normalize_lf, split_lines,
    split_payload, splice,
};

fn read_model(op_name: &'static str, ctx: &ExecCtx<'_>, rel: &str) -> Result<Vec<String>, ExecError> {
    let raw = fs::read_to_string(ctx.abs(rel)).map_err(|e| ExecError::io(op_name, rel, e))?;
    Ok(split_lines(&normalize_lf(&raw)))
}

fn write_model(
    op_name: &'static str,
    ctx: &ExecCtx<'_>,
    rel: &str,
    lines: Vec<String>,
    ensure_nl: bool,
) -> Result<(), ExecError> {
    let lines = if ensure_nl {
        ensure_model_trailing_newline(lines)
    } else {
        lines
    };
    crate::text::atomic_write_preserving(&ctx.abs(rel), join_lines(&lines).as_bytes())
        .map_err(|e| ExecError::write(op_name, rel, e))
}

fn locate(op_name: &'static str, op: &Op, lines: &[String]) -> Result<usize, ExecError> {
    let scope =
        resolve_scope(lines, &op.args).map_err(|e| ExecError::locate(op_name, &op.path, e))?;
    resolve_line_in_scope(lines, scope, &op.args)
        .map_err(|e| ExecError::locate(op_name, &op.path, e))
}

/// `line.insert`: insert the body's lines before the target line.
pub(super) fn insert(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let lines = read_model("line.insert", ctx, rel)?;
    let loc = locate("line.insert", op, &lines)?;
    let payload = split_payload(&normalize_lf(&op.body));
    let lines = insert_at(&lines, loc - 1, &payload);
    write_model(
        "line.insert",
        ctx,
        rel,
        lines,
        op.args.bool_or("ensure_nl", true),
    )?;
    info!("➕ line.insert {rel}:L{loc} (+{})", payload.len());
    ctx.stage_and_preflight(rel)
}

/// `line.append`: insert the body's lines after the target line.
pub(super) fn append(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let lines = read_model("line.append", ctx, rel)?;
    let loc = locate("line.append", op, &lines)?;
    let payload = split_payload(&normalize_lf(&op.body));
    let lines = insert_at(&lines, loc, &payload);
    write_model(
        "line.append",
        ctx,
        rel,
        lines,
        op.args.bool_or("ensure_nl", true),
    )?;
    info!("➕ line.append {rel}:L{loc} (+{})", payload.len());
    ctx.stage_and_preflight(rel)
}

/// `line.replace`: replace the target line with the body's lines. A
/// single identical replacement is a logged no-op unless `allow_noop`.
pub(super) fn replace(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let lines = read_model("line.replace", ctx, rel)?;
    let loc = locate("line.replace", op, &lines)?;
    let payload = split_payload(&normalize_lf(&op.body));

    let unchanged = payload.len() == 1
        && payload[0].trim_end_matches('\n') == lines[loc - 1].trim_end_matches('\n');
    if unchanged && !op.args.bool_or("allow_noop", false) {
        info!("ℹ️ line.replace noop: {rel}:L{loc} content unchanged");
        return Ok(());
    }

    let old = lines[loc - 1].trim_end_matches('\n').to_string();
    let new_count = payload.len();
    let lines = splice(&lines, loc - 1, 1, &payload);
    write_model(
        "line.replace",
        ctx,
        rel,
        lines,
        op.args.bool_or("ensure_nl", true),
    )?;
    info!("✏️ line.replace {rel}:L{loc} (1→{new_count})");
    info!("   -old: {old:?}");
    if new_count == 1 {
        info!("   +new: {:?}", payload[0].trim_end_matches('\n'));
    } else {
        info!("   +new: {new_count} lines");
    }
    ctx.stage_and_preflight(rel)
}

/// `line.delete`: remove the target line; `allow_noop` tolerates a
/// missing target.
pub(super) fn delete(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let rel = op.path.as_str();
    let allow_noop = op.args.bool_or("allow_noop", false);
    let lines = read_model("line.delete", ctx, rel)?;
    let loc = match locate("line.delete", op, &lines) {
        Ok(loc) => loc,
        Err(e) if allow_noop => {
            info!("ℹ️ line.delete noop: {rel} target not found ({e})");
            return Ok(());
        },
        Err(e) => return Err(e),
    };

    let removed = lines[loc - 1].trim_end_matches('\n').to_string();
    let lines = splice(&lines, loc - 1, 1, &[]);
    write_model(
        "line.delete",
        ctx,
        rel,
        lines,
        op.args.bool_or("ensure_nl", true),
    )?;
    info!("🗑️ line.delete {rel}:L{loc} (-1) {removed:?}");
    ctx.stage_and_preflight(rel)
}
