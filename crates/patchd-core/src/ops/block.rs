//! `block.*` executors: drop or replace a whole scope.

use std::fs;

use tracing::info;

use super::{ExecCtx, ExecError};
use crate::locator::resolve_scope;
use crate::model::Op;
use crate::text::{
    ensure_model_trailing_newline, join_lines, normalize_lf, split_lines, split_payload, splice,
};

fn run(
    op_name: &'static str,
    ctx: &ExecCtx<'_>,
    op: &Op,
    payload: &[String],
) -> Result<(usize, usize, usize), ExecError> {
    let rel = op.path.as_str();
    let raw = fs::read_to_string(ctx.abs(rel)).map_err(|e| ExecError::io(op_name, rel, e))?;
    let lines = split_lines(&normalize_lf(&raw));

    let scope =
        resolve_scope(&lines, &op.args).map_err(|e| ExecError::locate(op_name, rel, e))?;
    let deleted = scope.end - scope.start + 1;

    let lines = splice(&lines, scope.start - 1, deleted, payload);
    let lines = ensure_model_trailing_newline(lines);
    crate::text::atomic_write_preserving(&ctx.abs(rel), join_lines(&lines).as_bytes())
        .map_err(|e| ExecError::write(op_name, rel, e))?;
    Ok((scope.start, scope.end, deleted))
}

/// `block.delete`: drop `[start..end]`.
pub(super) fn delete(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let (start, end, deleted) = run("block.delete", ctx, op, &[])?;
    info!("🗑️ block.delete {}:[{start}..{end}] (-{deleted})", op.path);
    ctx.stage_and_preflight(&op.path)
}

/// `block.replace`: substitute `[start..end]` with the body's lines.
pub(super) fn replace(ctx: &ExecCtx<'_>, op: &Op) -> Result<(), ExecError> {
    let payload = split_payload(&normalize_lf(&op.body));
    let (start, end, deleted) = run("block.replace", ctx, op, &payload)?;
    info!(
        "✏️ block.replace {}:[{start}..{end}] ({deleted}→{})",
        op.path,
        payload.len()
    );
    ctx.stage_and_preflight(&op.path)
}
