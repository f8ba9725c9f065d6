//! # patchd-core
//!
//! Core library for patchd - a patch daemon that watches a plain-text
//! instruction file and applies the operations it declares to a git
//! repository as a single transaction.
//!
//! This crate provides the building blocks the daemon binary wires
//! together:
//!
//! - **Grammar**: the instruction-file parser ([`parser`]) and the
//!   operation model ([`model`])
//! - **Execution**: file/line/block executors ([`ops`]) backed by the
//!   line locator ([`locator`]) and atomic text I/O ([`text`])
//! - **Diffs**: the unified-diff applier with its strategy ladder
//!   ([`diff`])
//! - **Transactions**: snapshot/rollback orchestration and
//!   commit/push ([`txn`]) over the [`vcs`] port
//! - **Hooks**: the per-file preflight registry ([`preflight`])
//! - **Resolution**: logical repository names to directories ([`repos`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use patchd_core::parser::parse_patch;
//! use patchd_core::preflight::PreflightRegistry;
//! use patchd_core::txn::{apply_patch, ApplyContext, ApplyOptions};
//! use patchd_core::vcs::GitCli;
//!
//! let doc = std::fs::read_to_string("patch.txt")?;
//! let patch = parse_patch(&doc, "=== PATCH EOF ===")?;
//! let vcs = GitCli;
//! let preflights = PreflightRegistry::with_builtin_runners();
//! let ctx = ApplyContext {
//!     vcs: &vcs,
//!     preflights: &preflights,
//!     opts: ApplyOptions::default(),
//! };
//! apply_patch(&ctx, std::path::Path::new("/work/repo"), &patch)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod diff;
pub mod error;
pub mod locator;
pub mod model;
pub mod ops;
pub mod parser;
pub mod preflight;
pub mod repos;
pub mod sniff;
pub mod text;
pub mod txn;
pub mod vcs;

pub use error::ApplyError;
pub use model::{Op, OpKind, Patch};
