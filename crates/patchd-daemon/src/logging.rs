//! Dual console + file logging.
//!
//! One fmt layer writes to stdout, a second ANSI-less layer writes to
//! `patch.log`, which is truncated at daemon start so the file always
//! holds the current daemon's run.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Name of the log file inside the watch directory.
pub const LOG_FILE_NAME: &str = "patch.log";

/// Installs the global subscriber: `level` filter, console layer, and a
/// truncated `patch.log` layer.
///
/// # Errors
///
/// Fails when the log file cannot be created.
pub fn init(log_path: &Path, level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stdout),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file),
        )
        .init();

    Ok(())
}
