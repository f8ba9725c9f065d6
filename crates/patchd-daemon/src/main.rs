//! patchd - patch daemon.
//!
//! Watches a plain-text instruction file; when the file is stable and
//! terminated by the strict EOF sentinel, parses it into operations and
//! applies them to the target git repository as one transaction
//! (stage → commit → push, rollback on failure).
//!
//! CLI: `patchd [start|stop|status]`
//! - `start`: run the watch loop in the foreground
//! - `stop`: terminate the running instance via its PID file
//! - `status`: report whether an instance is running

mod logging;
mod pidfile;
mod state;
mod watcher;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use patchd_core::parser::parse_patch;
use patchd_core::preflight::PreflightRegistry;
use patchd_core::repos::RepoTable;
use patchd_core::txn::{ApplyContext, ApplyOptions, CleanMode, apply_patch};
use patchd_core::vcs::GitCli;
use patchd_core::ApplyError;
use tracing::{error, info};

use crate::pidfile::{PID_FILE_NAME, PidFile};
use crate::state::{LAST_DIGEST_FILE_NAME, LastDigest};
use crate::watcher::{WatchState, Watcher};

/// patchd - watch an instruction file and apply patches to a git repo
#[derive(Parser, Debug)]
#[command(name = "patchd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Instruction file to watch
    #[arg(long, default_value = "patch.txt")]
    patch_file: PathBuf,

    /// Alias table path (default: .repos next to the instruction file)
    #[arg(long)]
    repos_file: Option<PathBuf>,

    /// Strict EOF sentinel the instruction file must end with
    #[arg(long, default_value = "=== PATCH EOF ===")]
    eof: String,

    /// Poll interval between readiness checks (milliseconds)
    #[arg(long, default_value = "250")]
    interval_ms: u64,

    /// Working-tree policy before a batch: auto|strict|ignore
    #[arg(long, default_value = "auto")]
    clean: String,

    /// Do not push after a successful commit
    #[arg(long)]
    no_push: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watch loop (foreground)
    Start,

    /// Terminate the running instance
    Stop,

    /// Report whether an instance is running
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let patch_file = absolutize(&cli.patch_file);
    let watch_dir = patch_file
        .parent()
        .map(Path::to_path_buf)
        .context("instruction file has no parent directory")?;
    let pid_path = watch_dir.join(PID_FILE_NAME);

    match cli.command {
        Commands::Start => start(&cli, &patch_file, &watch_dir, &pid_path),
        Commands::Stop => stop(&pid_path),
        Commands::Status => {
            status(&pid_path);
            Ok(())
        },
    }
}

fn absolutize(p: &Path) -> PathBuf {
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(p))
            .unwrap_or_else(|_| p.to_path_buf())
    }
}

fn stop(pid_path: &Path) -> Result<()> {
    match pidfile::read_pid(pid_path) {
        Some(pid) if pidfile::process_alive(pid) => {
            pidfile::terminate(pid)?;
            println!("🛑 stopped (pid={pid})");
        },
        Some(pid) => println!("ℹ️ not running (stale PID file, pid={pid})"),
        None => println!("ℹ️ not running"),
    }
    let _ = std::fs::remove_file(pid_path);
    Ok(())
}

fn status(pid_path: &Path) {
    match pidfile::read_pid(pid_path) {
        Some(pid) if pidfile::process_alive(pid) => println!("✅ running (pid={pid})"),
        _ => println!("⛔ not running"),
    }
}

fn start(cli: &Cli, patch_file: &Path, watch_dir: &Path, pid_path: &Path) -> Result<()> {
    logging::init(&watch_dir.join(logging::LOG_FILE_NAME), &cli.log_level)?;

    let Some(clean) = CleanMode::parse(&cli.clean) else {
        bail!("invalid --clean {:?} (expected auto|strict|ignore)", cli.clean);
    };

    // The PID-file lock is the single-instance guard; hold it for the
    // whole loop.
    let _pid = PidFile::acquire(pid_path)?;
    info!("▶ patchd started, watching: {}", patch_file.display());

    let repos_path = cli
        .repos_file
        .clone()
        .map(|p| absolutize(&p))
        .unwrap_or_else(|| watch_dir.join(".repos"));
    let table = match RepoTable::load(&repos_path) {
        Ok(t) => t,
        Err(e) => {
            error!("❌ failed to load alias table: {e}");
            RepoTable::default()
        },
    };

    let store = LastDigest::new(watch_dir.join(LAST_DIGEST_FILE_NAME));
    let mut last_digest = store.load();

    let vcs = GitCli;
    let preflights = PreflightRegistry::with_builtin_runners();
    let ctx = ApplyContext {
        vcs: &vcs,
        preflights: &preflights,
        opts: ApplyOptions {
            clean,
            push: !cli.no_push,
        },
    };

    let mut watcher = Watcher::new(patch_file.to_path_buf(), &cli.eof);
    let interval = Duration::from_millis(cli.interval_ms);

    loop {
        if let WatchState::Ready { size, digest8 } = watcher.poll() {
            if last_digest.as_deref() != Some(digest8.as_str()) {
                info!("📦 patch stable (size={size} md5={digest8}) → applying");
                let reached_commit = apply_once(&ctx, &table, patch_file, &cli.eof);
                // Remembered in memory either way so a failing patch is
                // not retried until its file changes; persisted only
                // once the commit stage was reached.
                last_digest = Some(digest8.clone());
                if reached_commit {
                    store.store(&digest8);
                }
            }
        }
        std::thread::sleep(interval);
    }
}

/// One parse→resolve→apply cycle. Returns true when the batch reached
/// the commit stage (including "nothing to commit" and a failed push of
/// an existing commit).
fn apply_once(ctx: &ApplyContext<'_>, table: &RepoTable, patch_file: &Path, eof: &str) -> bool {
    info!(
        "▶ patch run started: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );

    let raw = match std::fs::read_to_string(patch_file) {
        Ok(s) => s,
        Err(e) => {
            error!("❌ failed to read instruction file: {e}");
            return false;
        },
    };

    let patch = match parse_patch(&raw, eof) {
        Ok(p) => p,
        Err(e) => {
            error!("❌ parse failed: {e}");
            return false;
        },
    };

    let repo = match table.resolve(patch.repo.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            error!("❌ repository resolution failed: {e}");
            return false;
        },
    };

    match apply_patch(ctx, &repo, &patch) {
        Ok(_) => {
            info!("✅ patch completed");
            true
        },
        Err(ApplyError::PushFailed(e)) => {
            // The local commit exists; operator intervention pushes it.
            error!("❌ push failed (commit kept): {e}");
            true
        },
        Err(e) => {
            error!("❌ {e}");
            false
        },
    }
}
