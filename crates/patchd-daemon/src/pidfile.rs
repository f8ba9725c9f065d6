//! PID-file handling and the single-instance lock.
//!
//! The PID file doubles as the instance lock: `start` opens it and takes
//! an exclusive `flock`, so a second daemon against the same watch
//! directory fails fast instead of fighting over the repository. `stop`
//! and `status` only read the recorded PID.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use fs2::FileExt;

/// Name of the PID file inside the watch directory.
pub const PID_FILE_NAME: &str = ".xgit_patchd.pid";

/// An exclusively-locked PID file; the lock lives as long as this value.
pub struct PidFile {
    file: File,
    path: PathBuf,
}

impl PidFile {
    /// Opens (creating if needed) and locks the PID file, then records
    /// the current PID.
    ///
    /// # Errors
    ///
    /// Fails when another live instance holds the lock or the file is
    /// not writable.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open PID file {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "another patchd instance is already running (lock held on {})",
                path.display()
            );
        }

        let mut locked = Self {
            file,
            path: path.to_path_buf(),
        };
        locked.write_pid(std::process::id())?;
        Ok(locked)
    }

    fn write_pid(&mut self, pid: u32) -> Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        writeln!(self.file, "{pid}")?;
        self.file.flush()?;
        Ok(())
    }

    /// The PID file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Reads the PID recorded in `path`, if any.
#[must_use]
pub fn read_pid(path: &Path) -> Option<i32> {
    let mut s = String::new();
    File::open(path).ok()?.read_to_string(&mut s).ok()?;
    s.trim().parse().ok()
}

/// True when a process with `pid` exists (signal 0 probe).
#[must_use]
pub fn process_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Sends `SIGTERM` to `pid`.
///
/// # Errors
///
/// Propagates the kernel's refusal (no such process, not permitted).
pub fn terminate(pid: i32) -> Result<()> {
    #[cfg(unix)]
    {
        nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid),
            nix::sys::signal::Signal::SIGTERM,
        )
        .with_context(|| format!("failed to signal pid {pid}"))?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        bail!("stop is only supported on Unix (pid {pid})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_writes_pid_and_blocks_second_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PID_FILE_NAME);

        let held = PidFile::acquire(&path).unwrap();
        assert_eq!(read_pid(&path), Some(std::process::id() as i32));
        assert!(PidFile::acquire(&path).is_err());
        drop(held);

        // Lock released and file removed on drop.
        assert!(!path.exists());
        let again = PidFile::acquire(&path).unwrap();
        drop(again);
    }

    #[test]
    fn test_read_pid_absent_or_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(read_pid(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_alive_self() {
        assert!(process_alive(std::process::id() as i32));
        // PID 0 targets the process group; use an implausible PID instead.
        assert!(!process_alive(i32::MAX - 1));
    }
}
