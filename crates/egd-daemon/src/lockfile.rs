//! Single-instance guard.
//!
//! The lock file holds the owning daemon's PID and a trailing newline,
//! created exclusively with owner-only permissions. A file whose PID no
//! longer names a live process of the current user is stale and is
//! reclaimed with one retry. The guard is an owned handle: dropping it
//! removes the file, and a crashed daemon leaves a reclaimable stale lock
//! rather than a wedge.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use egd_core::error::{codes, Component, EgdError};

/// Owned handle on the acquired lock file.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Acquire the lock, failing with `DAEMON_ALREADY_RUNNING` when a live
    /// holder exists. `force` skips the liveness check; the operator
    /// accepts responsibility for correctness.
    pub fn acquire(path: &Path, force: bool) -> Result<Self, EgdError> {
        match try_create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = read_holder(path);
                if let Some(pid) = holder {
                    if !force && process_alive(pid) {
                        return Err(EgdError::fatal(
                            Component::Lock,
                            codes::DAEMON_ALREADY_RUNNING,
                            format!("daemon already running with pid {pid} (lock {})", path.display()),
                        ));
                    }
                }
                warn!(
                    lock = %path.display(),
                    holder = holder.map(|p| p.to_string()).unwrap_or_else(|| "unreadable".into()),
                    forced = force,
                    "reclaiming stale lock file"
                );
                fs::remove_file(path).map_err(|e| lock_io(path, "cannot remove stale lock", e))?;
                try_create(path).map_err(|e| lock_io(path, "cannot recreate lock", e))
            }
            Err(e) => Err(lock_io(path, "cannot create lock", e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and remove the file.
    pub fn release(self) {
        // Removal happens in Drop.
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn try_create(path: &Path) -> std::io::Result<LockFile> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;
    Ok(LockFile {
        path: path.to_path_buf(),
    })
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` names a live process the current user may signal. A PID
/// owned by another user fails the probe and the lock counts as stale,
/// matching the ownership rule for the file.
#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, treat any recorded holder as
    // alive; the operator can still pass --force.
    true
}

fn lock_io(path: &Path, msg: &str, cause: std::io::Error) -> EgdError {
    EgdError::fatal(
        Component::Lock,
        codes::LOCK_IO,
        format!("{msg} ({})", path.display()),
    )
    .with_cause(cause)
}
