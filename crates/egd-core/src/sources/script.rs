//! Embedded script acquisition.
//!
//! The script body is written to an owner-only file inside a fresh
//! owner-only working directory, then executed by the configured
//! interpreter with a minimal environment plus one `EGD_SOURCE_<KEY>`
//! variable per configured key. The sandbox contract: a hard 30-second
//! wall-clock kill of the whole process group, a stdout cap, an
//! address-space rlimit on Unix, and unconditional removal of the working
//! directory when the cycle completes or is cancelled.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use crate::config::SourceSpec;
use crate::error::{codes, Component, EgdError};
use crate::sources::minimal_env;

/// Hard wall-clock ceiling on a script invocation.
pub const SCRIPT_WALL_CLOCK: Duration = Duration::from_secs(30);

/// Hard stdout cap; output beyond this fails the cycle as an overflow.
pub const STDOUT_CAP: usize = 4 * 1024 * 1024;

/// Address-space ceiling for script children on Unix.
#[cfg(unix)]
const SCRIPT_MEMORY_LIMIT: u64 = 256 * 1024 * 1024;

pub async fn fetch(spec: &SourceSpec, interpreter: &str, body: &str) -> Result<Vec<u8>, EgdError> {
    // Working directory and script file live exactly as long as this
    // call: the tempdir guard removes them on every exit path, including
    // cancellation.
    let workdir = tempfile::Builder::new()
        .prefix("egd-script-")
        .tempdir()
        .map_err(|e| script_error("cannot create script working directory").with_cause(e))?;
    let script_path = workdir.path().join("source-script");
    write_owner_only(&script_path, body.as_bytes())
        .map_err(|e| script_error("cannot write script file").with_cause(e))?;

    let mut command = Command::new(interpreter);
    command
        .arg(&script_path)
        .current_dir(workdir.path())
        .env_clear()
        .envs(minimal_env())
        .envs(spec.env_vars())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        // New process group so the timeout kill reaches grandchildren,
        // and an address-space ceiling as the memory backstop.
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                let limit = libc::rlimit {
                    rlim_cur: SCRIPT_MEMORY_LIMIT,
                    rlim_max: SCRIPT_MEMORY_LIMIT,
                };
                libc::setrlimit(libc::RLIMIT_AS, &limit);
                Ok(())
            });
        }
    }

    let mut child = command.spawn().map_err(|e| {
        let category = if e.kind() == std::io::ErrorKind::NotFound {
            crate::error::ErrorCategory::Permanent
        } else {
            crate::error::ErrorCategory::Temporary
        };
        EgdError::new(
            category,
            Component::Source,
            codes::FETCH_SCRIPT,
            format!("cannot spawn interpreter '{interpreter}'"),
        )
        .with_cause(e)
    })?;

    let limit = spec.size.map(|s| s as usize);
    let deadline = Instant::now() + SCRIPT_WALL_CLOCK;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| script_error("child stdout was not captured"))?;
    let mut output = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            kill_process_group(&mut child).await;
            return Err(script_timeout());
        }
        match tokio::time::timeout(remaining, stdout.read(&mut buf)).await {
            Err(_) => {
                kill_process_group(&mut child).await;
                return Err(script_timeout());
            }
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                output.extend_from_slice(&buf[..n]);
                if let Some(limit) = limit {
                    if output.len() >= limit {
                        // Enough sample material; the rest of the run is
                        // of no use, so the group is reaped early.
                        output.truncate(limit);
                        kill_process_group(&mut child).await;
                        return Ok(output);
                    }
                }
                if output.len() > STDOUT_CAP {
                    kill_process_group(&mut child).await;
                    return Err(EgdError::temporary(
                        Component::Source,
                        codes::SCRIPT_OVERFLOW,
                        format!("script stdout exceeded the {STDOUT_CAP}-byte cap"),
                    ));
                }
            }
            Ok(Err(e)) => {
                kill_process_group(&mut child).await;
                return Err(script_error("reading script stdout failed").with_cause(e));
            }
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let status = match tokio::time::timeout(remaining, child.wait()).await {
        Err(_) => {
            kill_process_group(&mut child).await;
            return Err(script_timeout());
        }
        Ok(result) => result.map_err(|e| script_error("waiting for script failed").with_cause(e))?,
    };
    if !status.success() {
        return Err(EgdError::temporary(
            Component::Source,
            codes::FETCH_SCRIPT,
            format!("script exited with {status}"),
        ));
    }

    Ok(output)
}

fn script_error(message: &str) -> EgdError {
    EgdError::temporary(Component::Source, codes::FETCH_SCRIPT, message)
}

fn script_timeout() -> EgdError {
    EgdError::temporary(
        Component::Source,
        codes::SCRIPT_TIMEOUT,
        format!(
            "script exceeded the {}s wall clock",
            SCRIPT_WALL_CLOCK.as_secs()
        ),
    )
}

/// Kill the child's whole process group, falling back to the child alone.
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe {
            libc::killpg(pid as i32, libc::SIGKILL);
        }
    }
    let _ = child.kill().await;
}

/// Create a file readable and writable by the owner only.
fn write_owner_only(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
