//! External command acquisition.
//!
//! Runs the configured argv with a minimal environment and captures
//! stdout. A missing binary is a permanent failure; a non-zero exit or an
//! overrun of the cycle ceiling is temporary. The child is killed if the
//! ceiling expires or the cycle is cancelled.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{codes, Component, EgdError};
use crate::sources::minimal_env;

/// Wall-clock ceiling on a command invocation, matching the fetch ceiling.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn fetch(argv: &[String], size: Option<u64>) -> Result<Vec<u8>, EgdError> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| EgdError::permanent(Component::Source, codes::FETCH_COMMAND, "empty argv"))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .env_clear()
        .envs(minimal_env())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = tokio::time::timeout(COMMAND_TIMEOUT, command.output())
        .await
        .map_err(|_| {
            EgdError::temporary(
                Component::Source,
                codes::FETCH_TIMEOUT,
                format!("command '{program}' exceeded the {}s ceiling", COMMAND_TIMEOUT.as_secs()),
            )
        })?
        .map_err(|e| {
            let category = if e.kind() == std::io::ErrorKind::NotFound {
                crate::error::ErrorCategory::Permanent
            } else {
                crate::error::ErrorCategory::Temporary
            };
            EgdError::new(
                category,
                Component::Source,
                codes::FETCH_COMMAND,
                format!("cannot run command '{program}'"),
            )
            .with_cause(e)
        })?;

    if !output.status.success() {
        return Err(EgdError::temporary(
            Component::Source,
            codes::FETCH_COMMAND,
            format!("command '{program}' exited with {}", output.status),
        ));
    }

    let mut stdout = output.stdout;
    if let Some(limit) = size {
        stdout.truncate(limit as usize);
    }
    Ok(stdout)
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let out = fetch(&argv(&["/bin/sh", "-c", "printf abc"]), None).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_truncates_to_size() {
        let out = fetch(&argv(&["/bin/sh", "-c", "printf 0123456789"]), Some(4))
            .await
            .unwrap();
        assert_eq!(out, b"0123");
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails_cycle() {
        let err = fetch(&argv(&["/bin/sh", "-c", "exit 3"]), None).await.unwrap_err();
        assert_eq!(err.code, codes::FETCH_COMMAND);
        assert_eq!(err.category, crate::error::ErrorCategory::Temporary);
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent() {
        let err = fetch(&argv(&["/nonexistent/egd-test-binary"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.category, crate::error::ErrorCategory::Permanent);
    }

    #[tokio::test]
    async fn test_child_environment_is_minimal() {
        // A variable set in the daemon's environment must not leak.
        std::env::set_var("EGD_COMMAND_LEAK_PROBE", "leaked");
        let out = fetch(
            &argv(&["/bin/sh", "-c", "printf %s \"${EGD_COMMAND_LEAK_PROBE:-clean}\""]),
            None,
        )
        .await
        .unwrap();
        std::env::remove_var("EGD_COMMAND_LEAK_PROBE");
        assert_eq!(out, b"clean");
    }
}
