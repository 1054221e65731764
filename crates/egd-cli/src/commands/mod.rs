//! One module per CLI subcommand.
//!
//! Exit codes: 0 success, 1 generic failure, 2 invalid configuration or
//! misuse, 3 daemon unreachable.

pub mod config;
pub mod persist;
pub mod sources;
pub mod start;
pub mod status;
pub mod stop;

use std::path::Path;
use std::process::ExitCode;

use egd_core::config::Config;
use egd_core::error::{codes, EgdError};
use egd_core::protocol::{Request, Response};

use crate::client;

pub(crate) const EXIT_FAILURE: u8 = 1;
pub(crate) const EXIT_MISUSE: u8 = 2;
pub(crate) const EXIT_UNREACHABLE: u8 = 3;

/// Load and validate the configuration file, printing errors to stderr.
pub(crate) fn load_config(path: &Path) -> Result<Config, ExitCode> {
    Config::from_path(path).map_err(|err| {
        print_error(&err);
        ExitCode::from(EXIT_MISUSE)
    })
}

/// Send one command to the daemon whose port the configuration names.
/// Non-OK statuses and transport failures are printed verbatim; transport
/// failures exit 3, everything else 1.
pub(crate) fn send(config: &Config, command: &str) -> Result<Response, ExitCode> {
    match client::exchange(config.tcp_port, &Request::new(command)) {
        Ok(response) if response.is_ok() => Ok(response),
        Ok(response) => {
            eprintln!("daemon replied {} {}", response.status_code, response.status_text);
            Err(ExitCode::from(EXIT_FAILURE))
        }
        Err(err) => {
            print_error(&err);
            let code = match err.code {
                codes::CLIENT_UNREACHABLE | codes::CLIENT_TIMEOUT => EXIT_UNREACHABLE,
                _ => EXIT_FAILURE,
            };
            Err(ExitCode::from(code))
        }
    }
}

/// Print an error and its cause chain to stderr.
pub(crate) fn print_error(err: &EgdError) {
    eprintln!("error: {err}");
    let mut cause = std::error::Error::source(err);
    while let Some(inner) = cause {
        eprintln!("  caused by: {inner}");
        cause = inner.source();
    }
}
