//! `egd start`: run the daemon in the foreground.

use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use egd_core::error::codes;

use super::{load_config, print_error, EXIT_FAILURE, EXIT_MISUSE};

pub fn run(config_path: &Path, force: bool) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: cannot start async runtime: {err}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(egd_daemon::run(config, force)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err);
            let code = match err.code {
                codes::CONFIG_INVALID | codes::CONFIG_IO => EXIT_MISUSE,
                _ => EXIT_FAILURE,
            };
            ExitCode::from(code)
        }
    }
}
