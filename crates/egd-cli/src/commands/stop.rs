//! `egd stop`: ask the daemon to shut down gracefully.

use std::path::Path;
use std::process::ExitCode;

use egd_core::protocol::commands;

use super::{load_config, send};

pub fn run(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match send(&config, commands::QUIT) {
        Ok(response) => {
            let uptime = response
                .data
                .as_ref()
                .and_then(|d| d["uptime_seconds"].as_u64())
                .unwrap_or(0);
            println!("daemon is shutting down (uptime {uptime}s)");
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}
