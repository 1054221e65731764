//! `egd persist`: force an immediate pool persist.

use std::path::Path;
use std::process::ExitCode;

use egd_core::protocol::commands;

use super::{load_config, send};

pub fn run(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match send(&config, commands::PERSIST) {
        Ok(response) => {
            let data = response.data.unwrap_or_default();
            println!(
                "persisted {} bytes to {} at {}",
                data["bytes_written"].as_u64().unwrap_or(0),
                data["file_path"].as_str().unwrap_or("?"),
                data["persist_time"].as_str().unwrap_or("?"),
            );
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}
