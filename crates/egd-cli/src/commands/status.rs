//! `egd status`: pool statistics from a running daemon.

use std::path::Path;
use std::process::ExitCode;

use egd_core::protocol::commands;

use super::{load_config, send};

pub fn run(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let response = match send(&config, commands::STATUS) {
        Ok(response) => response,
        Err(code) => return code,
    };

    let data = response.data.unwrap_or_default();
    let entropy = data["entropy_bytes"].as_u64().unwrap_or(0);
    let max = data["max_entropy"].as_u64().unwrap_or(0);
    let percent = if max > 0 {
        entropy as f64 / max as f64 * 100.0
    } else {
        0.0
    };

    println!("Entropy pool : {entropy} / {max} bytes ({percent:.1}%)");
    println!("Chunks       : {}", data["chunk_count"].as_u64().unwrap_or(0));
    println!(
        "Full         : {}",
        if data["is_full"].as_bool().unwrap_or(false) { "yes" } else { "no" }
    );
    println!(
        "Last persist : {}",
        data["last_persist"].as_str().unwrap_or("never")
    );
    ExitCode::SUCCESS
}
