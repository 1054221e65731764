//! `egd sources`: per-source runtime state from a running daemon.

use std::path::Path;
use std::process::ExitCode;

use egd_core::protocol::commands;

use super::{load_config, send};

pub fn run(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    let response = match send(&config, commands::SOURCES) {
        Ok(response) => response,
        Err(code) => return code,
    };

    let data = response.data.unwrap_or_default();
    let sources = data["sources"].as_array().cloned().unwrap_or_default();

    println!(
        "{:<20} {:>8} {:>6} {:>6} {:>5} {:>5} {:>12}  {}",
        "Source", "Method", "OK", "Fail", "Seq", "Off", "Deposited", "Last success"
    );
    println!("{}", "-".repeat(80));
    for source in &sources {
        println!(
            "{:<20} {:>8} {:>6} {:>6} {:>5} {:>5} {:>12}  {}",
            source["name"].as_str().unwrap_or("?"),
            source["method"].as_str().unwrap_or("?"),
            source["cycles_ok"].as_u64().unwrap_or(0),
            source["cycles_failed"].as_u64().unwrap_or(0),
            source["consecutive_failures"].as_u64().unwrap_or(0),
            if source["disabled"].as_bool().unwrap_or(false) { "yes" } else { "no" },
            source["bytes_deposited"].as_u64().unwrap_or(0),
            source["last_success"].as_str().unwrap_or("never"),
        );
    }
    println!("{} source(s)", sources.len());
    ExitCode::SUCCESS
}
