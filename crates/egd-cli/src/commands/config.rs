//! `egd config`: validate or show the configuration file.

use std::path::Path;
use std::process::ExitCode;

use super::{load_config, EXIT_FAILURE};

pub fn validate(config_path: &Path) -> ExitCode {
    match load_config(config_path) {
        Ok(config) => {
            println!(
                "configuration OK: {} source(s), control port {}",
                config.sources.len(),
                config.tcp_port
            );
            ExitCode::SUCCESS
        }
        Err(code) => code,
    }
}

pub fn show(config_path: &Path) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(code) => return code,
    };
    match serde_json::to_string_pretty(&config) {
        Ok(rendered) => {
            println!("{rendered}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: cannot render configuration: {err}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
