//! Command-line surface for EGD: start the daemon in the foreground or
//! talk to a running one over the loopback control port. The control port
//! is discovered from the same configuration file the daemon reads.

mod client;
mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "egd")]
#[command(about = "EGD entropy gathering daemon")]
#[command(version = egd_core::VERSION)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value_os_t = default_config_path())]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Start {
        /// Take over a lock file even if its holder looks alive
        #[arg(long)]
        force: bool,
    },

    /// Ask the running daemon to shut down gracefully
    Stop,

    /// Show pool statistics of the running daemon
    Status,

    /// Force an immediate pool persist
    Persist,

    /// List configured sources and their runtime state
    Sources,

    /// Inspect the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Check the configuration file and report the first error
    Validate,
    /// Print the resolved configuration as JSON
    Show,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("egd").join("egd.toml"))
        .unwrap_or_else(|| PathBuf::from("egd.toml"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Start { force } => commands::start::run(&cli.config, force),
        Commands::Stop => commands::stop::run(&cli.config),
        Commands::Status => commands::status::run(&cli.config),
        Commands::Persist => commands::persist::run(&cli.config),
        Commands::Sources => commands::sources::run(&cli.config),
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config::validate(&cli.config),
            ConfigAction::Show => commands::config::show(&cli.config),
        },
    }
}
