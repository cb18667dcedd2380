//! Boardsync CLI
//!
//! Command-line interface for mirroring task-board streams.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use boardsync_core::Config;

mod commands;
mod logging;
mod output;

use commands::watch::{EXECUTION_PROCESSES_ENDPOINT, TASK_ATTEMPTS_ENDPOINT};
use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(about = "Boardsync - live mirror of task-board streams")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to config file (overrides BOARDSYNC_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror an execution-process stream
    Watch {
        /// Stream endpoint (absolute URL or path relative to the server URL)
        #[arg(default_value = EXECUTION_PROCESSES_ENDPOINT)]
        endpoint: String,
        /// Server URL to resolve relative endpoints against
        #[arg(long)]
        server: Option<String>,
        /// Include dropped processes in the listing
        #[arg(long)]
        show_dropped: bool,
    },
    /// Mirror a task-attempt stream
    Attempts {
        /// Stream endpoint (absolute URL or path relative to the server URL)
        #[arg(default_value = TASK_ATTEMPTS_ENDPOINT)]
        endpoint: String,
        /// Server URL to resolve relative endpoints against
        #[arg(long)]
        server: Option<String>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
    /// Show resolved configuration and stream address
    Status,
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (server_url, reconnect_base_ms, reconnect_max_ms,
        /// flush_interval_ms, log_level, log_file)
        key: String,
        /// Configuration value ("none" clears log_file)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.clone().unwrap_or_else(Config::config_file_path);

    // Config commands work on the file directly
    if let Commands::Config { command } = &cli.command {
        return match command {
            Some(ConfigCommands::Show) | None => commands::config::show(&config_path, &output),
            Some(ConfigCommands::Set { key, value }) => {
                commands::config::set(key.clone(), value.clone(), &config_path, &output)
            }
        };
    }

    let mut config =
        Config::load_from_path(&config_path).context("Failed to load configuration")?;
    logging::init(&config);

    match cli.command {
        Commands::Watch {
            endpoint,
            server,
            show_dropped,
        } => {
            if let Some(server) = server {
                config.server_url = server;
            }
            commands::watch::processes(&config, endpoint, show_dropped, &output).await
        }
        Commands::Attempts { endpoint, server } => {
            if let Some(server) = server {
                config.server_url = server;
            }
            commands::watch::attempts(&config, endpoint, &output).await
        }
        Commands::Status => commands::status::show(&config, &config_path, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_watch_defaults() {
        let cli = Cli::try_parse_from(["boardsync", "watch"]).unwrap();
        let Commands::Watch {
            endpoint,
            server,
            show_dropped,
        } = cli.command
        else {
            panic!("expected watch");
        };
        assert_eq!(endpoint, EXECUTION_PROCESSES_ENDPOINT);
        assert!(server.is_none());
        assert!(!show_dropped);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "boardsync",
            "attempts",
            "http://board.local/api/task-attempts/stream/ws",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Attempts { .. }));
    }
}
