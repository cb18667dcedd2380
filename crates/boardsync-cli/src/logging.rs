//! Logging setup
//!
//! Logs go to the configured log file (without ANSI colours) or to
//! stderr, so they never mix with command output on stdout.

use std::fs::OpenOptions;
use std::sync::Mutex;

use boardsync_core::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing from the configuration
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "boardsync_core={0},boardsync_cli={0}",
            config.log_level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    let Some(log_path) = &config.log_file else {
        // Ignore error if already initialized
        let _ = builder.with_writer(std::io::stderr).try_init();
        return;
    };

    let log_file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file {:?}: {}", log_path, e);
            let _ = builder.with_writer(std::io::stderr).try_init();
            return;
        }
    };

    let _ = builder
        .with_ansi(false)
        .with_writer(Mutex::new(log_file))
        .try_init();

    info!("Logging initialized to {:?}", log_path);
}
