//! Status command handler

use std::path::Path;

use anyhow::Result;

use boardsync_core::stream::endpoint;
use boardsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show resolved configuration and the stream address it leads to
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    let address = endpoint::stream_address(&config.server_url);
    let stream = config.stream_config();

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "stream_address": address.as_ref().ok(),
                    "address_error": address.as_ref().err().map(|e| e.to_string()),
                    "reconnect": {
                        "base_ms": stream.reconnect_base.as_millis() as u64,
                        "max_ms": stream.reconnect_max.as_millis() as u64
                    },
                    "flush_interval_ms": stream.flush_interval.as_millis() as u64,
                    "config_file": config_path
                })
            );
        }
        OutputFormat::Quiet => match &address {
            Ok(address) => println!("{}", address),
            Err(e) => println!("{}", e),
        },
        OutputFormat::Human => {
            println!("Boardsync Status");
            println!("================");
            println!();
            println!("Server:");
            println!("  URL:    {}", config.server_url);
            match &address {
                Ok(address) => println!("  Stream: {}", address),
                Err(e) => println!("  Stream: invalid ({})", e),
            }
            println!();
            println!("Timing:");
            println!(
                "  Reconnect: {:?} doubling up to {:?}",
                stream.reconnect_base, stream.reconnect_max
            );
            println!("  Flush:     every {:?}", stream.flush_interval);
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}
