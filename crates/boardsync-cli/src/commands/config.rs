//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use boardsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: &Path, output: &Output) -> Result<()> {
    let config =
        Config::load_from_path(&config_path.to_path_buf()).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": config.server_url,
                    "reconnect_base_ms": config.reconnect_base_ms,
                    "reconnect_max_ms": config.reconnect_max_ms,
                    "flush_interval_ms": config.flush_interval_ms,
                    "log_level": config.log_level,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.server_url);
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  server_url:        {}", config.server_url);
            println!("  reconnect_base_ms: {}", config.reconnect_base_ms);
            println!("  reconnect_max_ms:  {}", config.reconnect_max_ms);
            println!("  flush_interval_ms: {}", config.flush_interval_ms);
            println!("  log_level:         {}", config.log_level);
            println!(
                "  log_file:          {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(stderr)".to_string())
            );
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: &Path, output: &Output) -> Result<()> {
    let config_path = config_path.to_path_buf();
    let mut config =
        Config::load_from_path(&config_path).context("Failed to load configuration")?;

    let value = if value == "none" { String::new() } else { value };
    config.set(&key, &value)?;

    config
        .save_to_path(&config_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_writes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set(
            "flush_interval_ms".to_string(),
            "50".to_string(),
            &path,
            &output,
        )
        .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("flush_interval_ms = 50"));
    }

    #[test]
    fn test_set_none_clears_log_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        set("log_file".to_string(), "/tmp/x.log".to_string(), &path, &output).unwrap();
        set("log_file".to_string(), "none".to_string(), &path, &output).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("log_file"));
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        assert!(set("sync_url".to_string(), "x".to_string(), &path, &output).is_err());
        assert!(!path.exists());
    }
}
