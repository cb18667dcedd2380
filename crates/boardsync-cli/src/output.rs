//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag), one object per line while watching
//! - Quiet mode for scripting (--quiet flag)

use boardsync_core::{Completion, ConnectionHealth, ExecutionProcess, TaskAttempt};
use chrono::{DateTime, Utc};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the current list of execution processes
    pub fn print_processes(&self, processes: &[ExecutionProcess]) {
        match self.format {
            OutputFormat::Human => {
                println!("── Execution processes ({}) ──", processes.len());
                if processes.is_empty() {
                    println!("No execution processes.");
                    return;
                }
                for process in processes {
                    let dropped = if process.dropped { " [dropped]" } else { "" };
                    println!(
                        "{} | {:<13} | {:<9} | {}{}",
                        short_id(&process.id),
                        process.run_reason.as_str(),
                        process.status.as_str(),
                        format_time(process.created_at),
                        dropped
                    );
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({ "execution_processes": processes })
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print the current list of task attempts
    pub fn print_attempts(&self, attempts: &[TaskAttempt]) {
        match self.format {
            OutputFormat::Human => {
                println!("── Task attempts ({}) ──", attempts.len());
                if attempts.is_empty() {
                    println!("No task attempts.");
                    return;
                }
                for attempt in attempts {
                    println!(
                        "{} | {} | {} | {}",
                        short_id(&attempt.id),
                        truncate(attempt.branch.as_deref().unwrap_or("-"), 30),
                        attempt.executor.as_deref().unwrap_or("-"),
                        format_time(attempt.created_at)
                    );
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "task_attempts": attempts }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a connection health change
    pub fn print_health(&self, health: &ConnectionHealth) {
        match self.format {
            OutputFormat::Human => println!("● {}", health),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "health": health.to_string() }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print whether the attempt has work in progress
    pub fn print_running(&self, running: bool) {
        match self.format {
            OutputFormat::Human => {
                if running {
                    println!("▶ Attempt running");
                } else {
                    println!("■ Attempt idle");
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "attempt_running": running }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a coding agent completion
    ///
    /// Shown even in quiet mode, as the process id only.
    pub fn print_completion(&self, completion: &Completion) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "✓ Coding agent {} {}",
                    short_id(&completion.process_id),
                    completion.status
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({
                        "completion": {
                            "process_id": completion.process_id,
                            "task_attempt_id": completion.task_attempt_id,
                            "status": completion.status
                        }
                    })
                );
            }
            OutputFormat::Quiet => println!("{}", completion.process_id),
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a warning to stderr
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("⚠ {}", message),
            OutputFormat::Json => {
                eprintln!("{}", serde_json::json!({ "warning": message }));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
