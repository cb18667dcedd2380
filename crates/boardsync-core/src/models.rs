//! Data models for mirrored board state
//!
//! Only the parts of the task-board domain the sync layer needs: an
//! execution process with its status, run reason and soft-delete flag,
//! and the task attempt that owns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an execution process
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProcessStatus {
    Running,
    Completed,
    Failed,
    Killed,
    /// Any status this client doesn't know about
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExecutionProcessStatus {
    /// Completed, failed and killed processes will not change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionProcessStatus::Completed
                | ExecutionProcessStatus::Failed
                | ExecutionProcessStatus::Killed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionProcessStatus::Running => "running",
            ExecutionProcessStatus::Completed => "completed",
            ExecutionProcessStatus::Failed => "failed",
            ExecutionProcessStatus::Killed => "killed",
            ExecutionProcessStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExecutionProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an execution process was started
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionRunReason {
    SetupScript,
    CleanupScript,
    CodingAgent,
    DevServer,
    #[default]
    #[serde(other)]
    Unknown,
}

impl ExecutionRunReason {
    /// Whether a running process of this kind means the attempt is busy
    ///
    /// Dev servers run indefinitely alongside an attempt and don't count.
    pub fn counts_as_attempt_activity(&self) -> bool {
        matches!(
            self,
            ExecutionRunReason::CodingAgent
                | ExecutionRunReason::SetupScript
                | ExecutionRunReason::CleanupScript
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionRunReason::SetupScript => "setupscript",
            ExecutionRunReason::CleanupScript => "cleanupscript",
            ExecutionRunReason::CodingAgent => "codingagent",
            ExecutionRunReason::DevServer => "devserver",
            ExecutionRunReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExecutionRunReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single process run on behalf of a task attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionProcess {
    pub id: String,
    #[serde(default)]
    pub task_attempt_id: Option<String>,
    #[serde(default)]
    pub run_reason: ExecutionRunReason,
    #[serde(default)]
    pub status: ExecutionProcessStatus,
    #[serde(default)]
    pub exit_code: Option<i64>,
    /// Soft-deleted: kept in the mirror, hidden from visible views
    #[serde(default)]
    pub dropped: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionProcess {
    /// Create a process with the given id, reason and status
    pub fn new(
        id: impl Into<String>,
        run_reason: ExecutionRunReason,
        status: ExecutionProcessStatus,
    ) -> Self {
        Self {
            id: id.into(),
            task_attempt_id: None,
            run_reason,
            status,
            exit_code: None,
            dropped: false,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Running process that keeps its attempt busy
    pub fn is_active(&self) -> bool {
        self.status == ExecutionProcessStatus::Running && self.run_reason.counts_as_attempt_activity()
    }
}

/// One attempt at completing a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskAttempt {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub executor: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_terminal() {
        assert!(!ExecutionProcessStatus::Running.is_terminal());
        assert!(ExecutionProcessStatus::Completed.is_terminal());
        assert!(ExecutionProcessStatus::Failed.is_terminal());
        assert!(ExecutionProcessStatus::Killed.is_terminal());
        assert!(!ExecutionProcessStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_run_reason_activity() {
        assert!(ExecutionRunReason::CodingAgent.counts_as_attempt_activity());
        assert!(ExecutionRunReason::SetupScript.counts_as_attempt_activity());
        assert!(ExecutionRunReason::CleanupScript.counts_as_attempt_activity());
        assert!(!ExecutionRunReason::DevServer.counts_as_attempt_activity());
    }

    #[test]
    fn test_process_wire_format() {
        let process: ExecutionProcess = serde_json::from_value(json!({
            "id": "p1",
            "task_attempt_id": "a1",
            "run_reason": "codingagent",
            "status": "running",
            "exit_code": null,
            "dropped": false,
            "created_at": "2025-01-02T03:04:05Z"
        }))
        .unwrap();

        assert_eq!(process.id, "p1");
        assert_eq!(process.run_reason, ExecutionRunReason::CodingAgent);
        assert_eq!(process.status, ExecutionProcessStatus::Running);
        assert!(process.is_active());
        assert!(process.created_at.is_some());
    }

    #[test]
    fn test_process_missing_fields_default() {
        let process: ExecutionProcess =
            serde_json::from_value(json!({ "id": "a", "dropped": true })).unwrap();

        assert_eq!(process.status, ExecutionProcessStatus::Unknown);
        assert_eq!(process.run_reason, ExecutionRunReason::Unknown);
        assert!(process.dropped);
    }

    #[test]
    fn test_unknown_status_value() {
        let process: ExecutionProcess =
            serde_json::from_value(json!({ "id": "p", "status": "paused" })).unwrap();
        assert_eq!(process.status, ExecutionProcessStatus::Unknown);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionProcessStatus::Killed.to_string(), "killed");
        assert_eq!(ExecutionRunReason::DevServer.to_string(), "devserver");
    }
}
