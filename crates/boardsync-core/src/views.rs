//! Derived views over mirrored snapshots
//!
//! Streams publish their collections as a JSON object keyed by entity
//! id under a well-known top-level key:
//!
//! ```text
//! { "execution_processes": { "<id>": { ... }, ... } }
//! ```
//!
//! The views here decode those maps into typed, ordered lists.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{ExecutionProcess, TaskAttempt};

/// Top-level key of the execution-process stream
pub const EXECUTION_PROCESSES_KEY: &str = "execution_processes";

/// Top-level key of the task-attempt stream
pub const TASK_ATTEMPTS_KEY: &str = "task_attempts";

/// Empty starting snapshot for an execution-process stream
pub fn execution_processes_seed() -> Value {
    empty_collection(EXECUTION_PROCESSES_KEY)
}

/// Empty starting snapshot for a task-attempt stream
pub fn task_attempts_seed() -> Value {
    empty_collection(TASK_ATTEMPTS_KEY)
}

fn empty_collection(key: &str) -> Value {
    let mut root = Map::new();
    root.insert(key.to_string(), Value::Object(Map::new()));
    Value::Object(root)
}

/// Decode every entry of the map under `key`
///
/// Entries that don't match `T` are skipped with a warning.
pub fn collection<T: DeserializeOwned>(snapshot: &Value, key: &str) -> Vec<T> {
    let Some(entries) = snapshot.get(key).and_then(Value::as_object) else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|(id, entry)| match T::deserialize(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping malformed {} entry '{}': {}", key, id, e);
                None
            }
        })
        .collect()
}

/// Execution processes of one snapshot, oldest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionProcessView {
    all: Vec<ExecutionProcess>,
}

impl ExecutionProcessView {
    pub fn from_snapshot(snapshot: &Value) -> Self {
        let mut all: Vec<ExecutionProcess> = collection(snapshot, EXECUTION_PROCESSES_KEY);
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self { all }
    }

    /// Every process, including dropped ones
    pub fn all(&self) -> &[ExecutionProcess] {
        &self.all
    }

    /// Processes that haven't been dropped
    pub fn visible(&self) -> Vec<ExecutionProcess> {
        self.all.iter().filter(|p| !p.dropped).cloned().collect()
    }

    /// Lookup map over all processes
    pub fn by_id(&self) -> HashMap<&str, &ExecutionProcess> {
        self.all.iter().map(|p| (p.id.as_str(), p)).collect()
    }

    /// Whether a visible coding agent, setup or cleanup script is running
    pub fn is_attempt_running(&self) -> bool {
        self.all.iter().any(|p| !p.dropped && p.is_active())
    }
}

/// Task attempts of one snapshot, oldest first
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskAttemptView {
    attempts: Vec<TaskAttempt>,
}

impl TaskAttemptView {
    pub fn from_snapshot(snapshot: &Value) -> Self {
        let mut attempts: Vec<TaskAttempt> = collection(snapshot, TASK_ATTEMPTS_KEY);
        attempts.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Self { attempts }
    }

    pub fn all(&self) -> &[TaskAttempt] {
        &self.attempts
    }

    pub fn get(&self, id: &str) -> Option<&TaskAttempt> {
        self.attempts.iter().find(|a| a.id == id)
    }

    /// Most recently created attempt
    pub fn latest(&self) -> Option<&TaskAttempt> {
        self.attempts.last()
    }
}
