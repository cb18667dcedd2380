//! Completion notifications
//!
//! Watches successive execution-process lists and fires once for every
//! coding agent observed moving from running to a terminal status.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{ExecutionProcess, ExecutionProcessStatus, ExecutionRunReason};

/// A coding agent that just stopped running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub process_id: String,
    pub task_attempt_id: Option<String>,
    pub status: ExecutionProcessStatus,
}

/// Side effect run for each completion
pub trait Notify {
    fn notify(&mut self, completion: &Completion);
}

impl<F> Notify for F
where
    F: FnMut(&Completion),
{
    fn notify(&mut self, completion: &Completion) {
        self(completion)
    }
}

/// Diffs process statuses between updates
pub struct CompletionNotifier<N> {
    sink: N,
    previous: HashMap<String, ExecutionProcessStatus>,
}

impl<N: Notify> CompletionNotifier<N> {
    pub fn new(sink: N) -> Self {
        Self {
            sink,
            previous: HashMap::new(),
        }
    }

    /// Compare against the last update and notify; returns how many fired
    ///
    /// Processes seen for the first time never fire, whatever their status.
    pub fn observe(&mut self, processes: &[ExecutionProcess]) -> usize {
        let mut fired = 0;

        for process in processes {
            if process.run_reason != ExecutionRunReason::CodingAgent {
                continue;
            }
            let was_running = self.previous.get(&process.id) == Some(&ExecutionProcessStatus::Running);
            if was_running && process.status.is_terminal() {
                let completion = Completion {
                    process_id: process.id.clone(),
                    task_attempt_id: process.task_attempt_id.clone(),
                    status: process.status,
                };
                debug!("Coding agent {} finished: {}", process.id, process.status);
                self.sink.notify(&completion);
                fired += 1;
            }
        }

        self.previous = processes
            .iter()
            .map(|p| (p.id.clone(), p.status))
            .collect();
        fired
    }

    /// Forget all previously seen statuses
    pub fn reset(&mut self) {
        self.previous.clear();
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }
}
