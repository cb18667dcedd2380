//! Patch batching
//!
//! Coalesces bursts of incoming operations so the snapshot is rebuilt at
//! most once per scheduler tick. The batcher only tracks whether a flush
//! is scheduled; the driver task owns the actual timer.

use std::sync::Arc;

use json_patch::PatchOperation;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StreamResult;
use crate::patch::{self, paths_overlap, source_path, target_path};

/// Filters a pending batch before it is applied
///
/// Implementations may drop operations but must keep the survivors in
/// their original order.
pub trait DedupePolicy: Send + Sync {
    fn dedupe(&self, ops: Vec<PatchOperation>) -> Vec<PatchOperation>;
}

impl<F> DedupePolicy for F
where
    F: Fn(Vec<PatchOperation>) -> Vec<PatchOperation> + Send + Sync,
{
    fn dedupe(&self, ops: Vec<PatchOperation>) -> Vec<PatchOperation> {
        self(ops)
    }
}

/// Drops a `replace` that a later `replace` of the same path supersedes
///
/// Only collapses when no operation in between touches the path, one of
/// its ancestors, or one of its descendants.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollapseReplaces;

impl DedupePolicy for CollapseReplaces {
    fn dedupe(&self, ops: Vec<PatchOperation>) -> Vec<PatchOperation> {
        let superseded: Vec<bool> = (0..ops.len())
            .map(|i| is_superseded(&ops, i))
            .collect();

        ops.into_iter()
            .zip(superseded)
            .filter_map(|(op, dropped)| (!dropped).then_some(op))
            .collect()
    }
}

fn is_superseded(ops: &[PatchOperation], index: usize) -> bool {
    let PatchOperation::Replace(current) = &ops[index] else {
        return false;
    };

    for later in &ops[index + 1..] {
        if let PatchOperation::Replace(next) = later {
            if next.path == current.path {
                return true;
            }
        }
        let touches = paths_overlap(target_path(later), &current.path)
            || source_path(later).is_some_and(|from| paths_overlap(from, &current.path));
        if touches {
            return false;
        }
    }
    false
}

/// Outcome of a flush
#[derive(Debug, Clone, PartialEq)]
pub enum Flush {
    /// Nothing to apply; snapshot and observers untouched
    Empty,
    /// New snapshot with every pending operation applied
    Applied { snapshot: Value, applied: usize },
}

/// Pending-operation buffer with a single-shot flush schedule
#[derive(Default)]
pub struct PatchBatcher {
    pending: Vec<PatchOperation>,
    scheduled: bool,
    dedupe: Option<Arc<dyn DedupePolicy>>,
}

impl PatchBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a deduplication policy on every flush
    pub fn with_dedupe(mut self, policy: Arc<dyn DedupePolicy>) -> Self {
        self.dedupe = Some(policy);
        self
    }

    /// Append operations; returns true if the caller must schedule a flush
    ///
    /// Only the first enqueue after a flush asks for a schedule, so any
    /// number of enqueues between ticks produce exactly one flush.
    pub fn enqueue(&mut self, ops: Vec<PatchOperation>) -> bool {
        self.pending.extend(ops);
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Apply all pending operations to a copy of `snapshot`
    ///
    /// The buffer is cleared whether or not the batch applies; on error the
    /// batch is logged and the caller keeps its current snapshot.
    pub fn flush(&mut self, snapshot: &Value) -> StreamResult<Flush> {
        self.scheduled = false;
        let mut ops = std::mem::take(&mut self.pending);

        if let Some(policy) = &self.dedupe {
            let before = ops.len();
            ops = policy.dedupe(ops);
            if ops.len() != before {
                debug!("Deduplicated batch from {} to {} operations", before, ops.len());
            }
        }

        if ops.is_empty() {
            return Ok(Flush::Empty);
        }

        let snapshot = patch::apply(snapshot, &ops).inspect_err(|e| {
            warn!("Discarding patch batch: {}; operations: {:?}", e, describe(&ops));
        })?;
        Ok(Flush::Applied {
            snapshot,
            applied: ops.len(),
        })
    }

    /// Drop pending operations and any scheduled flush
    pub fn cancel(&mut self) {
        self.pending.clear();
        self.scheduled = false;
    }
}

/// One-line summaries of operations, e.g. `replace /a/b`
pub fn describe(ops: &[PatchOperation]) -> Vec<String> {
    ops.iter()
        .map(|op| format!("{} {}", patch::op_name(op), target_path(op)))
        .collect()
}

impl std::fmt::Debug for PatchBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatchBatcher")
            .field("pending", &self.pending.len())
            .field("scheduled", &self.scheduled)
            .field("dedupe", &self.dedupe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use serde_json::json;

    fn ops(value: Value) -> Vec<PatchOperation> {
        serde_json::from_value(value).unwrap()
    }

    fn snapshot() -> Value {
        json!({ "execution_processes": {} })
    }

    #[test]
    fn test_many_enqueues_schedule_one_flush() {
        let mut batcher = PatchBatcher::new();

        assert!(batcher.enqueue(ops(json!([
            { "op": "add", "path": "/execution_processes/p1", "value": { "id": "p1", "status": "running" } }
        ]))));
        assert!(!batcher.enqueue(ops(json!([
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "completed" }
        ]))));
        assert!(!batcher.enqueue(ops(json!([
            { "op": "add", "path": "/execution_processes/p2", "value": { "id": "p2" } }
        ]))));
        assert!(batcher.is_scheduled());
        assert_eq!(batcher.pending_len(), 3);

        let Flush::Applied { snapshot: next, applied } = batcher.flush(&snapshot()).unwrap() else {
            panic!("expected an applied flush");
        };
        assert_eq!(applied, 3);
        assert_eq!(next["execution_processes"]["p1"]["status"], "completed");
        assert_eq!(next["execution_processes"]["p2"]["id"], "p2");

        // Flushing clears the schedule; the next enqueue asks again
        assert!(!batcher.is_scheduled());
        assert!(batcher.enqueue(Vec::new()));
    }

    #[test]
    fn test_flush_matches_concatenated_apply() {
        let first = ops(json!([
            { "op": "add", "path": "/execution_processes/a", "value": { "id": "a" } }
        ]));
        let second = ops(json!([
            { "op": "move", "from": "/execution_processes/a", "path": "/execution_processes/b" }
        ]));

        let mut batcher = PatchBatcher::new();
        batcher.enqueue(first.clone());
        batcher.enqueue(second.clone());
        let Flush::Applied { snapshot: batched, .. } = batcher.flush(&snapshot()).unwrap() else {
            panic!("expected an applied flush");
        };

        let all: Vec<PatchOperation> = first.into_iter().chain(second).collect();
        assert_eq!(batched, patch::apply(&snapshot(), &all).unwrap());
    }

    #[test]
    fn test_empty_flush_leaves_snapshot() {
        let mut batcher = PatchBatcher::new();
        assert_eq!(batcher.flush(&snapshot()).unwrap(), Flush::Empty);

        // Dedupe that filters everything also yields an empty flush
        let drop_all = |_ops: Vec<PatchOperation>| -> Vec<PatchOperation> { Vec::new() };
        let mut batcher = PatchBatcher::new().with_dedupe(Arc::new(drop_all));
        batcher.enqueue(ops(json!([{ "op": "remove", "path": "/missing" }])));
        assert_eq!(batcher.flush(&snapshot()).unwrap(), Flush::Empty);
        assert_eq!(batcher.pending_len(), 0);
    }

    #[test]
    fn test_failed_flush_clears_buffer() {
        let mut batcher = PatchBatcher::new();
        batcher.enqueue(ops(json!([{ "op": "remove", "path": "/execution_processes/nope" }])));

        let err = batcher.flush(&snapshot()).unwrap_err();
        assert!(matches!(err, StreamError::Patch { .. }));
        assert_eq!(batcher.pending_len(), 0);
        assert!(!batcher.is_scheduled());
    }

    #[test]
    fn test_cancel_drops_pending() {
        let mut batcher = PatchBatcher::new();
        batcher.enqueue(ops(json!([{ "op": "add", "path": "/x", "value": 1 }])));
        batcher.cancel();

        assert!(!batcher.is_scheduled());
        assert_eq!(batcher.flush(&snapshot()).unwrap(), Flush::Empty);
    }

    #[test]
    fn test_collapse_replaces_keeps_last() {
        let batch = ops(json!([
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "running" },
            { "op": "add", "path": "/execution_processes/p2", "value": {} },
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "completed" }
        ]));

        let kept = CollapseReplaces.dedupe(batch);
        assert_eq!(
            describe(&kept),
            vec![
                "add /execution_processes/p2",
                "replace /execution_processes/p1/status"
            ]
        );
        let PatchOperation::Replace(last) = &kept[1] else {
            panic!("expected replace");
        };
        assert_eq!(last.value, json!("completed"));
    }

    #[test]
    fn test_collapse_replaces_respects_intervening_ops() {
        let batch = ops(json!([
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "running" },
            { "op": "test", "path": "/execution_processes/p1", "value": {} },
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "completed" },
            { "op": "copy", "from": "/execution_processes/p1/status", "path": "/last" },
            { "op": "replace", "path": "/execution_processes/p1/status", "value": "killed" }
        ]));

        assert_eq!(CollapseReplaces.dedupe(batch).len(), 5);
    }
}
