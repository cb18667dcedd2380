//! Patch application
//!
//! Applies an ordered list of JSON-Patch operations to a snapshot. The
//! input snapshot is never touched: operations run against a deep copy,
//! and the copy is only returned if every operation resolved.

use json_patch::PatchOperation;
use serde_json::Value;

use crate::error::{StreamError, StreamResult};

/// Apply `ops` in order to a copy of `snapshot`
///
/// Fails the whole batch on the first operation that does not resolve.
pub fn apply(snapshot: &Value, ops: &[PatchOperation]) -> StreamResult<Value> {
    let mut next = snapshot.clone();
    json_patch::patch(&mut next, ops).map_err(|source| StreamError::Patch {
        batch_len: ops.len(),
        source,
    })?;
    Ok(next)
}

/// Path the operation writes to (or tests)
pub fn target_path(op: &PatchOperation) -> &str {
    match op {
        PatchOperation::Add(op) => &op.path,
        PatchOperation::Remove(op) => &op.path,
        PatchOperation::Replace(op) => &op.path,
        PatchOperation::Move(op) => &op.path,
        PatchOperation::Copy(op) => &op.path,
        PatchOperation::Test(op) => &op.path,
    }
}

/// Source path of a move or copy
pub fn source_path(op: &PatchOperation) -> Option<&str> {
    match op {
        PatchOperation::Move(op) => Some(&op.from),
        PatchOperation::Copy(op) => Some(&op.from),
        _ => None,
    }
}

/// Short name of the operation kind, as it appears on the wire
pub fn op_name(op: &PatchOperation) -> &'static str {
    match op {
        PatchOperation::Add(_) => "add",
        PatchOperation::Remove(_) => "remove",
        PatchOperation::Replace(_) => "replace",
        PatchOperation::Move(_) => "move",
        PatchOperation::Copy(_) => "copy",
        PatchOperation::Test(_) => "test",
    }
}

/// Whether two JSON pointers address overlapping parts of a document
///
/// True when the paths are equal or one is an ancestor of the other.
pub fn paths_overlap(a: &str, b: &str) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

fn is_prefix(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() {
        return true;
    }
    match path.strip_prefix(ancestor) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
