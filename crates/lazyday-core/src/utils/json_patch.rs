//! JSON Patch (RFC 6902) helpers.
//!
//! Diffing comes from the `json-patch` crate; the constructors here cover
//! the single-field patches sent for appointments.

use json_patch::{RemoveOperation, ReplaceOperation};
use serde_json::Value;

pub use json_patch::PatchOperation;

/// Operations that turn `old` into `new`.
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOperation> {
    json_patch::diff(old, new).0
}

pub fn replace(path: &str, value: Value) -> PatchOperation {
    PatchOperation::Replace(ReplaceOperation {
        path: path.to_string(),
        value,
    })
}

pub fn remove(path: &str) -> PatchOperation {
    PatchOperation::Remove(RemoveOperation {
        path: path.to_string(),
    })
}
