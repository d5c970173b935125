//! Utility functions shared by the hooks.

pub mod json_patch;

pub use self::json_patch::{diff, PatchOperation};
