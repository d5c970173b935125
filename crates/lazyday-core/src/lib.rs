//! Lazy Days core - cache synchronization for the appointment calendar.
//!
//! The crate is organised around one shared [`cache::QueryCache`]:
//!
//! - `api`: REST client for the appointment server
//! - `cache`: keyed query cache with staleness, de-duplication and eviction
//! - `hooks`: per-entity sync logic (user, appointments, auth) on top of the cache
//! - `storage`: durable copy of the signed-in user
//! - `notify`: toast-style notification sinks
//! - `app`: wires the pieces together for a front end

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod context;
pub mod hooks;
pub mod models;
pub mod notify;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use config::Config;
pub use context::AppContext;
