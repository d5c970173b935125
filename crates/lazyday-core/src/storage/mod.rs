//! Durable storage for the signed-in user.
//!
//! The stored copy seeds the query cache on start-up so a restart does not
//! sign the user out. It is written together with the cache entry and
//! removed at sign-out.

pub mod user_storage;

pub use user_storage::{FileUserStorage, MemoryUserStorage, UserStorage};
