//! REST client for the appointment server.
//!
//! This module provides the `ApiClient` for reading and patching users and
//! appointments. Authenticated requests carry the JWT issued at sign-in as a
//! bearer token. Requests are cancelled by dropping (or aborting) their
//! future, which closes the underlying connection.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, ErrorKind};
