//! Core data models shared by handlers and services.
//!
//! Nothing here is persisted by the application itself: files live in the
//! object storage backend and identities belong to the identity provider.

pub mod session;
pub mod stored_file;
