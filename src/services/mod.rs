//! Services behind the HTTP handlers.
//!
//! The three external collaborators (object storage, identity provider and
//! document converter) are traits with one production implementation each;
//! `DocumentService` and `SessionManager` compose them into the workflows the
//! handlers call.

pub mod converter_service;
pub mod document_service;
pub mod identity_service;
pub mod session_service;
pub mod storage_service;
pub mod supabase_storage;
pub mod view_service;
