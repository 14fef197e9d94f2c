//! Defines the routes of the document editor.
//!
//! ## Structure
//! - **Pages**
//!   - `GET  /`, `/editor`: editor with the caller's files
//!   - `GET  /contact`, `/about`: static pages
//!   - `GET  /login`, `/logout`: hand-off to the identity provider, sign-out
//!
//! - **Documents**
//!   - `POST /upload`: multipart upload, converted to Org
//!   - `GET  /preview`: placeholder preview
//!   - `GET  /preview/{filename}`: preview of the caller's file
//!   - `GET  /s/{user_id}/{filename}`: shared preview
//!   - `POST /preview_reload`: save edited text
//!   - `GET  /content/{filename}`: raw text
//!   - `GET  /public/{bucket}/{filename}`: local storage backend only

use crate::{
    config::{AppConfig, StorageBackend},
    handlers::{
        document_handlers::{
            content, preview_file, preview_reload, public_file, shared_preview, upload,
        },
        health_handlers::{healthz, readyz},
        page_handlers::{about, contact, editor, login, logout, preview_placeholder},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build and return the router for all pages and document routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes(config: &AppConfig) -> Router<AppState> {
    let router = Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Pages
        .route("/", get(editor))
        .route("/editor", get(editor))
        .route("/contact", get(contact))
        .route("/about", get(about))
        .route("/login", get(login))
        .route("/logout", get(logout))
        // Documents
        .route(
            "/upload",
            post(upload).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/preview", get(preview_placeholder))
        .route("/preview/{filename}", get(preview_file))
        .route("/s/{user_id}/{filename}", get(shared_preview))
        .route("/preview_reload", post(preview_reload))
        .route("/content/{filename}", get(content));

    match config.storage_backend {
        StorageBackend::Local => router.route("/public/{bucket}/{filename}", get(public_file)),
        StorageBackend::Supabase => router,
    }
}
