//! HTTP handlers for uploading, previewing, reading and saving documents.
//! Workflow logic lives in `DocumentService`; these handlers resolve the
//! caller and shape responses.

use crate::{
    errors::AppError,
    handlers::page_handlers::PreviewPage,
    services::{storage_service::content_type_for, view_service::PREVIEW_VIEW},
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// Body of `POST /preview_reload`.
#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub filename: String,
    pub data: String,
}

fn require_user(state: &AppState, headers: &HeaderMap) -> Result<String, AppError> {
    state
        .sessions
        .current_user(headers)
        .ok_or_else(AppError::unauthorized)
}

/// `POST /upload`: multipart field `file`, converted and stored as Org.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<&'static str, AppError> {
    let user_id = require_user(&state, &headers)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or_else(|| AppError::bad_request("uploaded file has no name"))?;
        let data = field
            .bytes()
            .await
            .map_err(|err| AppError::new(err.status(), err.body_text()))?;

        let outcome = state.documents.upload(&user_id, &filename, &data).await?;
        info!(user_id = %user_id, "uploaded {} as {}", filename, outcome.stored_name);
        return Ok("ok");
    }

    Err(AppError::bad_request("missing multipart field `file`"))
}

async fn render_preview(state: &AppState, user_id: &str, filename: &str) -> Result<Html<String>, AppError> {
    let preview_content = state.documents.preview(user_id, filename).await?;
    let html = state
        .views
        .render(PREVIEW_VIEW, PreviewPage { preview_content })?;
    Ok(Html(html))
}

/// `GET /preview/{filename}`: preview one of the caller's files.
pub async fn preview_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    let user_id = require_user(&state, &headers)?;
    render_preview(&state, &user_id, &filename).await
}

/// `GET /s/{user_id}/{filename}`: shared preview link.
///
/// Open to anyone when public sharing is enabled; otherwise only the owner
/// may use it.
pub async fn shared_preview(
    State(state): State<AppState>,
    Path((owner, filename)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Html<String>, AppError> {
    if !state.config.public_sharing {
        let caller = state.sessions.current_user(&headers);
        if caller.as_deref() != Some(owner.as_str()) {
            debug!("refused shared preview of {}/{}", owner, filename);
            return Err(AppError::new(
                StatusCode::FORBIDDEN,
                "shared previews are disabled",
            ));
        }
    }
    render_preview(&state, &owner, &filename).await
}

/// `POST /preview_reload`: replace a stored file with edited text.
pub async fn preview_reload(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SaveRequest>,
) -> Result<&'static str, AppError> {
    let user_id = require_user(&state, &headers)?;
    state
        .documents
        .save(&user_id, &request.filename, &request.data)
        .await?;
    Ok("ok")
}

/// `GET /content/{filename}`: raw text of a stored file.
///
/// Anonymous callers get an empty body and nothing is fetched.
pub async fn content(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(user_id) = state.sessions.current_user(&headers) else {
        return Ok(StatusCode::OK.into_response());
    };
    let text = state.documents.content(&user_id, &filename).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

/// `GET /public/{bucket}/{filename}`: stream a file of the local backend.
pub async fn public_file(
    State(state): State<AppState>,
    Path((bucket, filename)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let local = state
        .local_storage
        .as_ref()
        .ok_or_else(|| AppError::not_found("public files are served by the storage backend"))?;
    let file = local.open(&bucket, &filename).await?;
    let length = file.metadata().await.ok().map(|meta| meta.len());
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&filename)),
    );
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}
