//! Page handlers: the editor, static pages and sign-in/out.

use crate::{
    errors::AppError,
    models::stored_file::StoredFile,
    services::view_service::{ABOUT_VIEW, CONTACT_VIEW, EDITOR_VIEW, PREVIEW_VIEW},
    state::AppState,
};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Query accepted by the editor; the identity provider redirects back with
/// a refresh token.
#[derive(Debug, Deserialize)]
pub struct EditorQuery {
    pub refresh_token: Option<String>,
}

#[derive(Serialize)]
struct EditorPage {
    year: i32,
    #[serde(rename = "userExist")]
    user_exist: bool,
    files: Vec<StoredFile>,
    user_id: String,
}

#[derive(Serialize)]
struct ContactPage {
    title: &'static str,
    year: i32,
}

#[derive(Serialize)]
struct AboutPage {
    title: &'static str,
    message: &'static str,
    year: i32,
    functions: &'static str,
    func1: &'static str,
    func2: &'static str,
    func3: &'static str,
    func4: &'static str,
}

#[derive(Serialize)]
pub(crate) struct PreviewPage {
    #[serde(rename = "previewContent")]
    pub preview_content: String,
}

fn current_year() -> i32 {
    Utc::now().year()
}

/// Attach `Set-Cookie` headers to a response.
pub(crate) fn with_cookies(mut response: Response, cookies: Vec<HeaderValue>) -> Response {
    for cookie in cookies {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// `GET /` and `GET /editor`
///
/// Signed-in users get their bucket (created and seeded on first visit)
/// listed; everyone else gets the anonymous page.
pub async fn editor(
    State(state): State<AppState>,
    Query(query): Query<EditorQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let Some(identity) = state
        .sessions
        .resolve(query.refresh_token.as_deref(), &headers)
        .await
    else {
        let html = state.views.render(
            EDITOR_VIEW,
            EditorPage {
                year: current_year(),
                user_exist: false,
                files: Vec::new(),
                user_id: String::new(),
            },
        )?;
        return Ok(Html(html).into_response());
    };

    let files = state.documents.ensure_bucket(&identity.user_id).await?;
    debug!(user_id = %identity.user_id, "editor with {} files", files.len());
    let html = state.views.render(
        EDITOR_VIEW,
        EditorPage {
            year: current_year(),
            user_exist: true,
            files,
            user_id: identity.user_id.clone(),
        },
    )?;

    Ok(with_cookies(
        Html(html).into_response(),
        state.sessions.store(&identity),
    ))
}

/// `GET /contact`
pub async fn contact(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let html = state.views.render(
        CONTACT_VIEW,
        ContactPage {
            title: "Contact",
            year: current_year(),
        },
    )?;
    Ok(Html(html))
}

/// `GET /about`
pub async fn about(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let html = state.views.render(
        ABOUT_VIEW,
        AboutPage {
            title: "About us",
            message: "Here you can see the possibilities of our site",
            year: current_year(),
            functions: "At this site you could:",
            func1: "share reports",
            func2: "watch reports",
            func3: "download reports",
            func4: "change report format",
        },
    )?;
    Ok(Html(html))
}

/// `GET /preview`: placeholder until a file is picked.
pub async fn preview_placeholder(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let html = state.views.render(
        PREVIEW_VIEW,
        PreviewPage {
            preview_content: "<p>Site preview here</p>".into(),
        },
    )?;
    Ok(Html(html))
}

/// `GET /login`: hand the browser to the identity provider.
pub async fn login(State(state): State<AppState>) -> Redirect {
    let redirect_to = format!("{}/", state.config.public_base_url);
    let url = state
        .sessions
        .identity_provider()
        .authorize_url(&state.config.oauth_provider, &redirect_to);
    Redirect::to(&url)
}

/// `GET /logout`: sign out upstream, drop the cookies, back to the editor.
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cookies = state.sessions.clear(&headers).await;
    with_cookies(Redirect::to("/").into_response(), cookies)
}
