//! Identity provider seam and its Supabase Auth (GoTrue) implementation.

use crate::{models::session::Session, services::storage_service::url_with_segments};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("identity provider returned a session without a user")]
    MissingUser,
}

pub type IdentityResult<T> = Result<T, IdentityError>;

/// OAuth sign-in, session refresh and sign-out.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to sign in with `provider`.
    fn authorize_url(&self, provider: &str, redirect_to: &str) -> String;

    /// Exchange a refresh token for a fresh session and its user.
    async fn refresh_session(&self, refresh_token: &str) -> IdentityResult<Session>;

    /// Revoke the session behind `access_token`.
    async fn sign_out(&self, access_token: &str) -> IdentityResult<()>;
}

#[derive(Clone, Debug)]
pub struct SupabaseAuth {
    client: Client,
    /// `<project>/auth/v1`
    auth_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: Option<UserResponse>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

/// GoTrue reports errors under several shapes depending on the endpoint.
#[derive(Debug, Default, Deserialize)]
struct AuthErrorBody {
    error_description: Option<String>,
    msg: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl AuthErrorBody {
    fn describe(self) -> String {
        self.error_description
            .or(self.msg)
            .or(self.message)
            .or(self.error)
            .unwrap_or_else(|| "no error message".into())
    }
}

impl SupabaseAuth {
    pub fn new(client: Client, project_url: &str, api_key: impl Into<String>) -> IdentityResult<Self> {
        let base = Url::parse(project_url).map_err(|err| IdentityError::Rejected {
            status: 0,
            message: format!("invalid Supabase URL `{}`: {}", project_url, err),
        })?;
        Ok(Self {
            client,
            auth_url: url_with_segments(&base, &["auth", "v1"]),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self, segment: &str) -> Url {
        url_with_segments(&self.auth_url, &[segment])
    }

    fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.api_key)
    }

    async fn rejected(response: Response) -> IdentityError {
        let status = response.status().as_u16();
        let body = response.json::<AuthErrorBody>().await.unwrap_or_default();
        IdentityError::Rejected {
            status,
            message: body.describe(),
        }
    }

    /// `GET /user` for the owner of `access_token`.
    async fn current_user(&self, access_token: &str) -> IdentityResult<UserResponse> {
        let response = self
            .with_key(self.client.get(self.endpoint("user")))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for SupabaseAuth {
    fn authorize_url(&self, provider: &str, redirect_to: &str) -> String {
        let mut url = self.endpoint("authorize");
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to);
        url.to_string()
    }

    async fn refresh_session(&self, refresh_token: &str) -> IdentityResult<Session> {
        let mut url = self.endpoint("token");
        url.query_pairs_mut()
            .append_pair("grant_type", "refresh_token");
        let response = self
            .with_key(self.client.post(url))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }

        let token: TokenResponse = response.json().await?;
        let user = match token.user {
            Some(user) => user,
            None => self.current_user(&token.access_token).await?,
        };
        if user.id.is_empty() {
            return Err(IdentityError::MissingUser);
        }

        debug!(user_id = %user.id, "refreshed session");
        Ok(Session {
            user_id: user.id,
            access_token: token.access_token,
        })
    }

    async fn sign_out(&self, access_token: &str) -> IdentityResult<()> {
        let response = self
            .with_key(self.client.post(self.endpoint("logout")))
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::rejected(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_provider_and_redirect() {
        let auth = SupabaseAuth::new(Client::new(), "https://project.supabase.co", "key").unwrap();
        assert_eq!(
            auth.authorize_url("github", "http://localhost:8080/"),
            "https://project.supabase.co/auth/v1/authorize?provider=github&redirect_to=http%3A%2F%2Flocalhost%3A8080%2F"
        );
    }

    #[test]
    fn error_description_wins_over_the_short_code() {
        let body: AuthErrorBody = serde_json::from_value(json!({
            "error": "invalid_grant",
            "error_description": "Invalid Refresh Token: Already Used"
        }))
        .unwrap();
        assert_eq!(body.describe(), "Invalid Refresh Token: Already Used");
    }
}
