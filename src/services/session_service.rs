//! Signed session cookies and identity resolution.
//!
//! Cookie values are `base64url(value) "." base64url(hmac)`, where the HMAC
//! covers `name=value` under the process secret. Binding the name keeps a
//! valid `access_token` cookie from being replayed as `user_id`.

use crate::{
    models::session::{ACCESS_TOKEN_COOKIE, USER_ID_COOKIE},
    services::identity_service::IdentityProvider,
};
use axum::http::{HeaderMap, HeaderValue, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac, digest::InvalidLength};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies cookie values with a shared secret.
#[derive(Clone)]
pub struct CookieSigner {
    mac: HmacSha256,
}

impl CookieSigner {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        Ok(Self {
            mac: HmacSha256::new_from_slice(secret.as_bytes())?,
        })
    }

    fn tag(&self, name: &str, value: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"=");
        mac.update(value.as_bytes());
        mac
    }

    /// Signed representation of `value` for cookie `name`.
    pub fn sign(&self, name: &str, value: &str) -> String {
        let signature = self.tag(name, value).finalize().into_bytes();
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(value),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    /// The original value if `signed` carries a valid signature for `name`.
    pub fn verify(&self, name: &str, signed: &str) -> Option<String> {
        let (encoded, signature) = signed.split_once('.')?;
        let value = String::from_utf8(URL_SAFE_NO_PAD.decode(encoded).ok()?).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.tag(name, &value).verify_slice(&signature).ok()?;
        Some(value)
    }

    /// Read and verify cookie `name` from request headers.
    pub fn read(&self, headers: &HeaderMap, name: &str) -> Option<String> {
        cookie_values(headers, name).find_map(|raw| self.verify(name, raw))
    }

    /// `Set-Cookie` value storing `value` under `name`.
    pub fn set_cookie(&self, name: &str, value: &str) -> HeaderValue {
        // base64url and '.' are always valid header bytes
        HeaderValue::from_str(&format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax",
            name,
            self.sign(name, value)
        ))
        .unwrap_or_else(|_| clear_cookie(name))
    }
}

/// `Set-Cookie` value that removes cookie `name`.
pub fn clear_cookie(name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax",
        name
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("invalid=; Max-Age=0"))
}

/// Raw values of every cookie called `name` in the `Cookie` headers.
fn cookie_values<'a>(headers: &'a HeaderMap, name: &'a str) -> impl Iterator<Item = &'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|line| line.split(';'))
        .filter_map(move |pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.trim_matches('"'))
        })
}

/// Who is making a request, and the upstream token when we just got one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub access_token: Option<String>,
}

/// Resolves, stores and clears the caller's identity.
#[derive(Clone)]
pub struct SessionManager {
    signer: CookieSigner,
    identity: Arc<dyn IdentityProvider>,
}

impl SessionManager {
    pub fn new(signer: CookieSigner, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { signer, identity }
    }

    pub fn identity_provider(&self) -> &dyn IdentityProvider {
        self.identity.as_ref()
    }

    /// User id from the signed `user_id` cookie.
    pub fn current_user(&self, headers: &HeaderMap) -> Option<String> {
        self.signer.read(headers, USER_ID_COOKIE)
    }

    /// Identity from a refresh token when one is given, else from the cookie.
    ///
    /// Refresh failures are logged and fall back to the cookie; `None` means
    /// the caller is anonymous.
    pub async fn resolve(&self, refresh_token: Option<&str>, headers: &HeaderMap) -> Option<Identity> {
        if let Some(token) = refresh_token.filter(|t| !t.is_empty()) {
            match self.identity.refresh_session(token).await {
                Ok(session) => {
                    debug!(user_id = %session.user_id, "identity from refresh token");
                    return Some(Identity {
                        user_id: session.user_id,
                        access_token: Some(session.access_token),
                    });
                }
                Err(err) => warn!("session refresh failed, falling back to cookie: {}", err),
            }
        }

        self.current_user(headers).map(|user_id| Identity {
            user_id,
            access_token: None,
        })
    }

    /// `Set-Cookie` values persisting `identity`.
    pub fn store(&self, identity: &Identity) -> Vec<HeaderValue> {
        let mut cookies = vec![self.signer.set_cookie(USER_ID_COOKIE, &identity.user_id)];
        if let Some(token) = &identity.access_token {
            cookies.push(self.signer.set_cookie(ACCESS_TOKEN_COOKIE, token));
        }
        cookies
    }

    /// Sign out upstream (best effort) and return the cookie removals.
    pub async fn clear(&self, headers: &HeaderMap) -> Vec<HeaderValue> {
        if let Some(token) = self.signer.read(headers, ACCESS_TOKEN_COOKIE) {
            if let Err(err) = self.identity.sign_out(&token).await {
                warn!("sign out failed: {}", err);
            }
        }
        vec![clear_cookie(USER_ID_COOKIE), clear_cookie(ACCESS_TOKEN_COOKIE)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use crate::{
        models::session::Session,
        services::identity_service::{IdentityError, MockIdentityProvider},
    };

    fn signer() -> CookieSigner {
        CookieSigner::new("secret").unwrap()
    }

    fn cookie_header(line: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(line).unwrap());
        headers
    }

    #[test]
    fn signed_values_verify_only_under_the_same_secret_and_name() {
        let signed = signer().sign(USER_ID_COOKIE, "u1");
        assert_eq!(signer().verify(USER_ID_COOKIE, &signed).as_deref(), Some("u1"));
        assert_eq!(signer().verify(ACCESS_TOKEN_COOKIE, &signed), None);

        let other = CookieSigner::new("another secret").unwrap();
        assert_eq!(other.verify(USER_ID_COOKIE, &signed), None);
    }

    #[test]
    fn tampering_with_value_or_signature_fails() {
        let signed = signer().sign(USER_ID_COOKIE, "u1");
        let (_, signature) = signed.split_once('.').unwrap();
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode("u2"), signature);
        assert_eq!(signer().verify(USER_ID_COOKIE, &forged), None);
        assert_eq!(signer().verify(USER_ID_COOKIE, "u1"), None);
        assert_eq!(signer().verify(USER_ID_COOKIE, "dTE.AAAA"), None);
    }

    #[test]
    fn reads_the_named_cookie_among_others() {
        let signed = signer().sign(USER_ID_COOKIE, "u1");
        let headers = cookie_header(&format!("theme=dark; user_id={}; lang=en", signed));
        assert_eq!(signer().read(&headers, USER_ID_COOKIE).as_deref(), Some("u1"));
        assert_eq!(signer().read(&HeaderMap::new(), USER_ID_COOKIE), None);
    }

    #[test]
    fn set_cookie_round_trips_through_a_cookie_header() {
        let set = signer().set_cookie(USER_ID_COOKIE, "u1");
        let set = set.to_str().unwrap();
        assert!(set.contains("HttpOnly"));
        let pair = set.split(';').next().unwrap();
        assert_eq!(
            signer().read(&cookie_header(pair), USER_ID_COOKIE).as_deref(),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn refresh_token_wins_over_cookie() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_refresh_session()
            .times(1)
            .returning(|_| {
                Ok(Session {
                    user_id: "fresh".into(),
                    access_token: "jwt".into(),
                })
            });
        let sessions = SessionManager::new(signer(), Arc::new(identity));
        let headers = cookie_header(&format!("user_id={}", signer().sign(USER_ID_COOKIE, "old")));

        let resolved = sessions.resolve(Some("rt"), &headers).await.unwrap();
        assert_eq!(resolved.user_id, "fresh");
        assert_eq!(resolved.access_token.as_deref(), Some("jwt"));
        assert_eq!(sessions.store(&resolved).len(), 2);
    }

    #[tokio::test]
    async fn failed_refresh_falls_back_to_the_cookie() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_refresh_session().returning(|_| {
            Err(IdentityError::Rejected {
                status: 400,
                message: "Invalid Refresh Token".into(),
            })
        });
        let sessions = SessionManager::new(signer(), Arc::new(identity));
        let headers = cookie_header(&format!("user_id={}", signer().sign(USER_ID_COOKIE, "u1")));

        let resolved = sessions.resolve(Some("stale"), &headers).await.unwrap();
        assert_eq!(resolved.user_id, "u1");
        assert_eq!(resolved.access_token, None);

        assert_eq!(sessions.resolve(Some("stale"), &HeaderMap::new()).await, None);
    }

    #[tokio::test]
    async fn clear_signs_out_with_the_stored_access_token() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_sign_out()
            .withf(|token| token.to_string() == "jwt")
            .times(1)
            .returning(|_| Ok(()));
        let sessions = SessionManager::new(signer(), Arc::new(identity));
        let headers = cookie_header(&format!(
            "access_token={}",
            signer().sign(ACCESS_TOKEN_COOKIE, "jwt")
        ));

        let cleared = sessions.clear(&headers).await;
        assert_eq!(cleared.len(), 2);
        assert!(cleared[0].to_str().unwrap().starts_with("user_id=;"));
    }
}
