//! Identity data resolved from the identity provider or the session cookie.

use serde::{Deserialize, Serialize};

/// Cookie holding the signed user id.
pub const USER_ID_COOKIE: &str = "user_id";

/// Cookie holding the signed upstream access token, used to sign out.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// A session obtained by exchanging a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
}
