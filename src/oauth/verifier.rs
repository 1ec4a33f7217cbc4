//! Bearer token verification against the upstream authorization server

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Verified-token result attached to a request's processing context.
///
/// A value, produced fresh per request and discarded after; nothing
/// downstream may mutate it.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The raw bearer token that was verified
    pub token: String,
    /// OAuth client the token was issued to
    pub client_id: String,
    /// Granted scopes
    pub scopes: HashSet<String>,
    /// Expiry as unix seconds
    pub expires_at: i64,
    /// Resolved identity
    pub identity: Identity,
}

/// Identity facts resolved from the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable user id
    pub user_id: String,
    /// Email, if the upstream knows it
    pub user_email: Option<String>,
    /// Display name, if the upstream knows it
    pub user_name: Option<String>,
}

/// Token-resolution record returned by the upstream userinfo endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    /// Whether the token is active
    #[serde(default)]
    pub active: bool,
    /// Subject identifier
    #[serde(default)]
    pub sub: Option<String>,
    /// Space-delimited scope string; absent means no scopes
    #[serde(default)]
    pub scope: Option<String>,
    /// OAuth client id
    pub client_id: String,
    /// Expiry in milliseconds since epoch
    pub exp: i64,
    /// User record
    pub user: UserInfoUser,
}

/// User sub-record of [`UserInfo`]
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoUser {
    /// Stable user id (required)
    pub id: String,
    /// Email
    #[serde(default)]
    pub email: Option<String>,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
}

impl AuthContext {
    /// Map an upstream resolution record to an auth context.
    ///
    /// Scopes are split on whitespace (absent or empty string means no
    /// scopes, not an error) and `exp` is floor-divided from milliseconds
    /// to seconds.
    #[must_use]
    pub fn from_userinfo(token: &str, info: UserInfo) -> Self {
        let scopes = info
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();

        Self {
            token: token.to_string(),
            client_id: info.client_id,
            scopes,
            expires_at: info.exp.div_euclid(1000),
            identity: Identity {
                user_id: info.user.id,
                user_email: info.user.email,
                user_name: info.user.name,
            },
        }
    }

    /// Whether the token's validity window has passed
    #[must_use]
    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expires_at <= now_unix
    }

    /// Whether the context carries every scope in `required`
    #[must_use]
    pub fn has_scopes<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> bool {
        required.into_iter().all(|s| self.scopes.contains(s))
    }
}

/// Current unix time in seconds
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn unix_now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

/// Capability to resolve an opaque bearer token to an [`AuthContext`]
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify a token, failing with `InvalidToken` if the upstream rejects
    /// it or the record cannot be mapped.
    async fn verify(&self, token: &str) -> Result<AuthContext>;
}

/// Verifier that calls the upstream token-resolution endpoint.
///
/// The raw token is presented both as an `Authorization: Bearer` header and
/// as a session cookie, because the upstream's session model accepts the
/// same value through either convention.
pub struct UpstreamVerifier {
    client: Client,
    userinfo_url: String,
    session_cookie: String,
}

impl UpstreamVerifier {
    /// Create a verifier for the configured upstream
    #[must_use]
    pub fn new(client: Client, upstream: &UpstreamConfig) -> Self {
        Self {
            client,
            userinfo_url: upstream.userinfo_url.clone(),
            session_cookie: upstream.session_cookie.clone(),
        }
    }
}

#[async_trait]
impl TokenVerifier for UpstreamVerifier {
    async fn verify(&self, token: &str) -> Result<AuthContext> {
        let response = self
            .client
            .get(&self.userinfo_url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Cookie", format!("{}={token}", self.session_cookie))
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("userinfo request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(Error::UpstreamUnavailable(format!(
                "userinfo returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Upstream rejected token");
            return Err(Error::InvalidToken(format!("upstream returned {status}")));
        }

        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| Error::InvalidToken(format!("unusable userinfo record: {e}")))?;

        let context = AuthContext::from_userinfo(token, info);
        debug!(
            client_id = %context.client_id,
            user_id = %context.identity.user_id,
            "Token verified"
        );
        Ok(context)
    }
}
