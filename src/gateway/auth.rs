//! Bearer authentication middleware
//!
//! Every request not handled by the OAuth proxy router passes through this
//! guard. The bearer token is resolved to an [`AuthContext`] by the token
//! verifier and attached to the request for downstream consumption; failed
//! or missing credentials never reach the session layer.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};

use crate::Error;
use crate::oauth::verifier::{TokenVerifier, unix_now};

/// State for the bearer auth guard
pub struct AuthState {
    /// Token verifier (the upstream-backed one in production, stubs in tests)
    pub verifier: Arc<dyn TokenVerifier>,
    /// Scopes every token must carry; empty means no requirement
    pub required_scopes: Vec<String>,
    /// Advertised in `WWW-Authenticate` so clients can discover the
    /// authorization server
    pub resource_metadata_url: String,
}

/// Extract the token from an `Authorization: Bearer <token>` header value
#[must_use]
pub fn extract_bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .filter(|t| !t.is_empty())
}

/// Authentication middleware
pub async fn auth_middleware(
    State(auth): State<Arc<AuthState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(request.headers()) else {
        warn!(path = %path, "Missing or malformed Authorization header");
        return unauthorized_response(&auth.resource_metadata_url, &Error::MissingOrMalformedHeader);
    };

    let context = match auth.verifier.verify(token).await {
        Ok(ctx) => ctx,
        Err(Error::UpstreamUnavailable(detail)) => {
            warn!(path = %path, detail = %detail, "Verification upstream unavailable");
            let err = Error::UpstreamUnavailable(detail);
            return (
                err.status_code(),
                Json(json!({
                    "error": {"code": err.to_rpc_code(), "message": err.to_string()}
                })),
            )
                .into_response();
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Token verification failed");
            return unauthorized_response(&auth.resource_metadata_url, &e);
        }
    };

    if context.is_expired(unix_now()) {
        warn!(path = %path, client_id = %context.client_id, "Token expired");
        return unauthorized_response(
            &auth.resource_metadata_url,
            &Error::InvalidToken("token expired".to_string()),
        );
    }

    if !context.has_scopes(&auth.required_scopes) {
        warn!(
            path = %path,
            client_id = %context.client_id,
            required = ?auth.required_scopes,
            "Insufficient scope"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": {"code": -32000, "message": "Insufficient scope"}
            })),
        )
            .into_response();
    }

    debug!(path = %path, client_id = %context.client_id, user_id = %context.identity.user_id, "Authenticated request");
    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Create a 401 Unauthorized response from an auth failure.
///
/// `WWW-Authenticate` points at the protected-resource metadata so a client
/// holding no (or a stale) token can find the authorization server.
fn unauthorized_response(resource_metadata_url: &str, err: &Error) -> Response {
    (
        err.status_code(),
        [(
            "WWW-Authenticate",
            format!("Bearer resource_metadata=\"{resource_metadata_url}\""),
        )],
        Json(json!({
            "error": {
                "code": err.to_rpc_code(),
                "message": err.to_string()
            }
        })),
    )
        .into_response()
}
