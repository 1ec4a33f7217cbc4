//! OAuth proxy router
//!
//! Serves the authorization-server surface a protocol client expects at the
//! gateway's own origin. Discovery documents name the gateway as issuer so
//! clients resolve authorize/token/register calls back through this proxy;
//! the endpoints themselves forward to the configured upstream server and
//! relay its responses. The gateway never issues tokens itself.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use super::clients::ClientStore;
use crate::Error;
use crate::config::UpstreamConfig;

/// Well-known path for RFC 8414 authorization server metadata
pub const AUTHORIZATION_SERVER_METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

/// Well-known path for RFC 9728 protected resource metadata
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// State for the OAuth proxy routes
pub struct OAuthProxy {
    /// Gateway issuer origin (no trailing slash)
    issuer: String,
    /// Upstream endpoint set
    upstream: UpstreamConfig,
    /// HTTP client for forwarding
    http: Client,
    /// Client registration cache
    clients: Arc<dyn ClientStore>,
}

impl OAuthProxy {
    /// Create the proxy facade.
    ///
    /// The client store is supplied directly at construction; the register
    /// endpoint is the only one it intercepts.
    #[must_use]
    pub fn new(
        issuer: String,
        upstream: UpstreamConfig,
        http: Client,
        clients: Arc<dyn ClientStore>,
    ) -> Self {
        Self {
            issuer,
            upstream,
            http,
            clients,
        }
    }

    /// URL of the gateway's protected-resource metadata document
    #[must_use]
    pub fn resource_metadata_url(issuer: &str) -> String {
        format!("{issuer}{PROTECTED_RESOURCE_METADATA_PATH}")
    }

    /// RFC 8414 document reflecting the gateway as issuer
    #[must_use]
    pub fn authorization_server_metadata(&self) -> Value {
        json!({
            "issuer": self.issuer,
            "authorization_endpoint": format!("{}/authorize", self.issuer),
            "token_endpoint": format!("{}/token", self.issuer),
            "registration_endpoint": format!("{}/register", self.issuer),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "token_endpoint_auth_methods_supported": ["client_secret_post", "none"],
            "code_challenge_methods_supported": ["S256"],
        })
    }

    /// RFC 9728 document naming the gateway as the protected resource
    #[must_use]
    pub fn protected_resource_metadata(&self) -> Value {
        json!({
            "resource": self.issuer,
            "authorization_servers": [self.issuer],
            "bearer_methods_supported": ["header"],
        })
    }
}

/// Build the router for the OAuth proxy surface.
///
/// These routes are public by design: they run before the bearer auth
/// guard, since they exist to obtain a token in the first place.
pub fn routes(proxy: Arc<OAuthProxy>) -> Router {
    Router::new()
        .route(
            AUTHORIZATION_SERVER_METADATA_PATH,
            get(authorization_server_metadata_handler),
        )
        .route(
            PROTECTED_RESOURCE_METADATA_PATH,
            get(protected_resource_metadata_handler),
        )
        .route("/authorize", get(authorize_handler))
        .route("/token", post(token_handler))
        .route("/register", post(register_handler))
        .with_state(proxy)
}

/// GET /.well-known/oauth-authorization-server
async fn authorization_server_metadata_handler(
    State(proxy): State<Arc<OAuthProxy>>,
) -> impl IntoResponse {
    Json(proxy.authorization_server_metadata())
}

/// GET /.well-known/oauth-protected-resource
async fn protected_resource_metadata_handler(
    State(proxy): State<Arc<OAuthProxy>>,
) -> impl IntoResponse {
    Json(proxy.protected_resource_metadata())
}

/// GET /authorize - send the user agent to the upstream authorization
/// endpoint with the original query string intact.
async fn authorize_handler(
    State(proxy): State<Arc<OAuthProxy>>,
    RawQuery(query): RawQuery,
) -> Response {
    let target = forward_url(&proxy.upstream.authorization_url, query.as_deref());
    debug!(target = %target, "Forwarding authorization request");
    Redirect::temporary(&target).into_response()
}

/// Append a query string to a base URL that may carry its own query
fn forward_url(base: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.is_empty() => {
            let sep = if base.contains('?') { '&' } else { '?' };
            format!("{base}{sep}{q}")
        }
        _ => base.to_string(),
    }
}

/// POST /token - forward the urlencoded grant to the upstream token
/// endpoint and relay its status and body verbatim.
async fn token_handler(State(proxy): State<Arc<OAuthProxy>>, body: String) -> Response {
    let result = proxy
        .http
        .post(&proxy.upstream.token_url)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(body)
        .send()
        .await;

    let response = match result {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Token endpoint unreachable");
            return proxy_error(&Error::UpstreamUnavailable(format!(
                "token request failed: {e}"
            )));
        }
    };

    let status = StatusCode::from_u16(response.status().as_u16())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return proxy_error(&Error::UpstreamUnavailable(format!(
                "token response truncated: {e}"
            )));
        }
    };

    debug!(status = %status, "Relaying token response");
    (status, [(header::CONTENT_TYPE, content_type)], bytes).into_response()
}

/// POST /register - intercepted by the client registration cache so the
/// record passing back through is still the upstream's authoritative
/// response, but a local copy with its secret is retained.
async fn register_handler(
    State(proxy): State<Arc<OAuthProxy>>,
    Json(metadata): Json<Value>,
) -> Response {
    match proxy.clients.register_client(&metadata).await {
        Ok(record) => {
            info!(client_id = %record.client_id, "Client registered through proxy");
            (StatusCode::CREATED, Json(record)).into_response()
        }
        // The upstream's rejection is the authoritative answer; relay its
        // status and JSON body untouched.
        Err(Error::UpstreamRejected { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            debug!(status = %status, "Relaying registration rejection");
            (
                status,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "Client registration failed");
            proxy_error(&e)
        }
    }
}

/// JSON error envelope with a numeric code and message
fn proxy_error(err: &Error) -> Response {
    (
        err.status_code(),
        Json(json!({
            "error": {
                "code": err.to_rpc_code(),
                "message": err.to_string()
            }
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use crate::Result;
    use crate::oauth::clients::{ClientRecord, ClientStore};

    struct NullStore;

    #[async_trait]
    impl ClientStore for NullStore {
        async fn get_client(&self, client_id: &str) -> Result<ClientRecord> {
            Err(Error::ClientNotFound(client_id.to_string()))
        }

        async fn register_client(&self, _metadata: &Value) -> Result<ClientRecord> {
            Err(Error::UpstreamUnavailable("stub".to_string()))
        }
    }

    fn proxy() -> OAuthProxy {
        OAuthProxy::new(
            "http://localhost:3001".to_string(),
            UpstreamConfig::default(),
            Client::new(),
            Arc::new(NullStore),
        )
    }

    #[test]
    fn discovery_reflects_gateway_issuer() {
        let meta = proxy().authorization_server_metadata();
        assert_eq!(meta["issuer"], "http://localhost:3001");
        assert_eq!(
            meta["authorization_endpoint"],
            "http://localhost:3001/authorize"
        );
        assert_eq!(meta["token_endpoint"], "http://localhost:3001/token");
        assert_eq!(
            meta["registration_endpoint"],
            "http://localhost:3001/register"
        );
        // The upstream's own URLs must not leak into discovery
        let doc = meta.to_string();
        assert!(!doc.contains("localhost:3000"));
    }

    #[test]
    fn protected_resource_names_gateway() {
        let meta = proxy().protected_resource_metadata();
        assert_eq!(meta["resource"], "http://localhost:3001");
        assert_eq!(meta["authorization_servers"][0], "http://localhost:3001");
    }

    #[test]
    fn resource_metadata_url_shape() {
        assert_eq!(
            OAuthProxy::resource_metadata_url("http://localhost:3001"),
            "http://localhost:3001/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn forward_url_joins_on_existing_query() {
        assert_eq!(
            forward_url("http://up/authorize", Some("client_id=abc")),
            "http://up/authorize?client_id=abc"
        );
        assert_eq!(
            forward_url("http://up/authorize?tenant=t1", Some("client_id=abc")),
            "http://up/authorize?tenant=t1&client_id=abc"
        );
        assert_eq!(forward_url("http://up/authorize", None), "http://up/authorize");
        assert_eq!(
            forward_url("http://up/authorize", Some("")),
            "http://up/authorize"
        );
    }

    #[tokio::test]
    async fn register_relays_upstream_rejection_status_and_body() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        struct RejectingStore;

        #[async_trait]
        impl ClientStore for RejectingStore {
            async fn get_client(&self, client_id: &str) -> Result<ClientRecord> {
                Err(Error::ClientNotFound(client_id.to_string()))
            }

            async fn register_client(&self, _metadata: &Value) -> Result<ClientRecord> {
                Err(Error::UpstreamRejected {
                    status: 400,
                    body: r#"{"error":"invalid_client_metadata"}"#.to_string(),
                })
            }
        }

        let app = routes(Arc::new(OAuthProxy::new(
            "http://localhost:3001".to_string(),
            UpstreamConfig::default(),
            Client::new(),
            Arc::new(RejectingStore),
        )));

        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"client_name":"demo"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        // The upstream's client error passes through, not a gateway 500
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "invalid_client_metadata");
    }
}
