//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use super::auth::{AuthState, auth_middleware};
use super::session::{SessionMultiplexer, SessionTransport, create_sse_response};
use super::tools::ToolService;
use crate::Error;
use crate::oauth::proxy::{OAuthProxy, routes as oauth_routes};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse, is_initialize_request};

/// Shared application state
pub struct AppState {
    /// Session table
    pub multiplexer: Arc<SessionMultiplexer>,
    /// Message semantics
    pub tools: ToolService,
    /// Keep-alive interval for SSE streams
    pub keep_alive_interval: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

/// Create the router.
///
/// The OAuth proxy surface and /health stay public; /mcp sits behind the
/// bearer auth guard.
pub fn create_router(state: Arc<AppState>, proxy: Arc<OAuthProxy>, auth: Arc<AuthState>) -> Router {
    let protected = Router::new()
        .route(
            "/mcp",
            axum::routing::post(mcp_post_handler)
                .get(mcp_sse_handler)
                .delete(mcp_delete_handler),
        )
        .layer(middleware::from_fn_with_state(auth, auth_middleware))
        .with_state(Arc::clone(&state));

    let public = Router::new()
        .route("/health", get(health_handler))
        .with_state(state);

    Router::new()
        .merge(oauth_routes(proxy))
        .merge(public)
        .merge(protected)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// POST /mcp handler.
///
/// An `initialize` request without a session id opens a session; every
/// other message must name a live session in `Mcp-Session-Id`.
async fn mcp_post_handler(
    State(state): State<Arc<AppState>>,
    http_request: axum::http::Request<axum::body::Body>,
) -> impl IntoResponse {
    let headers = http_request.headers().clone();
    let Some(auth) = http_request
        .extensions()
        .get::<crate::oauth::verifier::AuthContext>()
        .cloned()
    else {
        // The auth guard always runs first; reaching here without a context
        // means the route was wired up wrong.
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": "Unauthenticated"},
                "id": null
            })),
        )
            .into_response();
    };

    let body_bytes = match axum::body::to_bytes(http_request.into_body(), state.max_body_size).await
    {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32700, "message": format!("Failed to read body: {e}")},
                    "id": null
                })),
            )
                .into_response();
        }
    };

    let message: Value = match serde_json::from_slice(&body_bytes) {
        Ok(v) => v,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "jsonrpc": "2.0",
                    "error": {"code": -32700, "message": format!("Invalid JSON: {e}")},
                    "id": null
                })),
            )
                .into_response();
        }
    };

    let session_id = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let transport: Arc<SessionTransport> = match session_id {
        Some(ref id) => match state.multiplexer.get(id) {
            Some(t) => t,
            None => {
                warn!(session_id = %id, "Request for unknown session");
                return invalid_session_response();
            }
        },
        None if is_initialize_request(&message) => state.multiplexer.create_session(),
        None => {
            debug!("Non-initialize request without session id");
            return invalid_session_response();
        }
    };

    // Requests within one session never interleave; the guard is held
    // until the response is built.
    let _guard = transport.begin_request().await;

    // Notifications carry no id and get no response body
    if message.get("method").is_some() && message.get("id").is_none() {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        debug!(session_id = %transport.id(), method = %method, "Accepted notification");
        return build_response_with_session(
            StatusCode::ACCEPTED,
            json!({}),
            transport.id(),
        );
    }

    let request: JsonRpcRequest = match serde_json::from_value(message) {
        Ok(r) => r,
        Err(e) => {
            let response = JsonRpcResponse::error(None, -32600, format!("Invalid request: {e}"));
            return build_response_with_session(
                StatusCode::BAD_REQUEST,
                serde_json::to_value(response).unwrap_or_default(),
                transport.id(),
            );
        }
    };

    let response = state.tools.dispatch(&request, &auth);
    build_response_with_session(
        StatusCode::OK,
        serde_json::to_value(response).unwrap_or_default(),
        transport.id(),
    )
}

/// GET /mcp handler - SSE stream for server-to-client events.
/// Requires an existing session; GET never creates one.
async fn mcp_sse_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !accept.contains("text/event-stream") {
        return (
            StatusCode::NOT_ACCEPTABLE,
            Json(json!({
                "error": "Must accept text/event-stream for the event stream"
            })),
        )
            .into_response();
    }

    let Some(transport) = headers
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|id| state.multiplexer.get(id))
    else {
        return invalid_session_response();
    };

    info!(session_id = %transport.id(), "Client attached event stream");
    let session_id = transport.id().to_string();
    let sse = create_sse_response(transport, state.keep_alive_interval);

    let mut response = sse.into_response();
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert("mcp-session-id", value);
    }
    response
}

/// DELETE /mcp handler - session termination.
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let session_id = headers.get("mcp-session-id").and_then(|v| v.to_str().ok());

    match session_id {
        Some(id) if state.multiplexer.remove_session(id) => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT.into_response()
        }
        Some(id) => {
            debug!(session_id = %id, "DELETE for unknown session");
            invalid_session_response()
        }
        None => invalid_session_response(),
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.multiplexer.session_count()
    }))
}

/// 400 response for a missing or unknown session id.
///
/// Status and code come from the error taxonomy; the message is the fixed
/// string MCP clients match on.
fn invalid_session_response() -> axum::response::Response {
    let err = Error::InvalidSession("no valid session ID provided".to_string());
    (
        err.status_code(),
        Json(json!({
            "jsonrpc": "2.0",
            "error": {
                "code": err.to_rpc_code(),
                "message": "Bad Request: No valid session ID provided"
            },
            "id": null
        })),
    )
        .into_response()
}

/// Build an HTTP response carrying the `mcp-session-id` header
fn build_response_with_session(
    status: StatusCode,
    body: Value,
    session_id: &str,
) -> axum::response::Response {
    let mut response = Json(body).into_response();
    if let Ok(value) = session_id.parse() {
        response.headers_mut().insert("mcp-session-id", value);
    }
    (status, response).into_response()
}
