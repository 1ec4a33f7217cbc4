//! Error types for the OAuth gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Authorization header absent or not `Bearer <token>`
    #[error("Missing or malformed Authorization header")]
    MissingOrMalformedHeader,

    /// Upstream rejected the token, or the resolution record was unusable
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Client id not present in the registration cache
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Unknown or missing session identifier
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// Authorization server unreachable or returned a 5xx
    #[error("Upstream authorization server unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream rejected a forwarded request with a client error.
    /// Status and body are relayed to the caller unchanged.
    #[error("Upstream rejected request: HTTP {status}")]
    UpstreamRejected {
        /// Upstream status code
        status: u16,
        /// Upstream response body, relayed verbatim
        body: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status this error surfaces as to protocol clients
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingOrMalformedHeader | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::ClientNotFound(_) | Self::InvalidSession(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamRejected { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to JSON-RPC error code
    #[must_use]
    pub fn to_rpc_code(&self) -> i32 {
        match self {
            Self::Json(_) => -32700, // Parse error
            Self::MissingOrMalformedHeader
            | Self::InvalidToken(_)
            | Self::InvalidSession(_)
            | Self::UpstreamRejected { .. } => -32000,
            Self::ClientNotFound(_) => -32001,
            Self::UpstreamUnavailable(_) => -32002,
            _ => -32603, // Internal error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_are_401() {
        assert_eq!(
            Error::MissingOrMalformedHeader.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::InvalidToken("rejected upstream".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn session_and_client_failures_are_400() {
        assert_eq!(
            Error::InvalidSession("unknown".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::ClientNotFound("abc".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn upstream_rejection_relays_its_status() {
        let err = Error::UpstreamRejected {
            status: 400,
            body: r#"{"error":"invalid_client_metadata"}"#.to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        // A nonsense status falls back to 502 rather than panicking
        let err = Error::UpstreamRejected {
            status: 99,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn upstream_unavailable_is_502() {
        assert_eq!(
            Error::UpstreamUnavailable("connection refused".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn rpc_codes() {
        assert_eq!(Error::MissingOrMalformedHeader.to_rpc_code(), -32000);
        assert_eq!(Error::ClientNotFound("x".into()).to_rpc_code(), -32001);
        assert_eq!(Error::UpstreamUnavailable("x".into()).to_rpc_code(), -32002);
        assert_eq!(Error::Internal("x".into()).to_rpc_code(), -32603);
    }
}
