//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream authorization server endpoints
    pub upstream: UpstreamConfig,
    /// Bearer authentication configuration
    pub auth: AuthConfig,
    /// Session transport configuration
    pub session: SessionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public origin of this gateway, used as issuer in discovery documents.
    /// Clients must resolve OAuth calls back through this origin.
    pub public_url: String,
    /// Timeout for outbound upstream requests
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            public_url: "http://localhost:3001".to_string(),
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Upstream authorization server endpoint set. Read-only after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Authorization endpoint (user-agent is redirected here)
    pub authorization_url: String,
    /// Token endpoint (forwarded)
    pub token_url: String,
    /// Dynamic client registration endpoint (intercepted by the cache)
    pub registration_url: String,
    /// Token-resolution endpoint returning identity facts for a bearer token
    pub userinfo_url: String,
    /// Cookie name the userinfo endpoint also accepts the token under.
    /// The same raw token travels as both header and cookie credential.
    pub session_cookie: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            authorization_url: "http://localhost:3000/api/auth/mcp/authorize".to_string(),
            token_url: "http://localhost:3000/api/auth/mcp/token".to_string(),
            registration_url: "http://localhost:3000/api/auth/mcp/register".to_string(),
            userinfo_url: "http://localhost:3000/api/auth/mcp/userinfo".to_string(),
            session_cookie: "better-auth.session_token".to_string(),
        }
    }
}

/// Bearer authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Scopes every verified token must carry. Empty = no scope requirement.
    pub required_scopes: Vec<String>,
}

/// Session transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Notification buffer size per session
    pub buffer_size: usize,
    /// Keep-alive interval for SSE streams
    #[serde(with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    /// Sessions idle longer than this are closed and removed
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            keep_alive_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(1800),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (MCP_OAUTH_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed("MCP_OAUTH_GATEWAY_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot produce a working proxy
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("upstream.authorization_url", &self.upstream.authorization_url),
            ("upstream.token_url", &self.upstream.token_url),
            ("upstream.registration_url", &self.upstream.registration_url),
            ("upstream.userinfo_url", &self.upstream.userinfo_url),
        ] {
            url::Url::parse(value)
                .map_err(|e| Error::Config(format!("Invalid {name} '{value}': {e}")))?;
        }
        url::Url::parse(&self.server.public_url).map_err(|e| {
            Error::Config(format!(
                "Invalid server.public_url '{}': {e}",
                self.server.public_url
            ))
        })?;
        // The sweeper ticks at a fraction of this interval and cannot run
        // with a zero period
        if self.session.idle_timeout.is_zero() {
            return Err(Error::Config(
                "session.idle_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Gateway issuer origin without a trailing slash
    #[must_use]
    pub fn issuer(&self) -> String {
        self.server.public_url.trim_end_matches('/').to_string()
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}
