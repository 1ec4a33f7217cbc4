//! Dynamic client registration cache
//!
//! The upstream's client-lookup endpoint never returns a `client_secret`,
//! but the MCP client caches the secret it received from registration and
//! presents it again on authentication. The registration response is the
//! one moment the full record is visible, so it is captured here, keyed by
//! client id, for the lifetime of the process. Single-process only; a
//! multi-instance deployment needs a shared store behind this interface.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::{Error, Result};

/// Full client record as returned by dynamic registration.
///
/// `extra` carries whatever additional fields the upstream put in the
/// registration response, so the record relayed back to the client stays
/// the upstream's authoritative answer. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Assigned client id
    pub client_id: String,
    /// Assigned client secret
    pub client_secret: String,
    /// Registered redirect URIs, in registration order
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// Remaining upstream response fields, relayed verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Capability to proxy a registration request to the upstream server
#[async_trait]
pub trait ClientRegistrar: Send + Sync {
    /// Register a client upstream and return the full assigned record
    async fn register(&self, metadata: &Value) -> Result<ClientRecord>;
}

/// Registrar that POSTs client metadata to the upstream registration endpoint
pub struct UpstreamRegistrar {
    client: Client,
    registration_url: String,
}

impl UpstreamRegistrar {
    /// Create a registrar for the configured upstream
    #[must_use]
    pub fn new(client: Client, upstream: &UpstreamConfig) -> Self {
        Self {
            client,
            registration_url: upstream.registration_url.clone(),
        }
    }
}

#[async_trait]
impl ClientRegistrar for UpstreamRegistrar {
    async fn register(&self, metadata: &Value) -> Result<ClientRecord> {
        let response = self
            .client
            .post(&self.registration_url)
            .json(metadata)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("registration failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Upstream rejected registration");
            if status.is_server_error() {
                return Err(Error::UpstreamUnavailable(format!(
                    "registration returned HTTP {status}"
                )));
            }
            // A 4xx is the upstream's answer to the client, not a gateway
            // fault; the status and body are relayed unchanged.
            return Err(Error::UpstreamRejected {
                status: status.as_u16(),
                body,
            });
        }

        let record: ClientRecord = response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("unusable registration response: {e}")))?;

        info!(client_id = %record.client_id, "Registered OAuth client upstream");
        Ok(record)
    }
}

/// Capability set the OAuth proxy router needs from any client store
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Look up a previously registered client.
    ///
    /// A miss is terminal (`ClientNotFound`): there is deliberately no
    /// fallback to the upstream lookup endpoint, which omits secrets.
    async fn get_client(&self, client_id: &str) -> Result<ClientRecord>;

    /// Register a client upstream and retain the full record
    async fn register_client(&self, metadata: &Value) -> Result<ClientRecord>;
}

/// Client store that caches every registration result in memory.
///
/// Registration is the only path by which a record enters the cache.
pub struct CachingClientStore<R> {
    registrar: R,
    clients: DashMap<String, ClientRecord>,
}

impl<R: ClientRegistrar> CachingClientStore<R> {
    /// Wrap a registrar with an in-memory record cache
    #[must_use]
    pub fn new(registrar: R) -> Self {
        Self {
            registrar,
            clients: DashMap::new(),
        }
    }

    /// Number of cached client records
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the cache holds no records
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[async_trait]
impl<R: ClientRegistrar> ClientStore for CachingClientStore<R> {
    async fn get_client(&self, client_id: &str) -> Result<ClientRecord> {
        self.clients
            .get(client_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::ClientNotFound(client_id.to_string()))
    }

    async fn register_client(&self, metadata: &Value) -> Result<ClientRecord> {
        let record = self.registrar.register(metadata).await?;
        debug!(client_id = %record.client_id, "Caching registered client");
        self.clients.insert(record.client_id.clone(), record.clone());
        Ok(record)
    }
}
