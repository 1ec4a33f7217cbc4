//! Session transport multiplexer
//!
//! Implements the session side of MCP Streamable HTTP (2025-03-26):
//! - POST /mcp with an `initialize` request opens a session
//! - subsequent POSTs are routed to the session named by `Mcp-Session-Id`
//! - GET /mcp attaches an SSE stream for server-to-client events
//! - DELETE /mcp tears the session down
//!
//! The multiplexer owns lifecycle and routing only; message semantics live
//! in the tool service. Requests on the same session are serialized through
//! the transport's handle lock while distinct sessions proceed in parallel.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::stream;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SessionConfig;

/// A server-to-client event delivered over a session's SSE stream
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    /// Event type (e.g. "message", "notification")
    pub event_type: String,
    /// Event payload
    pub data: Value,
}

/// Per-session transport state
pub struct SessionTransport {
    /// Session id, as issued in the `Mcp-Session-Id` header
    id: String,
    /// Event sender feeding the session's SSE subscribers
    tx: broadcast::Sender<SessionEvent>,
    /// Serializes request handling within this session
    handle_lock: Mutex<()>,
    /// Last time a request or stream attach touched this session
    last_activity: RwLock<Instant>,
}

impl SessionTransport {
    fn new(id: String, buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self {
            id,
            tx,
            handle_lock: Mutex::new(()),
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the session's serialization guard and mark it active.
    ///
    /// The caller holds the guard for the duration of request handling, so
    /// two requests on the same session never interleave.
    pub async fn begin_request(&self) -> tokio::sync::MutexGuard<'_, ()> {
        let guard = self.handle_lock.lock().await;
        self.touch();
        guard
    }

    /// Refresh the activity timestamp
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the session last saw activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Push an event to all SSE subscribers of this session.
    ///
    /// Returns false when no stream is attached; events are not queued for
    /// streams that do not exist yet.
    pub fn notify(&self, event: SessionEvent) -> bool {
        match self.tx.send(event) {
            Ok(receivers) => receivers > 0,
            Err(_) => false,
        }
    }

    /// Subscribe to this session's event stream
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl std::fmt::Debug for SessionTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTransport")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Session table keyed by session id
pub struct SessionMultiplexer {
    sessions: RwLock<HashMap<String, Arc<SessionTransport>>>,
    config: SessionConfig,
}

impl SessionMultiplexer {
    /// Create an empty multiplexer
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a fresh session with a unique id.
    ///
    /// Id generation and table insertion happen under one write lock, so
    /// concurrent initializes always yield distinct live sessions.
    pub fn create_session(&self) -> Arc<SessionTransport> {
        let mut sessions = self.sessions.write();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let transport = Arc::new(SessionTransport::new(id.clone(), self.config.buffer_size));
        sessions.insert(id.clone(), Arc::clone(&transport));
        info!(session_id = %id, "Created session");
        transport
    }

    /// Look up a live session
    #[must_use]
    pub fn get(&self, session_id: &str) -> Option<Arc<SessionTransport>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Whether a session id names a live session
    #[must_use]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Remove a session; the id is never reused for new sessions.
    ///
    /// Dropping the table's transport handle closes the broadcast channel
    /// once in-flight work finishes, which ends any attached SSE stream.
    pub fn remove_session(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id).is_some();
        if removed {
            info!(session_id = %session_id, "Removed session");
        }
        removed
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop sessions idle longer than the configured timeout.
    ///
    /// Staleness is evaluated under the write lock, so a session touched by
    /// a concurrent request cannot be swept while active. Returns the number
    /// of sessions removed.
    pub fn sweep_idle(&self) -> usize {
        let max_idle = self.config.idle_timeout;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|id, transport| {
            let stale = transport.idle_for() > max_idle;
            if stale {
                debug!(session_id = %id, "Swept idle session");
            }
            !stale
        });
        before - sessions.len()
    }
}

/// Create the SSE response for GET /mcp.
///
/// Takes owned data to satisfy Rust 2024 lifetime capture rules for
/// `impl Stream`. The stream ends when the session is removed and its last
/// transport handle drops.
pub fn create_sse_response(
    transport: Arc<SessionTransport>,
    keep_alive_interval: Duration,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    transport.touch();
    let mut rx = transport.subscribe();
    let session_id = transport.id().to_string();
    drop(transport);

    let stream = stream! {
        yield Ok(Event::default()
            .event("connected")
            .data(json!({ "session_id": session_id }).to_string()));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(Event::default()
                        .event(&event.event_type)
                        .data(event.data.to_string()));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default()
                        .event("lagged")
                        .data(json!({ "missed": n }).to_string()));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive_interval).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn multiplexer() -> SessionMultiplexer {
        SessionMultiplexer::new(SessionConfig::default())
    }

    #[tokio::test]
    async fn session_lifecycle() {
        let mux = multiplexer();
        let transport = mux.create_session();
        let id = transport.id().to_string();

        assert!(mux.has_session(&id));
        assert_eq!(mux.session_count(), 1);

        assert!(mux.remove_session(&id));
        assert!(!mux.has_session(&id));
        assert!(!mux.remove_session(&id));
    }

    #[tokio::test]
    async fn concurrent_creation_yields_distinct_sessions() {
        let mux = Arc::new(multiplexer());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let mux = Arc::clone(&mux);
            handles.push(tokio::spawn(
                async move { mux.create_session().id().to_string() },
            ));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 16);
        assert_eq!(mux.session_count(), 16);
    }

    #[tokio::test]
    async fn notify_without_subscriber_is_not_delivered() {
        let mux = multiplexer();
        let transport = mux.create_session();
        assert!(!transport.notify(SessionEvent {
            event_type: "message".to_string(),
            data: json!({"n": 1}),
        }));

        let mut rx = transport.subscribe();
        assert!(transport.notify(SessionEvent {
            event_type: "message".to_string(),
            data: json!({"n": 2}),
        }));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.data, json!({"n": 2}));
    }

    #[tokio::test]
    async fn idle_sweep_drops_stale_sessions_only() {
        let mux = SessionMultiplexer::new(SessionConfig {
            idle_timeout: Duration::from_millis(20),
            ..SessionConfig::default()
        });
        let stale = mux.create_session();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let fresh = mux.create_session();

        assert_eq!(mux.sweep_idle(), 1);
        assert!(!mux.has_session(stale.id()));
        assert!(mux.has_session(fresh.id()));
    }

    #[tokio::test]
    async fn touch_after_going_stale_rescues_the_session() {
        let mux = SessionMultiplexer::new(SessionConfig {
            idle_timeout: Duration::from_millis(20),
            ..SessionConfig::default()
        });
        let transport = mux.create_session();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // A request arriving just before the sweep makes the session
        // active again; the sweep must see the fresh timestamp.
        transport.touch();
        assert_eq!(mux.sweep_idle(), 0);
        assert!(mux.has_session(transport.id()));
    }

    #[tokio::test]
    async fn begin_request_serializes_same_session() {
        let mux = multiplexer();
        let transport = mux.create_session();

        let guard = transport.begin_request().await;
        assert!(transport.handle_lock.try_lock().is_err());
        drop(guard);
        assert!(transport.handle_lock.try_lock().is_ok());
    }
}
