//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, info};

use super::auth::AuthState;
use super::router::{AppState, create_router};
use super::session::SessionMultiplexer;
use super::tools::ToolService;
use crate::config::Config;
use crate::oauth::clients::{CachingClientStore, UpstreamRegistrar};
use crate::oauth::proxy::OAuthProxy;
use crate::oauth::verifier::UpstreamVerifier;
use crate::{Error, Result};

/// OAuth gateway server
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    proxy: Arc<OAuthProxy>,
    auth: Arc<AuthState>,
}

impl Gateway {
    /// Wire up the gateway's components from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the outbound HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.server.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let issuer = config.issuer();
        let clients = Arc::new(CachingClientStore::new(UpstreamRegistrar::new(
            http.clone(),
            &config.upstream,
        )));
        let verifier = Arc::new(UpstreamVerifier::new(http.clone(), &config.upstream));

        let proxy = Arc::new(OAuthProxy::new(
            issuer.clone(),
            config.upstream.clone(),
            http,
            clients,
        ));
        let auth = Arc::new(AuthState {
            verifier,
            required_scopes: config.auth.required_scopes.clone(),
            resource_metadata_url: OAuthProxy::resource_metadata_url(&issuer),
        });
        let state = Arc::new(AppState {
            multiplexer: Arc::new(SessionMultiplexer::new(config.session.clone())),
            tools: ToolService::new(),
            keep_alive_interval: config.session.keep_alive_interval,
            max_body_size: config.server.max_body_size,
        });

        Ok(Self {
            config,
            state,
            proxy,
            auth,
        })
    }

    /// Run the gateway until a shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        // Idle session sweeper
        let multiplexer = Arc::clone(&self.state.multiplexer);
        let idle_timeout = self.config.session.idle_timeout;
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(idle_timeout / 2);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = multiplexer.sweep_idle();
                        if removed > 0 {
                            debug!(removed = removed, "Swept idle sessions");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        let app = create_router(Arc::clone(&self.state), self.proxy, self.auth);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("MCP OAUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(issuer = %self.config.issuer(), "OAuth issuer");
        info!(
            userinfo = %self.config.upstream.userinfo_url,
            "Tokens verified against upstream"
        );
        if self.config.auth.required_scopes.is_empty() {
            info!("No scope requirement configured");
        } else {
            info!(scopes = ?self.config.auth.required_scopes, "Required scopes");
        }
        info!("  POST   /mcp  (JSON-RPC requests)");
        info!("  GET    /mcp  (SSE stream)");
        info!("  DELETE /mcp  (session teardown)");
        info!("============================================================");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
