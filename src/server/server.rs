//! Portal server

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::router::{AppState, create_router};
use crate::config::Config;
use crate::users;
use crate::{Error, Result};

/// Review portal server
pub struct Server {
    /// Configuration
    config: Config,
    /// Wired application state
    state: Arc<AppState>,
}

impl Server {
    /// Create a new server, wiring every SSO collaborator.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(AppState::from_config(&config)?);
        Ok(Self { config, state })
    }

    /// Socket address from `server.host` and `server.port`
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        Ok(SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        ))
    }

    /// Run until SIGINT/SIGTERM, then drain for at most `shutdown_timeout`.
    pub async fn run(self) -> Result<()> {
        let addr = self.bind_addr()?;
        let app = create_router(Arc::clone(&self.state));
        let listener = TcpListener::bind(addr).await?;

        let settings = self.state.handshake.settings();
        info!("============================================================");
        info!("REVIEW PORTAL v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            environment = ?settings.environment,
            secure_cookies = settings.secure_cookies(),
            "Environment"
        );
        info!("DEEP ID SSO:");
        info!("  GET  /api/auth/deep-id/start     (begin login)");
        info!("  GET  /api/auth/deep-id/callback  (provider redirect)");
        info!("  POST /api/auth/logout");
        info!("  GET  /api/auth/me");
        info!("  Redirect URI: {}", settings.redirect_uri);
        if !settings.client_id_is_valid() {
            warn!("SSO client id is missing or too short - logins will be refused");
        }
        info!(backend = self.state.users.backend_name(), "User store");
        info!("============================================================");
        debug!(config = ?self.config.redacted(), "Effective configuration");

        let (shutdown_tx, _) = broadcast::channel(1);
        let drain_rx = shutdown_tx.subscribe();

        let cache_ttl = self.config.users.cache_ttl;
        if !cache_ttl.is_zero() {
            users::spawn_sweeper(
                Arc::clone(&self.state.users),
                cache_ttl,
                shutdown_tx.subscribe(),
            );
        }

        let serve = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .into_future();

        tokio::select! {
            result = serve => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = drain_deadline(drain_rx, self.config.server.shutdown_timeout) => {
                warn!(
                    timeout = ?self.config.server.shutdown_timeout,
                    "Shutdown timeout elapsed, dropping open connections"
                );
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Resolves `timeout` after the shutdown signal fires.
async fn drain_deadline(mut rx: broadcast::Receiver<()>, timeout: Duration) {
    if rx.recv().await.is_err() {
        // Sender dropped without a signal; never fire
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(timeout).await;
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
