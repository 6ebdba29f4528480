//! HTTP router and application state

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::config::Config;
use crate::sso::{
    DeepIdClient, Handshake, IdTokenVerifier, IssuerDiscovery, JwksCache, RemoteKeySet,
    SessionIssuer, SsoSettings, provider_http_client, routes::sso_routes,
};
use crate::users::{self, UserStore};
use crate::{Error, Result};

/// Shared application state
pub struct AppState {
    /// Start/callback orchestrator
    pub handshake: Handshake,
    /// Issuer discovery, shared with the ID token verifier
    pub discovery: Arc<IssuerDiscovery>,
    /// User store, shared with the orchestrator
    pub users: Arc<dyn UserStore>,
    /// Per-request timeout
    pub request_timeout: std::time::Duration,
}

impl AppState {
    /// Wire every handshake collaborator from configuration.
    ///
    /// Nothing is fetched here; discovery and JWKS are loaded lazily on the
    /// first callback.
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = Arc::new(SsoSettings::from_config(config)?);
        let http = provider_http_client(&config.sso)?;

        let discovery = Arc::new(IssuerDiscovery::new(http.clone(), &settings));
        let jwks = Arc::new(JwksCache::new(http.clone(), config.sso.jwks_ttl));
        let keys = Arc::new(RemoteKeySet::new(jwks, settings.jwks_uri()));
        let verifier = IdTokenVerifier::new(
            settings.client_id.clone(),
            Arc::clone(&discovery),
            keys,
        )
        .with_algorithms(settings.algorithms.clone());
        let exchanger = DeepIdClient::new(http, &settings);

        // The user store may live on another host; it gets its own client
        let users_http = reqwest::Client::builder()
            .timeout(config.sso.http_timeout)
            .build()?;
        let users = users::from_config(&config.users, users_http);

        let sessions = SessionIssuer::new(&config.session, settings.secure_cookies())
            .map_err(|e| Error::Config(e.to_string()))?;

        info!(
            domain = %settings.domain,
            redirect_uri = %settings.redirect_uri,
            environment = ?settings.environment,
            users = users.backend_name(),
            "SSO handshake configured"
        );

        let handshake = Handshake::new(
            settings,
            Arc::new(exchanger),
            Arc::new(verifier),
            Arc::clone(&users),
            Arc::new(sessions),
        );

        Ok(Self {
            handshake,
            discovery,
            users,
            request_timeout: config.server.request_timeout,
        })
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = state.request_timeout;

    Router::new()
        .route("/health", get(health_handler))
        .merge(sso_routes())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sso": {
            "configured": state.handshake.settings().client_id_is_valid(),
            "issuer": state.discovery.cached(),
        },
        "users": state.users.backend_name(),
    }))
}
