//! HTTP handlers for the SSO endpoints

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, State, rejection::QueryRejection},
    http::{StatusCode, request::Parts},
    response::Redirect,
    routing::get,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Value, json};
use tracing::debug;

use super::audit::{self, AuditEvent};
use super::cookies::{HandshakeState, StoredHandshake};
use super::handshake::{CallbackParams, LOGIN_PATH};
use super::session::SessionClaims;
use super::settings::CALLBACK_PATH;
use crate::server::AppState;

/// Start endpoint path
pub const START_PATH: &str = "/api/auth/deep-id/start";
/// Logout endpoint path
pub const LOGOUT_PATH: &str = "/api/auth/logout";
/// Current-session endpoint path
pub const ME_PATH: &str = "/api/auth/me";

/// SSO routes, to be merged into the application router
pub fn sso_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(START_PATH, get(start))
        .route(CALLBACK_PATH, get(callback))
        .route(LOGOUT_PATH, get(logout).post(logout))
        .route(ME_PATH, get(me))
}

/// GET /api/auth/deep-id/start
///
/// Stores fresh handshake cookies and redirects to the provider. A bad
/// client id redirects to the login page without touching cookies.
async fn start(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    match state.handshake.start() {
        Ok(outcome) => {
            audit::emit(&AuditEvent::started());
            let secure = state.handshake.settings().secure_cookies();
            let jar = outcome.handshake.store(jar, secure);
            (jar, Redirect::to(&outcome.authorization_url))
        }
        Err(err) => {
            audit::emit(&AuditEvent::failed(&err));
            (jar, Redirect::to(&err.login_redirect()))
        }
    }
}

/// GET /api/auth/deep-id/callback
///
/// The transient cookies are cleared on every outcome.
async fn callback(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    jar: CookieJar,
) -> (CookieJar, Redirect) {
    // An unparseable query is treated like one without code/state
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let stored = StoredHandshake::from_jar(&jar);

    let result = state.handshake.callback(&params, &stored).await;
    let jar = HandshakeState::clear(jar);

    match result {
        Ok(outcome) => {
            audit::emit(&AuditEvent::session_issued(&outcome));
            let cookie = state.handshake.sessions().cookie(&outcome.session);
            (jar.add(cookie), Redirect::to(outcome.redirect_to))
        }
        Err(err) => {
            audit::emit(&AuditEvent::failed(&err));
            (jar, Redirect::to(&err.login_redirect()))
        }
    }
}

/// GET|POST /api/auth/logout
async fn logout(State(state): State<Arc<AppState>>, jar: CookieJar) -> (CookieJar, Redirect) {
    let sessions = state.handshake.sessions();
    let user_id = jar
        .get(sessions.cookie_name())
        .and_then(|c| sessions.verify(c.value()).ok())
        .map(|claims| claims.user_id);

    audit::emit(&AuditEvent::logged_out(user_id));
    (jar.add(sessions.removal_cookie()), Redirect::to(LOGIN_PATH))
}

/// GET /api/auth/me
async fn me(PortalSession(claims): PortalSession) -> Json<SessionClaims> {
    Json(claims)
}

/// Claims of a valid portal session; rejects with 401 otherwise.
#[derive(Debug, Clone)]
pub struct PortalSession(pub SessionClaims);

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "unauthenticated"})),
    )
}

impl FromRequestParts<Arc<AppState>> for PortalSession {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let sessions = state.handshake.sessions();

        let cookie = jar.get(sessions.cookie_name()).ok_or_else(unauthorized)?;
        sessions.verify(cookie.value()).map(Self).map_err(|e| {
            debug!(error = %e, "Rejected session cookie");
            unauthorized()
        })
    }
}
