//! End-to-end SSO handshake tests
//!
//! Drives the full router with `oneshot` against a mocked provider:
//! - Start redirect and transient cookies
//! - Callback success, role routing and session cookie
//! - Provider errors, CSRF and account-linking failures
//! - Session endpoint, logout and health

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{Algorithm, EncodingKey, Header, get_current_timestamp};
use pretty_assertions::assert_eq;
use review_portal::{
    PortalUser,
    config::Config,
    server::{AppState, create_router},
};
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header_exists, method, path},
};

const CLIENT_ID: &str = "portal-client-0001";
const JWK_SECRET: &[u8] = b"secret-key-for-tests";
const KID: &str = "test-key";

const STATE_COOKIE: &str = "deep_auth_state";
const NONCE_COOKIE: &str = "deep_auth_nonce";
const VERIFIER_COOKIE: &str = "deep_auth_code_verifier";

struct Harness {
    provider: MockServer,
    app: Router,
}

fn users() -> Vec<PortalUser> {
    vec![
        PortalUser::new("u-7", "pat", "Pat Partner")
            .with_role("Partner")
            .with_external_id("did:deep:partner"),
        PortalUser::new("u-1", "ada", "Ada Admin")
            .with_role("admin")
            .with_external_id("did:deep:admin"),
    ]
}

fn config(provider: &MockServer, client_id: &str) -> Config {
    let mut config = Config::default();
    config.sso.domain = provider.uri();
    config.sso.client_id = client_id.to_string();
    config.sso.client_secret = "s3cret".to_string();
    config.sso.require_https = false;
    config.sso.id_token_algorithms = vec!["HS256".to_string()];
    config.session.jwt_secret = "integration-session-secret".to_string();
    config.users.seed = users();
    config
}

async fn harness_with_client_id(client_id: &str) -> Harness {
    let provider = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "issuer": provider.uri(),
            "authorization_endpoint": format!("{}/oauth2/auth", provider.uri()),
            "token_endpoint": format!("{}/oauth2/token", provider.uri()),
            "jwks_uri": format!("{}/.well-known/jwks.json", provider.uri()),
        })))
        .mount(&provider)
        .await;

    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keys": [{
                "kty": "oct",
                "kid": KID,
                "alg": "HS256",
                "k": "c2VjcmV0LWtleS1mb3ItdGVzdHM"
            }]
        })))
        .mount(&provider)
        .await;

    let state = AppState::from_config(&config(&provider, client_id)).unwrap();
    let app = create_router(Arc::new(state));
    Harness { provider, app }
}

async fn harness() -> Harness {
    harness_with_client_id(CLIENT_ID).await
}

fn id_token(issuer: &str, subject: &str, nonce: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KID.to_string());
    let now = get_current_timestamp();
    let claims = json!({
        "iss": issuer,
        "sub": subject,
        "aud": CLIENT_ID,
        "iat": now,
        "exp": now + 300,
        "nonce": nonce,
    });
    jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(JWK_SECRET)).unwrap()
}

async fn mount_token_response(provider: &MockServer, id_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-123",
            "id_token": id_token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(provider)
        .await;
}

async fn get(app: &Router, uri: &str, cookies: &[Cookie<'static>]) -> Response<Body> {
    let mut request = Request::builder().method("GET").uri(uri);
    if !cookies.is_empty() {
        let header_value = cookies
            .iter()
            .map(|c| format!("{}={}", c.name(), c.value()))
            .collect::<Vec<_>>()
            .join("; ");
        request = request.header(header::COOKIE, header_value);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect without Location")
        .to_str()
        .unwrap()
        .to_string()
}

fn set_cookies(response: &Response<Body>) -> Vec<Cookie<'static>> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| Cookie::parse(v.to_str().unwrap().to_string()).unwrap())
        .collect()
}

fn find<'a>(cookies: &'a [Cookie<'static>], name: &str) -> Option<&'a Cookie<'static>> {
    cookies.iter().find(|c| c.name() == name)
}

/// Query pairs of a relative or absolute redirect target
fn query(location: &str) -> Vec<(String, String)> {
    Url::parse("http://portal.test")
        .unwrap()
        .join(location)
        .unwrap()
        .query_pairs()
        .into_owned()
        .collect()
}

fn param(location: &str, key: &str) -> Option<String> {
    query(location)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
}

fn assert_handshake_cleared(cookies: &[Cookie<'static>]) {
    for name in [STATE_COOKIE, NONCE_COOKIE, VERIFIER_COOKIE] {
        let cookie = find(cookies, name).unwrap_or_else(|| panic!("{name} not cleared"));
        assert_eq!(cookie.value(), "", "{name} value");
        assert_eq!(cookie.max_age(), Some(time::Duration::ZERO), "{name} max-age");
    }
}

/// Start a login and return the handshake cookies it set
async fn start(app: &Router) -> Vec<Cookie<'static>> {
    let response = get(app, "/api/auth/deep-id/start", &[]).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    set_cookies(&response)
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn start_redirects_to_provider_with_pkce() {
    // GIVEN: a configured portal
    let h = harness().await;

    // WHEN: the browser hits the start endpoint
    let response = get(&h.app, "/api/auth/deep-id/start", &[]).await;

    // THEN: it is redirected to the provider's authorization endpoint
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = location(&response);
    assert!(location.starts_with(&format!("{}/oauth2/auth?", h.provider.uri())));

    assert_eq!(param(&location, "response_type").as_deref(), Some("code"));
    assert_eq!(param(&location, "client_id").as_deref(), Some(CLIENT_ID));
    assert_eq!(param(&location, "code_challenge_method").as_deref(), Some("S256"));
    assert_eq!(
        param(&location, "redirect_uri").as_deref(),
        Some("http://localhost:3000/api/auth/deep-id/callback")
    );
    assert_eq!(
        param(&location, "scope").as_deref(),
        Some("openid profile email offline_access")
    );

    // AND: the three transient cookies match the URL
    let cookies = set_cookies(&response);
    let state = find(&cookies, STATE_COOKIE).unwrap();
    let nonce = find(&cookies, NONCE_COOKIE).unwrap();
    let verifier = find(&cookies, VERIFIER_COOKIE).unwrap();

    assert_eq!(param(&location, "state").as_deref(), Some(state.value()));
    assert_eq!(param(&location, "nonce").as_deref(), Some(nonce.value()));
    assert_eq!(verifier.value().len(), 64);
    assert_ne!(
        param(&location, "code_challenge").as_deref(),
        Some(verifier.value())
    );

    for cookie in [state, nonce, verifier] {
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.max_age(), Some(time::Duration::seconds(600)));
        // Development: no Secure flag
        assert_ne!(cookie.secure(), Some(true));
    }
}

#[tokio::test]
async fn each_start_generates_fresh_values() {
    let h = harness().await;

    let first = start(&h.app).await;
    let second = start(&h.app).await;

    assert_ne!(
        find(&first, STATE_COOKIE).unwrap().value(),
        find(&second, STATE_COOKIE).unwrap().value()
    );
    assert_ne!(
        find(&first, NONCE_COOKIE).unwrap().value(),
        find(&second, NONCE_COOKIE).unwrap().value()
    );
}

#[tokio::test]
async fn short_client_id_refuses_to_start() {
    // GIVEN: a truncated client id
    let h = harness_with_client_id("short").await;

    // WHEN: starting a login
    let response = get(&h.app, "/api/auth/deep-id/start", &[]).await;

    // THEN: the browser lands on the login page and nothing is stored
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login?error=sso_not_configured");
    assert!(set_cookies(&response).is_empty());
}

#[tokio::test]
async fn partner_signs_in_and_lands_on_dashboard() {
    // GIVEN: a started handshake and a provider that will issue a matching ID token
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();
    let nonce = find(&handshake, NONCE_COOKIE).unwrap().value().to_string();
    let verifier = find(&handshake, VERIFIER_COOKIE).unwrap().value().to_string();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(body_string_contains(format!("code_verifier={verifier}")))
        .and(body_string_contains("code=auth-code-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-123",
            "id_token": id_token(&h.provider.uri(), "did:deep:partner", &nonce),
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&h.provider)
        .await;

    // WHEN: the provider redirects back with the code and state
    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=auth-code-1&state={state}"),
        &handshake,
    )
    .await;

    // THEN: the partner lands on their dashboard with a session cookie
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/partner-dashboard");

    let cookies = set_cookies(&response);
    assert_handshake_cleared(&cookies);

    let session = find(&cookies, "token").expect("session cookie");
    assert!(!session.value().is_empty());
    assert_eq!(session.http_only(), Some(true));
    assert_eq!(session.same_site(), Some(SameSite::Lax));
    assert_eq!(session.path(), Some("/"));
    assert_eq!(session.max_age(), Some(time::Duration::seconds(86_400)));

    // AND: the session resolves to the partner with a normalized role
    let me = get(&h.app, "/api/auth/me", &[session.clone()]).await;
    assert_eq!(me.status(), StatusCode::OK);
    let claims = json_body(me).await;
    assert_eq!(claims["userId"], "u-7");
    assert_eq!(claims["username"], "pat");
    assert_eq!(claims["name"], "Pat Partner");
    assert_eq!(claims["role"], "partner");
    assert_eq!(
        claims["exp"].as_u64().unwrap() - claims["iat"].as_u64().unwrap(),
        86_400
    );
}

#[tokio::test]
async fn admin_lands_on_root() {
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();
    let nonce = find(&handshake, NONCE_COOKIE).unwrap().value().to_string();

    mount_token_response(&h.provider, &id_token(&h.provider.uri(), "did:deep:admin", &nonce))
        .await;

    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=c&state={state}"),
        &handshake,
    )
    .await;

    assert_eq!(location(&response), "/");
    assert!(find(&set_cookies(&response), "token").is_some());
}

#[tokio::test]
async fn provider_error_is_forwarded_to_login() {
    // GIVEN: a started handshake
    let h = harness().await;
    let handshake = start(&h.app).await;

    // WHEN: the user cancels at the provider
    let response = get(
        &h.app,
        "/api/auth/deep-id/callback?error=access_denied&error_description=User%20cancelled",
        &handshake,
    )
    .await;

    // THEN: the provider's code is passed on and no session is created
    assert_eq!(location(&response), "/login?error=access_denied");
    let cookies = set_cookies(&response);
    assert_handshake_cleared(&cookies);
    assert!(find(&cookies, "token").is_none());
}

#[tokio::test]
async fn tampered_state_never_reaches_token_endpoint() {
    // GIVEN: a started handshake and a token endpoint that must stay idle
    let h = harness().await;
    let handshake = start(&h.app).await;

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&h.provider)
        .await;

    // WHEN: the callback carries a different state
    let response = get(
        &h.app,
        "/api/auth/deep-id/callback?code=c&state=forged",
        &handshake,
    )
    .await;

    // THEN: invalid_state, cookies cleared, no session
    assert_eq!(location(&response), "/login?error=invalid_state");
    let cookies = set_cookies(&response);
    assert_handshake_cleared(&cookies);
    assert!(find(&cookies, "token").is_none());
}

#[tokio::test]
async fn callback_without_cookies_is_invalid_state() {
    let h = harness().await;

    let response = get(&h.app, "/api/auth/deep-id/callback?code=c&state=s", &[]).await;

    assert_eq!(location(&response), "/login?error=invalid_state");
    assert_handshake_cleared(&set_cookies(&response));
}

#[tokio::test]
async fn missing_code_is_missing_params() {
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();

    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?state={state}"),
        &handshake,
    )
    .await;

    assert_eq!(location(&response), "/login?error=missing_params");
    assert_handshake_cleared(&set_cookies(&response));
}

#[tokio::test]
async fn missing_verifier_cookie_is_rejected() {
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();
    let without_verifier: Vec<_> = handshake
        .iter()
        .filter(|c| c.name() != VERIFIER_COOKIE)
        .cloned()
        .collect();

    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=c&state={state}"),
        &without_verifier,
    )
    .await;

    assert_eq!(location(&response), "/login?error=missing_verifier");
}

#[tokio::test]
async fn unlinked_account_gets_no_session() {
    // GIVEN: a valid identity with no portal account
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();
    let nonce = find(&handshake, NONCE_COOKIE).unwrap().value().to_string();

    mount_token_response(&h.provider, &id_token(&h.provider.uri(), "ghost-42", &nonce))
        .await;

    // WHEN: the callback completes
    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=c&state={state}"),
        &handshake,
    )
    .await;

    // THEN: account_not_linked with the subject, and no session cookie
    let location = location(&response);
    assert_eq!(param(&location, "error").as_deref(), Some("account_not_linked"));
    assert_eq!(param(&location, "details").as_deref(), Some("did:ghost-42"));

    let cookies = set_cookies(&response);
    assert_handshake_cleared(&cookies);
    assert!(find(&cookies, "token").is_none());
}

#[tokio::test]
async fn nonce_mismatch_is_sso_failed() {
    // GIVEN: an ID token minted for another login attempt
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();

    mount_token_response(
        &h.provider,
        &id_token(&h.provider.uri(), "did:deep:partner", "someone-elses-nonce"),
    )
    .await;

    // WHEN
    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=c&state={state}"),
        &handshake,
    )
    .await;

    // THEN
    assert_eq!(location(&response), "/login?error=sso_failed");
    assert!(find(&set_cookies(&response), "token").is_none());
}

#[tokio::test]
async fn token_endpoint_failure_carries_details() {
    // GIVEN: the provider rejects the code
    let h = harness().await;
    let handshake = start(&h.app).await;
    let state = find(&handshake, STATE_COOKIE).unwrap().value().to_string();

    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})),
        )
        .expect(1)
        .mount(&h.provider)
        .await;

    // WHEN
    let response = get(
        &h.app,
        &format!("/api/auth/deep-id/callback?code=stale&state={state}"),
        &handshake,
    )
    .await;

    // THEN: sso_failed with the provider's answer in details
    let location = location(&response);
    assert_eq!(param(&location, "error").as_deref(), Some("sso_failed"));
    assert!(param(&location, "details").unwrap().contains("invalid_grant"));
    assert_handshake_cleared(&set_cookies(&response));
}

#[tokio::test]
async fn me_requires_a_valid_session() {
    let h = harness().await;

    let anonymous = get(&h.app, "/api/auth/me", &[]).await;
    assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

    let forged = get(&h.app, "/api/auth/me", &[Cookie::new("token", "not-a-jwt")]).await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_expires_session_cookie() {
    let h = harness().await;

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/auth/logout")
                .header(header::COOKIE, "token=whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let cookies = set_cookies(&response);
    let token = find(&cookies, "token").unwrap();
    assert_eq!(token.value(), "");
    assert_eq!(token.max_age(), Some(time::Duration::ZERO));
}

#[tokio::test]
async fn health_reports_version_and_backend() {
    let h = harness().await;

    let response = get(&h.app, "/health", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["users"], "cached");
    assert_eq!(body["sso"]["configured"], true);
}
