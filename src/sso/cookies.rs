//! Transient handshake state carried in cookies between start and callback

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use super::pkce::{TOKEN_BYTES, generate_code_challenge, generate_random_string};

/// CSRF state cookie
pub const STATE_COOKIE: &str = "deep_auth_state";
/// ID token nonce cookie
pub const NONCE_COOKIE: &str = "deep_auth_nonce";
/// PKCE code verifier cookie
pub const VERIFIER_COOKIE: &str = "deep_auth_code_verifier";

/// Lifetime of the transient cookies in seconds
pub const HANDSHAKE_MAX_AGE_SECS: i64 = 600;

const ALL_COOKIES: [&str; 3] = [STATE_COOKIE, NONCE_COOKIE, VERIFIER_COOKIE];

/// One login attempt's secrets, created at start
#[derive(Clone, PartialEq, Eq)]
pub struct HandshakeState {
    /// CSRF token echoed back by the provider
    pub state: String,
    /// Binds the ID token to this attempt
    pub nonce: String,
    /// PKCE secret
    pub code_verifier: String,
}

impl std::fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeState").finish_non_exhaustive()
    }
}

impl HandshakeState {
    /// Fresh random state, nonce and verifier
    #[must_use]
    pub fn generate() -> Self {
        Self {
            state: generate_random_string(TOKEN_BYTES),
            nonce: generate_random_string(TOKEN_BYTES),
            code_verifier: generate_random_string(TOKEN_BYTES),
        }
    }

    /// S256 challenge for the verifier
    #[must_use]
    pub fn code_challenge(&self) -> String {
        generate_code_challenge(&self.code_verifier)
    }

    /// Write the three cookies, replacing any earlier attempt's
    #[must_use]
    pub fn store(self, jar: CookieJar, secure: bool) -> CookieJar {
        jar.add(transient_cookie(STATE_COOKIE, self.state, secure))
            .add(transient_cookie(NONCE_COOKIE, self.nonce, secure))
            .add(transient_cookie(VERIFIER_COOKIE, self.code_verifier, secure))
    }

    /// Expire all three cookies.
    ///
    /// Emits removal cookies even when the browser sent none, so every
    /// callback response carries the same cleanup.
    #[must_use]
    pub fn clear(jar: CookieJar) -> CookieJar {
        ALL_COOKIES.into_iter().fold(jar, |jar, name| {
            jar.add(
                Cookie::build((name, ""))
                    .path("/")
                    .max_age(Duration::ZERO)
                    .build(),
            )
        })
    }
}

fn transient_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(Duration::seconds(HANDSHAKE_MAX_AGE_SECS))
        .build()
}

/// Handshake cookies as read back at callback; any may be missing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredHandshake {
    /// `deep_auth_state`
    pub state: Option<String>,
    /// `deep_auth_nonce`
    pub nonce: Option<String>,
    /// `deep_auth_code_verifier`
    pub code_verifier: Option<String>,
}

impl StoredHandshake {
    /// Read the cookies; empty values count as missing
    #[must_use]
    pub fn from_jar(jar: &CookieJar) -> Self {
        let read = |name: &str| {
            jar.get(name)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            state: read(STATE_COOKIE),
            nonce: read(NONCE_COOKIE),
            code_verifier: read(VERIFIER_COOKIE),
        }
    }
}

impl From<HandshakeState> for StoredHandshake {
    fn from(state: HandshakeState) -> Self {
        Self {
            state: Some(state.state),
            nonce: Some(state.nonce),
            code_verifier: Some(state.code_verifier),
        }
    }
}
