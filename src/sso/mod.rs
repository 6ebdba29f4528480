//! Deep ID single sign-on.
//!
//! A PKCE authorization-code flow against the Deep ID provider, ending in a
//! signed portal session:
//!
//! - [`pkce`]: random tokens and the S256 challenge
//! - [`discovery`]: issuer discovery and the JWKS cache
//! - [`client`]: code-for-tokens exchange
//! - [`verifier`]: ID token signature, issuer, audience and nonce checks
//! - [`session`]: portal session tokens and cookies
//! - [`cookies`]: transient handshake state
//! - [`handshake`]: the start/callback state machine
//! - [`routes`]: axum handlers

pub mod audit;
pub mod client;
pub mod cookies;
pub mod discovery;
pub mod handshake;
pub mod pkce;
pub mod routes;
pub mod session;
pub mod settings;
pub mod verifier;

use subtle::ConstantTimeEq;

use crate::Result;
use crate::config::SsoConfig;

pub use client::{DeepIdClient, TokenExchangeError, TokenExchanger, TokenResponse};
pub use cookies::{HandshakeState, StoredHandshake};
pub use discovery::{IssuerDiscovery, JwksCache, RemoteKeySet};
pub use handshake::{CallbackParams, Handshake, HandshakeError, ProtocolViolation};
pub use session::{SessionClaims, SessionIssuer};
pub use settings::SsoSettings;
pub use verifier::{IdTokenVerifier, IdentityClaims, IdentityVerifier, KeyResolver, VerifyError};

/// Constant-time string equality. Length differences return early.
pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// HTTP client for provider calls, pooled and shared by every component.
pub fn provider_http_client(config: &SsoConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(config.http_timeout)
        .https_only(config.require_https)
        .user_agent(concat!("review-portal/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
