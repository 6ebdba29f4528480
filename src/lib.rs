//! Review Portal authentication gateway
//!
//! The front door of the review portal: Deep ID single sign-on ending in a
//! signed portal session.
//!
//! # Features
//!
//! - **PKCE authorization code flow**: state, nonce and S256 verifier kept in short-lived cookies
//! - **ID token verification**: issuer discovery, cached JWKS with key-rotation refresh
//! - **Role routing**: accounts land on the dashboard for their normalized role
//! - **Pluggable user store**: in-memory or PostgREST, behind a TTL cache
//! - **Audit trail**: every handshake step logged as a structured `sso.*` event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod sso;
pub mod users;

pub use error::{Error, Result};
pub use portal_core::{PortalUser, Role, normalize_role};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
