//! Portal session tokens: HS256 JWTs delivered in the `token` cookie

use std::time::Duration;

use axum_extra::extract::cookie::{Cookie, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, get_current_timestamp};
use portal_core::{PortalUser, Role};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Session token failures
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No signing secret configured
    #[error("session signing secret is empty")]
    MissingSecret,

    /// Token could not be signed
    #[error("failed to sign session: {0}")]
    Sign(jsonwebtoken::errors::Error),

    /// Token is invalid or expired
    #[error("invalid session: {0}")]
    Invalid(jsonwebtoken::errors::Error),
}

/// Claims embedded in a portal session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    /// Internal user id
    pub user_id: String,
    /// Username
    pub username: String,
    /// Display name
    pub name: String,
    /// Normalized role
    pub role: Role,
    /// Issued at (Unix seconds)
    pub iat: u64,
    /// Expiry (Unix seconds)
    pub exp: u64,
}

/// A freshly signed session
#[derive(Clone)]
pub struct IssuedSession {
    /// Signed JWT
    pub token: String,
    /// Claims inside `token`
    pub claims: SessionClaims,
}

impl std::fmt::Debug for IssuedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedSession")
            .field("token", &"<redacted>")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Signs and verifies portal sessions
pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
    cookie_name: String,
    secure: bool,
}

impl SessionIssuer {
    /// Create an issuer signing with `config.jwt_secret`.
    ///
    /// # Errors
    ///
    /// [`SessionError::MissingSecret`] when the secret is empty or blank.
    pub fn new(config: &SessionConfig, secure: bool) -> Result<Self, SessionError> {
        if config.jwt_secret.trim().is_empty() {
            return Err(SessionError::MissingSecret);
        }
        let secret = config.jwt_secret.as_bytes();
        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl: config.ttl,
            cookie_name: config.cookie_name.clone(),
            secure,
        })
    }

    /// Name of the session cookie
    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Sign a session for `user` with its role normalized
    pub fn issue(&self, user: &PortalUser) -> Result<IssuedSession, SessionError> {
        let iat = get_current_timestamp();
        let claims = SessionClaims {
            user_id: user.id.clone(),
            username: user.username.clone(),
            name: user.name.clone(),
            role: user.role(),
            iat,
            exp: iat + self.ttl.as_secs(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(SessionError::Sign)?;

        Ok(IssuedSession { token, claims })
    }

    /// Verify a session token and return its claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(SessionError::Invalid)
    }

    /// `token` cookie carrying `session`
    #[must_use]
    pub fn cookie(&self, session: &IssuedSession) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), session.token.clone()))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(time::Duration::seconds(
                i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
            ))
            .build()
    }

    /// Expired `token` cookie used by logout
    #[must_use]
    pub fn removal_cookie(&self) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), ""))
            .path("/")
            .max_age(time::Duration::ZERO)
            .build()
    }
}
