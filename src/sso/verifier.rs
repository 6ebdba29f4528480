//! ID token verification.
//!
//! # Verification flow
//!
//! 1. Decode the header (unverified) and require an accepted algorithm.
//! 2. Resolve the decoding key through a [`KeyResolver`]: by `kid`, or the
//!    only key of the set when the header names none.
//! 3. Verify signature, `exp`, `iss` (discovered issuer or fallback set) and
//!    `aud` (client id) with a 60 second leeway.
//! 4. Compare the `nonce` claim to the nonce stored at start, in constant time.
//!
//! Raw token material never appears in errors or logs.

use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::constant_time_eq;
use super::discovery::{DiscoveryError, IssuerDiscovery};

/// Algorithms accepted on ID tokens unless overridden
pub const DEFAULT_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Clock skew tolerated on `exp`, in seconds
const LEEWAY_SECS: u64 = 60;

/// Why an ID token was rejected
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Signature does not verify against the resolved key
    #[error("signature verification failed")]
    Signature,

    /// `exp` is in the past (beyond leeway)
    #[error("token expired")]
    Expired,

    /// `iss` is not an accepted issuer
    #[error("issuer not accepted")]
    IssuerMismatch,

    /// `aud` does not contain the client id
    #[error("audience does not match client id")]
    AudienceMismatch,

    /// `nonce` differs from the nonce stored at start
    #[error("nonce does not match")]
    InvalidNonce,

    /// Header has no `kid` and the key set does not hold exactly one key
    #[error("token header has no key id and the key set is ambiguous")]
    MissingKeyId,

    /// `kid` not found even after refreshing the key set
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),

    /// Header algorithm is not accepted
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Token could not be decoded
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Key set could not be fetched
    #[error("key set unavailable: {0}")]
    KeySet(#[from] DiscoveryError),

    /// Token response carried no `id_token`
    #[error("token response has no id_token")]
    MissingIdToken,

    /// Nonce cookie absent at callback
    #[error("no nonce stored for this login attempt")]
    MissingNonce,
}

impl VerifyError {
    /// Stable tag used in logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Signature => "signature_invalid",
            Self::Expired => "token_expired",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::AudienceMismatch => "audience_mismatch",
            Self::InvalidNonce => "invalid_nonce",
            Self::MissingKeyId => "missing_key_id",
            Self::UnknownKeyId(_) => "unknown_key_id",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::Malformed(_) => "malformed_token",
            Self::KeySet(_) => "key_set_unavailable",
            Self::MissingIdToken => "missing_id_token",
            Self::MissingNonce => "missing_nonce",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(e: jsonwebtoken::errors::Error) -> Self {
        match e.kind() {
            ErrorKind::InvalidSignature => Self::Signature,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::InvalidAlgorithm => {
                Self::UnsupportedAlgorithm("algorithm does not fit key".to_string())
            }
            _ => Self::Malformed(e.to_string()),
        }
    }
}

/// Verified identity; absent string claims are empty, never missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityClaims {
    /// `sub`: the external identifier a portal user is linked by
    pub subject: String,
    /// `nonce`
    pub nonce: String,
    /// `iss`
    pub issuer: String,
    /// `aud`, normalized to a list
    pub audience: Vec<String>,
    /// `exp` (Unix seconds)
    pub expires_at: u64,
    /// `email`
    pub email: String,
    /// `name`
    pub name: String,
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    nonce: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: serde_json::Value,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<RawClaims> for IdentityClaims {
    fn from(raw: RawClaims) -> Self {
        let audience = match raw.aud {
            serde_json::Value::String(s) => vec![s],
            serde_json::Value::Array(items) => items
                .into_iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        };

        Self {
            subject: raw.sub.unwrap_or_default(),
            nonce: raw.nonce.unwrap_or_default(),
            issuer: raw.iss.unwrap_or_default(),
            audience,
            expires_at: raw.exp.unwrap_or_default(),
            email: raw.email.unwrap_or_default(),
            name: raw.name.unwrap_or_default(),
        }
    }
}

/// Source of signature verification keys
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Decoding key for `kid`; `None` when the token header names no key
    async fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError>;
}

/// Verifies an ID token against an expected nonce
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verify `id_token` and return its claims
    async fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, VerifyError>;
}

/// ID token verifier bound to one client id and provider
pub struct IdTokenVerifier {
    client_id: String,
    issuers: Arc<IssuerDiscovery>,
    keys: Arc<dyn KeyResolver>,
    algorithms: Vec<Algorithm>,
}

impl IdTokenVerifier {
    /// Create a verifier accepting [`DEFAULT_ALGORITHMS`]
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        issuers: Arc<IssuerDiscovery>,
        keys: Arc<dyn KeyResolver>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            issuers,
            keys,
            algorithms: DEFAULT_ALGORITHMS.to_vec(),
        }
    }

    /// Replace the accepted algorithm set
    #[must_use]
    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = algorithms;
        self
    }
}

#[async_trait]
impl IdentityVerifier for IdTokenVerifier {
    async fn verify_id_token(
        &self,
        id_token: &str,
        expected_nonce: &str,
    ) -> Result<IdentityClaims, VerifyError> {
        let header = jsonwebtoken::decode_header(id_token)?;
        if !self.algorithms.contains(&header.alg) {
            return Err(VerifyError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let kid = header.kid.as_deref().filter(|k| !k.is_empty());
        let key = self.keys.resolve(kid).await?;

        let issuers = self.issuers.accepted_issuers().await;
        let mut validation = Validation::new(header.alg);
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(issuers.as_slice());
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = jsonwebtoken::decode::<RawClaims>(id_token, &key, &validation)?;
        let claims = IdentityClaims::from(data.claims);

        if !constant_time_eq(&claims.nonce, expected_nonce) {
            return Err(VerifyError::InvalidNonce);
        }

        Ok(claims)
    }
}
