//! OIDC issuer discovery and the JWKS key-set cache.
//!
//! Both caches are process-wide and read-mostly:
//!
//! - The issuer is fetched from `/.well-known/openid-configuration` on first
//!   use and kept for the life of the process. A failed fetch is not cached;
//!   callers get the fallback issuer set and the next request retries.
//! - JWK sets are cached per JWKS URI for a TTL (default 1 hour). An unknown
//!   `kid` forces one refresh before failing, which picks up key rotation.
//!
//! Concurrent first-populate races only cost a duplicate fetch; the last
//! writer wins and every writer stores equivalent metadata.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{Jwk, JwkSet},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::settings::SsoSettings;
use super::verifier::{KeyResolver, VerifyError};

/// Errors fetching provider metadata or keys
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// Transport failure or undecodable body
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Provider answered with a non-2xx status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// URL fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Discovery document has no `issuer`
    #[error("discovery document has no issuer")]
    MissingIssuer,
}

/// Subset of the OpenID provider metadata document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    #[serde(default)]
    pub issuer: String,
    /// Authorization endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// JWKS URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    /// Signing algorithms the provider may use for ID tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// GET `url` and decode a JSON body, mapping non-2xx to [`DiscoveryError::Status`].
async fn fetch_json<T: DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T, DiscoveryError> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(DiscoveryError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response.json().await?)
}

/// Lazily discovered issuer with a fallback set
pub struct IssuerDiscovery {
    http: reqwest::Client,
    discovery_url: String,
    fallback: Vec<String>,
    issuer: OnceCell<String>,
}

impl IssuerDiscovery {
    /// Create an undiscovered instance for the configured provider
    #[must_use]
    pub fn new(http: reqwest::Client, settings: &SsoSettings) -> Self {
        Self {
            http,
            discovery_url: settings.discovery_url(),
            fallback: settings.fallback_issuers(),
            issuer: OnceCell::new(),
        }
    }

    /// Create an instance whose issuer is already known. No request is ever made.
    #[must_use]
    pub fn with_issuer(http: reqwest::Client, settings: &SsoSettings, issuer: String) -> Self {
        Self {
            http,
            discovery_url: settings.discovery_url(),
            fallback: settings.fallback_issuers(),
            issuer: OnceCell::new_with(Some(issuer)),
        }
    }

    /// Fetch the full discovery document (uncached)
    pub async fn fetch_metadata(&self) -> Result<ProviderMetadata, DiscoveryError> {
        fetch_json(&self.http, &self.discovery_url).await
    }

    /// The discovered issuer, fetching it on first call.
    ///
    /// Only success is cached.
    pub async fn discover(&self) -> Result<&str, DiscoveryError> {
        self.issuer
            .get_or_try_init(|| async {
                let metadata = self.fetch_metadata().await?;
                if metadata.issuer.trim().is_empty() {
                    return Err(DiscoveryError::MissingIssuer);
                }
                info!(issuer = %metadata.issuer, "Discovered OIDC issuer");
                Ok(metadata.issuer)
            })
            .await
            .map(String::as_str)
    }

    /// Issuers to accept on an ID token: the discovered one, or the fallback set.
    pub async fn accepted_issuers(&self) -> Vec<String> {
        match self.discover().await {
            Ok(issuer) => vec![issuer.to_string()],
            Err(e) => {
                warn!(
                    error = %e,
                    url = %self.discovery_url,
                    "OIDC discovery failed, using fallback issuers"
                );
                self.fallback.clone()
            }
        }
    }

    /// Issuer if discovery has already succeeded
    #[must_use]
    pub fn cached(&self) -> Option<&str> {
        self.issuer.get().map(String::as_str)
    }
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

/// JWKS cache, one entry per JWKS URI
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Cached key set for `jwks_uri`, fetched when missing, stale, or forced.
    pub async fn get_or_fetch(
        &self,
        jwks_uri: &str,
        force_refresh: bool,
    ) -> Result<JwkSet, DiscoveryError> {
        if !force_refresh {
            if let Some(cached) = self.inner.get(jwks_uri) {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!(jwks_uri = %jwks_uri, force_refresh, "Fetching JWKS");
        let keys: JwkSet = fetch_json(&self.http, jwks_uri).await?;

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }

    /// Number of cached key sets
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing has been fetched yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Key resolver backed by the provider's JWKS endpoint
pub struct RemoteKeySet {
    cache: std::sync::Arc<JwksCache>,
    jwks_uri: String,
}

impl RemoteKeySet {
    /// Resolve keys from `jwks_uri` through `cache`
    #[must_use]
    pub fn new(cache: std::sync::Arc<JwksCache>, jwks_uri: String) -> Self {
        Self { cache, jwks_uri }
    }
}

fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, VerifyError> {
    DecodingKey::from_jwk(jwk).map_err(|e| VerifyError::Malformed(format!("unusable JWK: {e}")))
}

/// Key for `kid`, or the only key of the set when the token names none
fn select_key<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Option<&'a Jwk> {
    match kid {
        Some(kid) => jwks.find(kid),
        None => match jwks.keys.as_slice() {
            [only] => Some(only),
            _ => None,
        },
    }
}

#[async_trait]
impl KeyResolver for RemoteKeySet {
    async fn resolve(&self, kid: Option<&str>) -> Result<DecodingKey, VerifyError> {
        let jwks = self.cache.get_or_fetch(&self.jwks_uri, false).await?;
        if let Some(jwk) = select_key(&jwks, kid) {
            return decoding_key(jwk);
        }

        // No usable key: refresh once in case the provider rotated keys
        debug!(kid = kid.unwrap_or_default(), "No matching key in cached JWKS, refreshing");
        let jwks = self.cache.get_or_fetch(&self.jwks_uri, true).await?;
        match (select_key(&jwks, kid), kid) {
            (Some(jwk), _) => decoding_key(jwk),
            (None, Some(kid)) => Err(VerifyError::UnknownKeyId(kid.to_string())),
            (None, None) => Err(VerifyError::MissingKeyId),
        }
    }
}
