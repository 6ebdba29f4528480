//! Resolved SSO settings shared by every handshake component

use std::str::FromStr;

use jsonwebtoken::Algorithm;

use crate::config::{Config, Environment};
use crate::{Error, Result};

/// Shortest client id accepted before the start endpoint refuses to run.
pub const MIN_CLIENT_ID_LEN: usize = 8;

/// Path of the callback endpoint; joined onto the app URL to form `redirect_uri`.
pub const CALLBACK_PATH: &str = "/api/auth/deep-id/callback";

/// Provider endpoints and client registration, resolved once at startup.
#[derive(Clone)]
pub struct SsoSettings {
    /// Provider base URL with scheme and without trailing slash
    pub domain: String,
    /// Registered client id
    pub client_id: String,
    /// Registered client secret
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_uri: String,
    /// Scopes requested at start
    pub scopes: Vec<String>,
    /// Algorithms accepted on ID tokens
    pub algorithms: Vec<Algorithm>,
    /// Deployment environment
    pub environment: Environment,
}

impl std::fmt::Debug for SsoSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoSettings")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .field("algorithms", &self.algorithms)
            .field("environment", &self.environment)
            .finish()
    }
}

impl SsoSettings {
    /// Resolve settings from configuration.
    ///
    /// # Errors
    ///
    /// Fails when the app URL cannot be determined, when an ID token
    /// algorithm is unknown, or when `require_https` is set and the provider
    /// domain is plain HTTP.
    pub fn from_config(config: &Config) -> Result<Self> {
        let domain = normalize_domain(&config.sso.domain);
        if config.sso.require_https && !domain.starts_with("https://") {
            return Err(Error::Config(format!(
                "SSO domain must use https: {domain}"
            )));
        }

        let algorithms = config
            .sso
            .id_token_algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name.trim())
                    .map_err(|_| Error::Config(format!("Unknown ID token algorithm: {name}")))
            })
            .collect::<Result<Vec<_>>>()?;
        if algorithms.is_empty() {
            return Err(Error::Config(
                "sso.id_token_algorithms must not be empty".to_string(),
            ));
        }

        Ok(Self {
            domain,
            client_id: config.sso.client_id.trim().to_string(),
            client_secret: config.sso.client_secret.clone(),
            redirect_uri: format!("{}{CALLBACK_PATH}", config.app.base_url()?),
            scopes: config.sso.scopes.clone(),
            algorithms,
            environment: config.app.environment,
        })
    }

    /// Whether the client id is usable (present and not obviously truncated)
    #[must_use]
    pub fn client_id_is_valid(&self) -> bool {
        self.client_id.len() >= MIN_CLIENT_ID_LEN
    }

    /// Whether transient and session cookies carry `Secure`
    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.environment.secure_cookies()
    }

    /// Space-separated scope string
    #[must_use]
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }

    /// `{domain}/oauth2/auth`
    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/oauth2/auth", self.domain)
    }

    /// `{domain}/oauth2/token`
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.domain)
    }

    /// `{domain}/.well-known/jwks.json`
    #[must_use]
    pub fn jwks_uri(&self) -> String {
        format!("{}/.well-known/jwks.json", self.domain)
    }

    /// `{domain}/.well-known/openid-configuration`
    #[must_use]
    pub fn discovery_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.domain)
    }

    /// Issuers accepted when discovery is unavailable, each with and without
    /// a trailing slash.
    ///
    /// Preview and production accept only the `https` form of the domain.
    /// Development accepts the configured form first and the other scheme
    /// after it, so a local provider works behind or without TLS.
    #[must_use]
    pub fn fallback_issuers(&self) -> Vec<String> {
        let host = self
            .domain
            .strip_prefix("https://")
            .or_else(|| self.domain.strip_prefix("http://"))
            .unwrap_or(self.domain.as_str());
        let https = format!("https://{host}");

        let bases = match self.environment {
            Environment::Preview | Environment::Production => vec![https],
            Environment::Development => {
                let http = format!("http://{host}");
                if self.domain.starts_with("http://") {
                    vec![http, https]
                } else {
                    vec![https, http]
                }
            }
        };

        bases
            .into_iter()
            .flat_map(|base| {
                let slashed = format!("{base}/");
                [base, slashed]
            })
            .collect()
    }
}

/// Add `https://` when the domain has no scheme and drop trailing slashes.
#[must_use]
pub fn normalize_domain(domain: &str) -> String {
    let trimmed = domain.trim().trim_end_matches('/');
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}
