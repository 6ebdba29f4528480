//! Configuration management
//!
//! Layers, lowest to highest precedence:
//!
//! 1. built-in defaults
//! 2. optional YAML file
//! 3. `PORTAL_`-prefixed environment variables (`__` separates sections)
//! 4. the deployment variables shared with the rest of the portal
//!    (`DEEP_SSO_*`, `JWT_SECRET`, `APP_URL`, `LOCAL_APP_URL`, `NODE_ENV`, `VERCEL_ENV`)

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use portal_core::PortalUser;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder written over secrets in [`Config::redacted`].
const REDACTED: &str = "<redacted>";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the deployment variables are read.
    /// Paths support ~ expansion. Loaded in order; existing variables win.
    pub env_files: Vec<String>,
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Deployment environment and public URLs
    pub app: AppConfig,
    /// Deep ID single sign-on
    pub sso: SsoConfig,
    /// Portal session signing
    pub session: SessionConfig,
    /// User store
    pub users: UsersConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development: plain-HTTP cookies, `LOCAL_APP_URL`
    #[default]
    Development,
    /// Preview deployment
    Preview,
    /// Production deployment
    Production,
}

impl Environment {
    /// Derive the environment from `NODE_ENV` / `VERCEL_ENV`.
    ///
    /// `VERCEL_ENV` wins when set; otherwise `NODE_ENV=production` means
    /// production and anything else is development.
    #[must_use]
    pub fn detect(node_env: Option<&str>, vercel_env: Option<&str>) -> Self {
        match vercel_env.map(str::trim) {
            Some("production") => return Self::Production,
            Some("preview") => return Self::Preview,
            Some("development") => return Self::Development,
            _ => {}
        }
        match node_env.map(str::trim) {
            Some("production") => Self::Production,
            _ => Self::Development,
        }
    }

    /// Whether cookies carry the `Secure` attribute.
    #[must_use]
    pub fn secure_cookies(self) -> bool {
        self != Self::Development
    }
}

/// Deployment environment and public URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Public URL of the deployed portal (`APP_URL`)
    pub url: Option<String>,
    /// Public URL used during local development (`LOCAL_APP_URL`)
    pub local_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            url: None,
            local_url: "http://localhost:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Public base URL for the current environment, without trailing slash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] outside development when `url` is unset.
    pub fn base_url(&self) -> Result<String> {
        let url = match self.environment {
            Environment::Development => self.local_url.as_str(),
            Environment::Preview | Environment::Production => self
                .url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    Error::Config("APP_URL is required outside development".to_string())
                })?,
        };
        Ok(url.trim().trim_end_matches('/').to_string())
    }
}

/// Deep ID single sign-on configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Identity provider domain (`DEEP_SSO_DOMAIN`), with or without scheme
    pub domain: String,
    /// Registered client id (`DEEP_SSO_CLIENT_ID`)
    pub client_id: String,
    /// Registered client secret (`DEEP_SSO_CLIENT_SECRET`)
    pub client_secret: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Timeout for every call to the provider
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// How long a fetched JWKS is trusted before refetching
    #[serde(with = "humantime_serde")]
    pub jwks_ttl: Duration,
    /// Refuse plain-HTTP provider endpoints
    pub require_https: bool,
    /// JWS algorithms accepted on ID tokens
    pub id_token_algorithms: Vec<String>,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: ["openid", "profile", "email", "offline_access"]
                .into_iter()
                .map(String::from)
                .collect(),
            http_timeout: Duration::from_secs(10),
            jwks_ttl: Duration::from_secs(3600),
            require_https: true,
            id_token_algorithms: ["RS256", "RS384", "RS512", "PS256", "ES256", "ES384"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl std::fmt::Debug for SsoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsoConfig")
            .field("domain", &self.domain)
            .field("client_id", &self.client_id)
            .field("client_secret", &REDACTED)
            .field("scopes", &self.scopes)
            .field("http_timeout", &self.http_timeout)
            .field("jwks_ttl", &self.jwks_ttl)
            .field("require_https", &self.require_https)
            .field("id_token_algorithms", &self.id_token_algorithms)
            .finish()
    }
}

/// Portal session configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HS256 signing secret (`JWT_SECRET`)
    pub jwt_secret: String,
    /// Session lifetime
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Session cookie name
    pub cookie_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            ttl: Duration::from_secs(24 * 60 * 60),
            cookie_name: "token".to_string(),
        }
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("jwt_secret", &REDACTED)
            .field("ttl", &self.ttl)
            .field("cookie_name", &self.cookie_name)
            .finish()
    }
}

/// User store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserBackend {
    /// Users listed under `users.seed`
    #[default]
    Memory,
    /// `PostgREST` endpoint (Supabase)
    Postgrest,
}

/// User store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UsersConfig {
    /// Which backend to query
    pub backend: UserBackend,
    /// How long a found user is cached (zero disables caching)
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Seed users for the memory backend
    pub seed: Vec<PortalUser>,
    /// `PostgREST` backend settings
    pub postgrest: PostgrestConfig,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            backend: UserBackend::Memory,
            cache_ttl: Duration::from_secs(60),
            seed: Vec::new(),
            postgrest: PostgrestConfig::default(),
        }
    }
}

/// `PostgREST` user table settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgrestConfig {
    /// Project URL (the `/rest/v1` suffix is added)
    pub url: String,
    /// Service API key; supports `${VAR}` expansion
    pub api_key: String,
    /// Table holding portal users
    pub table: String,
    /// Column holding the linked external subject
    pub external_id_column: String,
}

impl Default for PostgrestConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            table: "users".to_string(),
            external_id_column: "deep_id".to_string(),
        }
    }
}

impl std::fmt::Debug for PostgrestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgrestConfig")
            .field("url", &self.url)
            .field("api_key", &REDACTED)
            .field("table", &self.table)
            .field("external_id_column", &self.external_id_column)
            .finish()
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PORTAL_ prefix)
        figment = figment.merge(Env::prefixed("PORTAL_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files first so the deployment variables below can come from them
        config.load_env_files();
        config.apply_deployment_env(|key| env::var(key).ok());

        // Expand ${VAR} in user store settings
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Apply the deployment variables shared with the rest of the portal.
    ///
    /// Values are taken verbatim (no type coercion), so numeric client ids
    /// and secrets survive intact. Unset or empty variables leave the
    /// current value alone.
    pub fn apply_deployment_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEEP_SSO_DOMAIN") {
            self.sso.domain = v;
        }
        if let Some(v) = get("DEEP_SSO_CLIENT_ID") {
            self.sso.client_id = v;
        }
        if let Some(v) = get("DEEP_SSO_CLIENT_SECRET") {
            self.sso.client_secret = v;
        }
        if let Some(v) = get("JWT_SECRET") {
            self.session.jwt_secret = v;
        }
        if let Some(v) = get("APP_URL") {
            self.app.url = Some(v);
        }
        if let Some(v) = get("LOCAL_APP_URL") {
            self.app.local_url = v;
        }

        let node_env = get("NODE_ENV");
        let vercel_env = get("VERCEL_ENV");
        if node_env.is_some() || vercel_env.is_some() {
            self.app.environment =
                Environment::detect(node_env.as_deref(), vercel_env.as_deref());
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("static pattern is valid");

        self.users.postgrest.url = Self::expand_string(&re, &self.users.postgrest.url);
        self.users.postgrest.api_key = Self::expand_string(&re, &self.users.postgrest.api_key);
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check the settings the service cannot run without.
    ///
    /// A missing or short SSO client id is deliberately *not* rejected here:
    /// the start endpoint reports it to the browser instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.session.jwt_secret.trim().is_empty() {
            return Err(Error::Config(
                "JWT_SECRET is required; refusing to sign sessions with a default key"
                    .to_string(),
            ));
        }
        if self.sso.domain.trim().is_empty() {
            return Err(Error::Config("DEEP_SSO_DOMAIN is required".to_string()));
        }
        if self.session.ttl.is_zero() {
            return Err(Error::Config("session.ttl must be positive".to_string()));
        }
        self.app.base_url()?;
        if self.users.backend == UserBackend::Postgrest && self.users.postgrest.url.is_empty() {
            return Err(Error::Config(
                "users.postgrest.url is required for the postgrest backend".to_string(),
            ));
        }
        Ok(())
    }

    /// A copy with every secret replaced, safe to print.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.sso.client_secret,
            &mut copy.session.jwt_secret,
            &mut copy.users.postgrest.api_key,
        ] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.apply_deployment_env(lookup(&[
            ("DEEP_SSO_DOMAIN", "id.deep.example"),
            ("DEEP_SSO_CLIENT_ID", "portal-client-0001"),
            ("DEEP_SSO_CLIENT_SECRET", "s3cret"),
            ("JWT_SECRET", "signing-secret"),
        ]));
        config
    }

    #[test]
    fn deployment_env_populates_sso_and_session() {
        // GIVEN/WHEN: the portal's deployment variables
        let config = valid_config();

        // THEN: they land in the matching sections verbatim
        assert_eq!(config.sso.domain, "id.deep.example");
        assert_eq!(config.sso.client_id, "portal-client-0001");
        assert_eq!(config.sso.client_secret, "s3cret");
        assert_eq!(config.session.jwt_secret, "signing-secret");
    }

    #[test]
    fn numeric_client_id_is_kept_as_string() {
        let mut config = Config::default();
        config.apply_deployment_env(lookup(&[("DEEP_SSO_CLIENT_ID", "0012345678")]));
        assert_eq!(config.sso.client_id, "0012345678");
    }

    #[test]
    fn empty_deployment_variables_are_ignored() {
        let mut config = Config::default();
        config.session.jwt_secret = "from-file".to_string();
        config.apply_deployment_env(lookup(&[("JWT_SECRET", "  ")]));
        assert_eq!(config.session.jwt_secret, "from-file");
    }

    #[test]
    fn environment_detection() {
        assert_eq!(Environment::detect(None, None), Environment::Development);
        assert_eq!(
            Environment::detect(Some("production"), None),
            Environment::Production
        );
        assert_eq!(
            Environment::detect(Some("production"), Some("preview")),
            Environment::Preview
        );
        assert_eq!(
            Environment::detect(Some("production"), Some("development")),
            Environment::Development
        );
        assert_eq!(Environment::detect(Some("test"), None), Environment::Development);
    }

    #[test]
    fn secure_cookies_everywhere_but_development() {
        assert!(!Environment::Development.secure_cookies());
        assert!(Environment::Preview.secure_cookies());
        assert!(Environment::Production.secure_cookies());
    }

    #[test]
    fn base_url_uses_local_url_in_development() {
        let mut config = valid_config();
        config.apply_deployment_env(lookup(&[
            ("LOCAL_APP_URL", "http://localhost:4000/"),
            ("APP_URL", "https://portal.example.com"),
        ]));
        assert_eq!(config.app.base_url().unwrap(), "http://localhost:4000");
    }

    #[test]
    fn base_url_requires_app_url_in_production() {
        // GIVEN: production without APP_URL
        let mut config = valid_config();
        config.apply_deployment_env(lookup(&[("NODE_ENV", "production")]));

        // THEN: validation fails
        assert!(config.app.base_url().is_err());
        assert!(config.validate().is_err());

        // WHEN: APP_URL is provided
        config.apply_deployment_env(lookup(&[("APP_URL", "https://portal.example.com/")]));

        // THEN: it is used without the trailing slash
        assert_eq!(config.app.base_url().unwrap(), "https://portal.example.com");
    }

    #[test]
    fn missing_jwt_secret_is_fatal() {
        let mut config = valid_config();
        config.session.jwt_secret.clear();

        let err = config.validate().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn missing_domain_is_fatal() {
        let mut config = valid_config();
        config.sso.domain.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_client_id_passes_validation() {
        let mut config = valid_config();
        config.sso.client_id = "abc".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn postgrest_backend_requires_url() {
        let mut config = valid_config();
        config.users.backend = UserBackend::Postgrest;
        assert!(config.validate().is_err());

        config.users.postgrest.url = "https://db.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn redacted_hides_secrets() {
        let config = valid_config().redacted();
        assert_eq!(config.sso.client_secret, REDACTED);
        assert_eq!(config.session.jwt_secret, REDACTED);
        // unset secrets stay empty so operators can see they are missing
        assert_eq!(config.users.postgrest.api_key, "");
    }

    #[test]
    fn debug_output_never_contains_secrets() {
        let config = valid_config();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cret"));
        assert!(!debug.contains("signing-secret"));
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 8088
sso:
  domain: "https://id.deep.example"
  http_timeout: 3s
users:
  backend: memory
  seed:
    - id: "1"
      username: "kim"
      name: "Kim"
      role: "Team Leader"
      external_id: "did-1"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.sso.http_timeout, Duration::from_secs(3));
        assert_eq!(config.users.seed.len(), 1);
        assert_eq!(config.users.seed[0].external_id.as_deref(), Some("did-1"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/portal.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn expand_string_uses_default() {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();
        let value = Config::expand_string(&re, "${PORTAL_TEST_UNSET_VAR_XYZ:-fallback}");
        assert_eq!(value, "fallback");
    }
}
