//! Authorization-code exchange against the provider's token endpoint

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::settings::SsoSettings;

/// Longest slice of an error response body kept for diagnostics
const MAX_ERROR_BODY: usize = 1024;

/// Token endpoint response, kept verbatim and never persisted
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Signed ID token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Refresh token (requested via `offline_access`)
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token type, normally `Bearer`
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Granted scopes
    #[serde(default)]
    pub scope: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Token exchange failure
#[derive(Debug, thiserror::Error)]
pub enum TokenExchangeError {
    /// Non-2xx response; carries the status and raw body for audit logs
    #[error("token endpoint returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// Transport failure
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// 2xx response that is not a token response
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl TokenExchangeError {
    /// HTTP status if the provider answered
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Exchanges an authorization code for tokens
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Redeem `code` together with the PKCE verifier
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, TokenExchangeError>;
}

/// Token endpoint client authenticating with HTTP Basic client credentials
pub struct DeepIdClient {
    http: reqwest::Client,
    token_endpoint: String,
    redirect_uri: String,
    client_id: String,
    client_secret: String,
}

impl DeepIdClient {
    /// Create a client for the configured provider
    #[must_use]
    pub fn new(http: reqwest::Client, settings: &SsoSettings) -> Self {
        Self {
            http,
            token_endpoint: settings.token_endpoint(),
            redirect_uri: settings.redirect_uri.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenExchanger for DeepIdClient {
    async fn exchange_code_for_tokens(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, TokenExchangeError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];

        debug!(endpoint = %self.token_endpoint, "Exchanging authorization code");
        let response = self
            .http
            .post(&self.token_endpoint)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(TokenExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| TokenExchangeError::InvalidResponse(e.to_string()))
    }
}
