//! Handshake orchestrator.
//!
//! ```text
//! Idle -> Started -> CodeReceived -> TokensExchanged
//!      -> IdentityVerified -> UserResolved -> SessionIssued
//! ```
//!
//! [`Handshake::start`] covers `Idle -> Started`; [`Handshake::callback`]
//! walks the rest and short-circuits on the first failure. Cookie cleanup is
//! the caller's job and happens on every exit (see `routes::callback`).

use std::sync::Arc;

use serde::Deserialize;
use url::{Url, form_urlencoded};

use super::client::{TokenExchangeError, TokenExchanger};
use super::constant_time_eq;
use super::cookies::{HandshakeState, StoredHandshake};
use super::session::{IssuedSession, SessionIssuer};
use super::settings::{MIN_CLIENT_ID_LEN, SsoSettings};
use super::verifier::{IdentityVerifier, VerifyError};
use crate::users::UserStore;

/// Login page every failure redirects to
pub const LOGIN_PATH: &str = "/login";

/// Longest `details` value placed on a login redirect
const MAX_DETAILS_CHARS: usize = 256;

/// Callback request rejected before any provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    /// `code` or `state` absent
    #[error("callback is missing code or state")]
    MissingParams,
    /// State cookie absent or different from the returned state
    #[error("state does not match this login attempt")]
    InvalidState,
    /// Verifier cookie absent
    #[error("code verifier cookie is missing")]
    MissingVerifier,
}

impl ProtocolViolation {
    /// Error code shown on the login page
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::MissingParams => "missing_params",
            Self::InvalidState => "invalid_state",
            Self::MissingVerifier => "missing_verifier",
        }
    }
}

/// Every way a handshake can fail
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// Client id missing or malformed; raised before any cookie is set
    #[error("SSO is not configured: {0}")]
    Configuration(String),

    /// Provider redirected back with `error`
    #[error("identity provider returned {code}")]
    Provider {
        /// Provider's error code, echoed to the login page
        code: String,
        /// Provider's `error_description`, logged only
        description: Option<String>,
    },

    /// Missing or tampered callback state
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),

    /// Token endpoint failure
    #[error(transparent)]
    TokenExchange(#[from] TokenExchangeError),

    /// ID token missing or rejected
    #[error("ID token verification failed: {0}")]
    IdentityVerification(#[from] VerifyError),

    /// Verified token has an empty `sub`
    #[error("verified ID token has no subject")]
    MissingSubject,

    /// No portal account is linked to the subject
    #[error("no portal account linked to {subject}")]
    UserNotLinked {
        /// External subject identifier
        subject: String,
    },

    /// Anything else (user store outage, session signing)
    #[error("unexpected failure: {0}")]
    Unhandled(String),
}

impl HandshakeError {
    /// Stable tag used in logs and audit events
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "not_configured",
            Self::Provider { .. } => "provider_error",
            Self::Protocol(v) => v.code(),
            Self::TokenExchange(_) => "token_exchange_failed",
            Self::IdentityVerification(_) => "id_token_verify_failed",
            Self::MissingSubject => "missing_did",
            Self::UserNotLinked { .. } => "not_linked",
            Self::Unhandled(_) => "unhandled",
        }
    }

    /// `/login?error=<code>[&details=...]` for this failure
    #[must_use]
    pub fn login_redirect(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        match self {
            Self::Configuration(_) => {
                query.append_pair("error", "sso_not_configured");
            }
            Self::Provider { code, .. } => {
                query.append_pair("error", code);
            }
            Self::Protocol(v) => {
                query.append_pair("error", v.code());
            }
            Self::TokenExchange(e) => {
                let details: String = e.to_string().chars().take(MAX_DETAILS_CHARS).collect();
                query
                    .append_pair("error", "sso_failed")
                    .append_pair("details", &details);
            }
            Self::UserNotLinked { subject } => {
                query
                    .append_pair("error", "account_not_linked")
                    .append_pair("details", &format!("did:{subject}"));
            }
            Self::IdentityVerification(_) | Self::MissingSubject | Self::Unhandled(_) => {
                query.append_pair("error", "sso_failed");
            }
        }
        format!("{LOGIN_PATH}?{}", query.finish())
    }
}

/// Query parameters the provider sends to the callback
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed state
    pub state: Option<String>,
    /// Provider error code
    pub error: Option<String>,
    /// Provider error description
    pub error_description: Option<String>,
}

/// Result of a successful start
#[derive(Debug)]
pub struct StartOutcome {
    /// Provider authorization URL to redirect the browser to
    pub authorization_url: String,
    /// Secrets to store in cookies
    pub handshake: HandshakeState,
}

/// Result of a successful callback
#[derive(Debug)]
pub struct CallbackOutcome {
    /// External subject the user signed in as
    pub subject: String,
    /// New portal session
    pub session: IssuedSession,
    /// Role landing path
    pub redirect_to: &'static str,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.is_empty())
}

/// Coordinates the token client, ID token verifier, user store and session issuer
pub struct Handshake {
    settings: Arc<SsoSettings>,
    exchanger: Arc<dyn TokenExchanger>,
    verifier: Arc<dyn IdentityVerifier>,
    users: Arc<dyn UserStore>,
    sessions: Arc<SessionIssuer>,
}

impl Handshake {
    /// Assemble an orchestrator from its collaborators
    #[must_use]
    pub fn new(
        settings: Arc<SsoSettings>,
        exchanger: Arc<dyn TokenExchanger>,
        verifier: Arc<dyn IdentityVerifier>,
        users: Arc<dyn UserStore>,
        sessions: Arc<SessionIssuer>,
    ) -> Self {
        Self {
            settings,
            exchanger,
            verifier,
            users,
            sessions,
        }
    }

    /// Resolved SSO settings
    #[must_use]
    pub fn settings(&self) -> &SsoSettings {
        &self.settings
    }

    /// Session issuer
    #[must_use]
    pub fn sessions(&self) -> &SessionIssuer {
        &self.sessions
    }

    /// Begin a login attempt: fresh secrets and the provider URL.
    pub fn start(&self) -> Result<StartOutcome, HandshakeError> {
        if !self.settings.client_id_is_valid() {
            return Err(HandshakeError::Configuration(format!(
                "client id must be at least {MIN_CLIENT_ID_LEN} characters"
            )));
        }

        let handshake = HandshakeState::generate();
        let mut url = Url::parse(&self.settings.authorization_endpoint()).map_err(|e| {
            HandshakeError::Configuration(format!("invalid authorization endpoint: {e}"))
        })?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", &self.settings.scope())
            .append_pair("state", &handshake.state)
            .append_pair("nonce", &handshake.nonce)
            .append_pair("code_challenge", &handshake.code_challenge())
            .append_pair("code_challenge_method", "S256");

        Ok(StartOutcome {
            authorization_url: url.to_string(),
            handshake,
        })
    }

    /// Complete a login attempt from the provider's redirect.
    pub async fn callback(
        &self,
        params: &CallbackParams,
        stored: &StoredHandshake,
    ) -> Result<CallbackOutcome, HandshakeError> {
        if let Some(code) = present(params.error.as_ref()) {
            return Err(HandshakeError::Provider {
                code: code.to_string(),
                description: params.error_description.clone(),
            });
        }

        let (Some(code), Some(returned_state)) =
            (present(params.code.as_ref()), present(params.state.as_ref()))
        else {
            return Err(ProtocolViolation::MissingParams.into());
        };

        let stored_state =
            present(stored.state.as_ref()).ok_or(ProtocolViolation::InvalidState)?;
        if !constant_time_eq(stored_state, returned_state) {
            return Err(ProtocolViolation::InvalidState.into());
        }

        let code_verifier =
            present(stored.code_verifier.as_ref()).ok_or(ProtocolViolation::MissingVerifier)?;

        // CodeReceived -> TokensExchanged
        let tokens = self
            .exchanger
            .exchange_code_for_tokens(code, code_verifier)
            .await?;

        // TokensExchanged -> IdentityVerified
        let id_token = present(tokens.id_token.as_ref()).ok_or(VerifyError::MissingIdToken)?;
        let nonce = present(stored.nonce.as_ref()).ok_or(VerifyError::MissingNonce)?;
        let identity = self.verifier.verify_id_token(id_token, nonce).await?;

        let subject = identity.subject.trim();
        if subject.is_empty() {
            return Err(HandshakeError::MissingSubject);
        }

        // IdentityVerified -> UserResolved; never provisions
        let user = self
            .users
            .get_user_by_external_id(subject)
            .await
            .map_err(|e| HandshakeError::Unhandled(e.to_string()))?
            .ok_or_else(|| HandshakeError::UserNotLinked {
                subject: subject.to_string(),
            })?;

        // UserResolved -> SessionIssued
        let session = self
            .sessions
            .issue(&user)
            .map_err(|e| HandshakeError::Unhandled(e.to_string()))?;

        Ok(CallbackOutcome {
            subject: subject.to_string(),
            redirect_to: session.claims.role.landing_path(),
            session,
        })
    }
}
