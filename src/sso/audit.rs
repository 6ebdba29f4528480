//! Audit logging for the SSO handshake.
//!
//! Every event is emitted through `tracing` with an `event` field of the
//! form `sso.<kind>` plus structured context. Tokens, secrets and codes
//! are never part of an event.
//!
//! | Event | When |
//! |-------|------|
//! | `sso.started` | Start endpoint redirected to the provider |
//! | `sso.session_issued` | Callback signed the user in |
//! | `sso.<failure kind>` | Any handshake failure, e.g. `sso.not_linked` |
//! | `sso.logged_out` | Session cookie removed |

use portal_core::Role;
use serde::Serialize;

use super::handshake::{CallbackOutcome, HandshakeError};
use super::verifier::VerifyError;

/// Structured audit record
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// `sso.<kind>`
    pub event: String,
    /// Whether the event is a failure
    pub failure: bool,
    /// External subject, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Portal user id, when a session was issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Normalized role, when a session was issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Provider HTTP status for token exchange failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Finer-grained failure tag (e.g. the ID token rejection kind)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'static str>,
    /// Human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn new(kind: &str, failure: bool) -> Self {
        Self {
            event: format!("sso.{kind}"),
            failure,
            subject: None,
            user_id: None,
            role: None,
            status: None,
            cause: None,
            reason: None,
        }
    }

    /// `sso.started`
    #[must_use]
    pub fn started() -> Self {
        Self::new("started", false)
    }

    /// `sso.session_issued`
    #[must_use]
    pub fn session_issued(outcome: &CallbackOutcome) -> Self {
        Self {
            subject: Some(outcome.subject.clone()),
            user_id: Some(outcome.session.claims.user_id.clone()),
            role: Some(outcome.session.claims.role),
            ..Self::new("session_issued", false)
        }
    }

    /// `sso.logged_out`
    #[must_use]
    pub fn logged_out(user_id: Option<String>) -> Self {
        Self {
            user_id,
            ..Self::new("logged_out", false)
        }
    }

    /// `sso.<kind>` for a handshake failure
    #[must_use]
    pub fn failed(err: &HandshakeError) -> Self {
        let mut event = Self::new(err.kind(), true);
        match err {
            HandshakeError::Provider { code, description } => {
                event.reason = Some(match description {
                    Some(d) => format!("{code}: {d}"),
                    None => code.clone(),
                });
            }
            HandshakeError::TokenExchange(e) => {
                event.status = e.status();
                event.reason = Some(e.to_string());
            }
            HandshakeError::IdentityVerification(e) => {
                event.cause = Some(e.kind());
                if matches!(
                    e,
                    VerifyError::UnknownKeyId(_)
                        | VerifyError::KeySet(_)
                        | VerifyError::Malformed(_)
                ) {
                    event.reason = Some(e.to_string());
                }
            }
            HandshakeError::UserNotLinked { subject } => {
                event.subject = Some(subject.clone());
            }
            HandshakeError::Configuration(_)
            | HandshakeError::Protocol(_)
            | HandshakeError::MissingSubject
            | HandshakeError::Unhandled(_) => {
                event.reason = Some(err.to_string());
            }
        }
        event
    }
}

/// Emit `event` at `info` (success) or `warn` (failure).
///
/// The whole record is also serialized into the `audit` field so log
/// aggregators can extract it in one piece.
pub fn emit(event: &AuditEvent) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize audit event");
            return;
        }
    };

    if event.failure {
        tracing::warn!(
            event = %event.event,
            cause = event.cause.unwrap_or_default(),
            audit = %json,
            "SSO handshake failed"
        );
    } else {
        tracing::info!(event = %event.event, audit = %json, "SSO audit");
    }
}
