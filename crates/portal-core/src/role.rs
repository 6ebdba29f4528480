//! Portal roles and role normalization
//!
//! Roles are stored by hand in spreadsheets and database rows, so the raw
//! value can be anything from `"Team Leader"` to `"  ADMIN "`. Every consumer
//! goes through [`normalize_role`], which is total: unknown or missing input
//! maps to the least-privileged role.

use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of portal roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Portal administrator
    Admin,
    /// Team leader
    Team,
    /// Reviewer (default, least privileged)
    #[default]
    Reviewer,
    /// External partner
    Partner,
}

impl Role {
    /// Canonical lowercase name, as embedded in session tokens.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Team => "team",
            Self::Reviewer => "reviewer",
            Self::Partner => "partner",
        }
    }

    /// Entry route a freshly signed-in user lands on.
    #[must_use]
    pub fn landing_path(self) -> &'static str {
        match self {
            Self::Partner => "/partner-dashboard",
            Self::Admin | Self::Team | Self::Reviewer => "/",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(normalize_role(Some(s)))
    }
}

/// Normalize an externally stored role string.
///
/// Lower-cases the input and collapses runs of whitespace into a single `_`
/// (leading/trailing whitespace is dropped), then matches known variants.
/// `team_leader` is folded into [`Role::Team`]; anything unrecognized,
/// empty or missing becomes [`Role::Reviewer`].
///
/// Idempotent: `normalize_role(Some(r.as_str())) == r` for every role.
#[must_use]
pub fn normalize_role(raw: Option<&str>) -> Role {
    let Some(raw) = raw else {
        return Role::Reviewer;
    };

    match canonical_key(raw).as_str() {
        "admin" => Role::Admin,
        "team" | "team_leader" => Role::Team,
        "partner" => Role::Partner,
        _ => Role::Reviewer,
    }
}

fn canonical_key(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}
