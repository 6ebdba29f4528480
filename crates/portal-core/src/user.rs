//! Portal user records

use serde::{Deserialize, Serialize};

use crate::role::{Role, normalize_role};

/// A portal account as held by the user store.
///
/// `role` is kept exactly as stored; call [`PortalUser::role`] for the
/// normalized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortalUser {
    /// Internal user id
    pub id: String,
    /// Login name
    pub username: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Raw role string from the store
    #[serde(default)]
    pub role: Option<String>,
    /// External identity-provider subject linked to this account
    #[serde(default)]
    pub external_id: Option<String>,
}

impl PortalUser {
    /// Create a user with no role and no linked external identity.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        username: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            name: name.into(),
            role: None,
            external_id: None,
        }
    }

    /// Set the raw role string.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Link an external identity-provider subject.
    #[must_use]
    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    /// The normalized role.
    #[must_use]
    pub fn role(&self) -> Role {
        normalize_role(self.role.as_deref())
    }
}
