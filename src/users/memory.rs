//! In-memory user store seeded from configuration

use async_trait::async_trait;
use dashmap::DashMap;
use portal_core::PortalUser;
use tracing::warn;

use super::UserStore;
use crate::Result;

/// Accounts indexed by linked external id
pub struct InMemoryUserStore {
    by_external_id: DashMap<String, PortalUser>,
}

impl InMemoryUserStore {
    /// Index `users` by external id. Users without one are skipped.
    #[must_use]
    pub fn new(users: Vec<PortalUser>) -> Self {
        let store = Self {
            by_external_id: DashMap::new(),
        };
        for user in users {
            store.insert(user);
        }
        store
    }

    /// Add or replace an account. Returns `false` if it has no external id.
    pub fn insert(&self, user: PortalUser) -> bool {
        let Some(external_id) = user.external_id.clone().filter(|id| !id.is_empty()) else {
            warn!(user_id = %user.id, "Skipping user without external id");
            return false;
        };
        self.by_external_id.insert(external_id, user);
        true
    }

    /// Number of linked accounts
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_external_id.len()
    }

    /// Whether no accounts are linked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_external_id.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<PortalUser>> {
        Ok(self
            .by_external_id
            .get(external_id)
            .map(|entry| entry.value().clone()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
