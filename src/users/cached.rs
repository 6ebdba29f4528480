//! TTL-cached user store decorator

use std::time::Duration;

use async_trait::async_trait;
use portal_core::PortalUser;

use super::UserStore;
use crate::Result;
use crate::cache::{CacheStatsSnapshot, TtlCache};

/// Caches found users; misses and errors always reach the inner store
/// so a freshly linked account is visible on the next login.
pub struct CachedUserStore<S> {
    inner: S,
    cache: TtlCache<PortalUser>,
}

impl<S: UserStore> CachedUserStore<S> {
    /// Wrap `inner`, keeping found users for `ttl`
    #[must_use]
    pub fn new(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TtlCache::new(ttl),
        }
    }
}

#[async_trait]
impl<S: UserStore> UserStore for CachedUserStore<S> {
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<PortalUser>> {
        if let Some(user) = self.cache.get(external_id) {
            return Ok(Some(user));
        }

        let user = self.inner.get_user_by_external_id(external_id).await?;
        if let Some(ref found) = user {
            self.cache.insert(external_id, found.clone());
        }
        Ok(user)
    }

    fn backend_name(&self) -> &'static str {
        "cached"
    }

    fn evict_expired(&self) -> usize {
        self.cache.evict_expired()
    }

    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        Some(self.cache.stats())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingStore {
        calls: AtomicUsize,
        user: Option<PortalUser>,
    }

    #[async_trait]
    impl UserStore for CountingStore {
        async fn get_user_by_external_id(&self, _: &str) -> Result<Option<PortalUser>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.user.clone())
        }

        fn backend_name(&self) -> &'static str {
            "counting"
        }
    }

    #[tokio::test]
    async fn found_users_are_cached() {
        let store = CachedUserStore::new(
            CountingStore {
                calls: AtomicUsize::new(0),
                user: Some(PortalUser::new("1", "kim", "Kim")),
            },
            Duration::from_secs(60),
        );

        for _ in 0..3 {
            assert!(store.get_user_by_external_id("did-1").await.unwrap().is_some());
        }

        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.cache_stats().unwrap().hits, 2);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let store = CachedUserStore::new(
            CountingStore {
                calls: AtomicUsize::new(0),
                user: None,
            },
            Duration::from_secs(60),
        );

        assert!(store.get_user_by_external_id("did-1").await.unwrap().is_none());
        assert!(store.get_user_by_external_id("did-1").await.unwrap().is_none());

        assert_eq!(store.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn evict_expired_reaches_the_cache() {
        // GIVEN: a found user cached for 1ms
        let store = CachedUserStore::new(
            CountingStore {
                calls: AtomicUsize::new(0),
                user: Some(PortalUser::new("1", "kim", "Kim")),
            },
            Duration::from_millis(1),
        );
        store.get_user_by_external_id("did-1").await.unwrap();

        // WHEN: the entry expires and the store is swept
        tokio::time::sleep(Duration::from_millis(5)).await;
        let evicted = UserStore::evict_expired(&store);

        // THEN: nothing is left behind
        assert_eq!(evicted, 1);
        assert_eq!(store.cache_stats().unwrap().size, 0);
    }
}
