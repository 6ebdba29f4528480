//! User store: where portal accounts linked to an external identity live.
//!
//! The handshake only ever reads through [`UserStore`]; accounts are created
//! and linked elsewhere. A missing account is `Ok(None)`, never an error.

mod cached;
mod memory;
mod postgrest;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portal_core::PortalUser;
use tokio::sync::broadcast;
use tracing::debug;

pub use cached::CachedUserStore;
pub use memory::InMemoryUserStore;
pub use postgrest::PostgrestUserStore;

use crate::Result;
use crate::cache::CacheStatsSnapshot;
use crate::config::{UserBackend, UsersConfig};

/// Read access to portal accounts.
///
/// Implementations must be `Send + Sync` because the store is shared
/// across request handlers.
#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    /// Account linked to `external_id`, or `None` when there is none.
    ///
    /// Errors only on transport or decoding failure.
    async fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<PortalUser>>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;

    /// Drop expired cached entries, returning how many were removed.
    fn evict_expired(&self) -> usize {
        0
    }

    /// Cache statistics, `None` for uncached stores
    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        None
    }
}

/// Spawn a background task that sweeps expired cache entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    store: Arc<dyn UserStore>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = store.evict_expired();
                    if evicted > 0 {
                        let hit_rate = store.cache_stats().map(|s| s.hit_rate());
                        debug!(count = evicted, ?hit_rate, "Swept expired cached users");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("User cache sweeper shutting down");
                    break;
                }
            }
        }
    })
}

/// Build the configured store, wrapped in a cache unless `cache_ttl` is zero.
pub fn from_config(config: &UsersConfig, http: reqwest::Client) -> Arc<dyn UserStore> {
    match config.backend {
        UserBackend::Memory => wrap(InMemoryUserStore::new(config.seed.clone()), config),
        UserBackend::Postgrest => wrap(PostgrestUserStore::new(http, &config.postgrest), config),
    }
}

fn wrap<S: UserStore>(store: S, config: &UsersConfig) -> Arc<dyn UserStore> {
    if config.cache_ttl.is_zero() {
        Arc::new(store)
    } else {
        Arc::new(CachedUserStore::new(store, config.cache_ttl))
    }
}
