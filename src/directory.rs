//! Read-through cache of each organization's active webhooks.
//!
//! The dispatcher reads webhooks only through [`WebhookDirectory`]. Entries
//! live for a long TTL; correctness relies on the registry calling
//! [`WebhookDirectory::invalidate`] after every create, update, delete,
//! activation or deactivation. Reads racing an invalidation may see the old
//! list; that staleness is accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use moka::future::Cache;
use tracing::{debug, warn};

use crate::error::{CacheError, DirectoryError};
use crate::storage::WebhookStore;
use crate::telemetry::metric_inc;
use crate::types::{OrganizationId, Webhook};

/// Safety-net TTL for directory entries.
pub const DEFAULT_DIRECTORY_TTL: Duration = Duration::from_secs(6 * 60 * 60);

const DEFAULT_CAPACITY: u64 = 100_000;

/// Byte-level cache backend holding serialized webhook lists.
///
/// Backends own their expiry policy.
#[async_trait]
pub trait DirectoryCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;
    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache backed by moka.
#[derive(Clone)]
pub struct MemoryDirectoryCache {
    inner: Cache<String, Bytes>,
}

impl MemoryDirectoryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(DEFAULT_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }
}

impl Default for MemoryDirectoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_DIRECTORY_TTL)
    }
}

#[async_trait]
impl DirectoryCache for MemoryDirectoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        Ok(self.inner.get(key).await)
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        self.inner.insert(key.to_string(), value).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.inner.invalidate(key).await;
        Ok(())
    }
}

/// Active-webhook lookup with read-through caching.
#[derive(Clone)]
pub struct WebhookDirectory {
    store: Arc<dyn WebhookStore>,
    cache: Arc<dyn DirectoryCache>,
}

impl WebhookDirectory {
    pub fn new(store: Arc<dyn WebhookStore>, cache: Arc<dyn DirectoryCache>) -> Self {
        Self { store, cache }
    }

    /// Directory over `store` with a process-local cache.
    pub fn in_memory(store: Arc<dyn WebhookStore>, ttl: Duration) -> Self {
        Self::new(store, Arc::new(MemoryDirectoryCache::new(ttl)))
    }

    fn cache_key(org: &OrganizationId) -> String {
        format!("webhooks:active:{}", org.0)
    }

    /// Active webhooks of `org`, from cache when possible.
    ///
    /// Cache faults fall back to the store; only a store failure is an error.
    pub async fn active_webhooks(
        &self,
        org: &OrganizationId,
    ) -> Result<Vec<Webhook>, DirectoryError> {
        let key = Self::cache_key(org);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Webhook>>(&bytes) {
                Ok(webhooks) => {
                    metric_inc("webhook.directory.hit");
                    debug!(organization_id = %org, count = webhooks.len(), "webhook directory hit");
                    return Ok(webhooks);
                }
                Err(e) => {
                    warn!(organization_id = %org, error = %e, "discarding corrupt webhook directory entry");
                }
            },
            Ok(None) => {}
            Err(e) => {
                warn!(organization_id = %org, error = %e, "webhook directory cache read failed");
            }
        }

        metric_inc("webhook.directory.miss");
        let webhooks = self.store.active_webhooks(org).await?;

        match serde_json::to_vec(&webhooks) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(&key, Bytes::from(bytes)).await {
                    warn!(organization_id = %org, error = %e, "webhook directory cache write failed");
                }
            }
            Err(e) => {
                warn!(organization_id = %org, error = %e, "failed to serialize webhook directory entry");
            }
        }

        debug!(organization_id = %org, count = webhooks.len(), "webhook directory loaded from store");
        Ok(webhooks)
    }

    /// Drop the cached list for `org`. Safe to call concurrently with reads.
    pub async fn invalidate(&self, org: &OrganizationId) -> Result<(), CacheError> {
        self.cache.delete(&Self::cache_key(org)).await?;
        debug!(organization_id = %org, "webhook directory invalidated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryWebhookStore;

    fn setup(ttl: Duration) -> (Arc<InMemoryWebhookStore>, Arc<MemoryDirectoryCache>, WebhookDirectory) {
        let store = Arc::new(InMemoryWebhookStore::new());
        let cache = Arc::new(MemoryDirectoryCache::new(ttl));
        let directory = WebhookDirectory::new(store.clone(), cache.clone());
        (store, cache, directory)
    }

    #[tokio::test]
    async fn second_read_is_served_from_cache() {
        let (store, _, directory) = setup(DEFAULT_DIRECTORY_TTL);
        store.upsert(Webhook::new("a", "org_1", "https://a.example.com")).await;
        let org = OrganizationId::new("org_1");

        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);
        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_reload() {
        let (store, _, directory) = setup(DEFAULT_DIRECTORY_TTL);
        let org = OrganizationId::new("org_1");
        store.upsert(Webhook::new("a", "org_1", "https://a.example.com")).await;
        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);

        store.upsert(Webhook::new("a", "org_1", "https://a.example.com").inactive()).await;
        // Stale until invalidated.
        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);

        directory.invalidate(&org).await.unwrap();
        assert!(directory.active_webhooks(&org).await.unwrap().is_empty());
        assert_eq!(store.query_count(), 2);
    }

    #[tokio::test]
    async fn empty_lists_are_cached_too() {
        let (store, _, directory) = setup(DEFAULT_DIRECTORY_TTL);
        let org = OrganizationId::new("nobody");

        assert!(directory.active_webhooks(&org).await.unwrap().is_empty());
        assert!(directory.active_webhooks(&org).await.unwrap().is_empty());
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn corrupt_entry_is_replaced() {
        let (store, cache, directory) = setup(DEFAULT_DIRECTORY_TTL);
        let org = OrganizationId::new("org_1");
        store.upsert(Webhook::new("a", "org_1", "https://a.example.com")).await;
        cache
            .set("webhooks:active:org_1", Bytes::from_static(b"not json"))
            .await
            .unwrap();

        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);
        assert_eq!(directory.active_webhooks(&org).await.unwrap().len(), 1);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (store, _, directory) = setup(Duration::from_millis(50));
        let org = OrganizationId::new("org_1");

        directory.active_webhooks(&org).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        directory.active_webhooks(&org).await.unwrap();

        assert_eq!(store.query_count(), 2);
    }
}
