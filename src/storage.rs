use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{OrganizationId, Webhook, WebhookId};

/// Webhook registry as seen by the dispatcher.
///
/// Implementations return `organization_id = org AND is_active = true`.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    async fn active_webhooks(&self, org: &OrganizationId) -> Result<Vec<Webhook>, StoreError>;
}

/// In-memory registry for embedded deployments and tests.
///
/// Mutations here do not invalidate any directory cache; callers must do that
/// themselves, exactly like any other registry.
#[derive(Default)]
pub struct InMemoryWebhookStore {
    webhooks: RwLock<Vec<Webhook>>,
    queries: AtomicUsize,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a webhook by id.
    pub async fn upsert(&self, webhook: Webhook) {
        let mut guard = self.webhooks.write().await;
        match guard.iter_mut().find(|w| w.id == webhook.id) {
            Some(existing) => *existing = webhook,
            None => guard.push(webhook),
        }
    }

    pub async fn remove(&self, id: &WebhookId) -> Option<Webhook> {
        let mut guard = self.webhooks.write().await;
        let index = guard.iter().position(|w| &w.id == id)?;
        Some(guard.remove(index))
    }

    /// Number of registry queries served so far.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn active_webhooks(&self, org: &OrganizationId) -> Result<Vec<Webhook>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let guard = self.webhooks.read().await;
        Ok(guard
            .iter()
            .filter(|w| &w.organization_id == org && w.is_active)
            .cloned()
            .collect())
    }
}
