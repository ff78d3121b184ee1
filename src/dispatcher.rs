use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep_until;
use tracing::{debug, error, warn};

use crate::config::DispatcherConfig;
use crate::delivery::DeliveryClient;
use crate::directory::{DirectoryCache, MemoryDirectoryCache, WebhookDirectory};
use crate::error::{BuildError, CacheError, DeliveryError};
use crate::retry::{deliver_with_retry, Deadline};
use crate::ssrf::SafeDialer;
use crate::storage::WebhookStore;
use crate::telemetry::metric_inc;
use crate::tracker::TaskTracker;
use crate::types::{DispatchEnvelope, OrganizationId, Webhook};

/// Event type used by [`Dispatcher::send_test_event`].
pub const TEST_EVENT: &str = "webhook.test";

/// Fans events out to an organization's subscribed webhooks.
///
/// Cheap to clone; clones share the directory, HTTP client and tracker.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    directory: WebhookDirectory,
    client: DeliveryClient,
    tracker: Arc<TaskTracker>,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Dispatcher over `store` with an in-memory directory cache.
    pub fn new(config: DispatcherConfig, store: Arc<dyn WebhookStore>) -> Result<Self, BuildError> {
        Self::builder(store).config(config).build()
    }

    pub fn builder(store: Arc<dyn WebhookStore>) -> DispatcherBuilder {
        DispatcherBuilder {
            store,
            config: DispatcherConfig::default(),
            cache: None,
            dialer: None,
            tracker: None,
        }
    }

    /// Deliver `event` with `data` to every active webhook of `org` that
    /// subscribes to it.
    ///
    /// Returns as soon as the work is scheduled. Delivery runs detached under
    /// its own deadline and never reports back to the caller.
    pub fn dispatch<T: Serialize>(&self, org: &OrganizationId, event: &str, data: T) {
        let payload = match DispatchEnvelope::new(event, data).to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(organization_id = %org, event, error = %e, "failed to encode webhook payload");
                return;
            }
        };

        if tokio::runtime::Handle::try_current().is_err() {
            error!(organization_id = %org, event, "webhook dispatch requires a Tokio runtime");
            return;
        }

        metric_inc("webhook.dispatch.scheduled");
        let inner = Arc::clone(&self.inner);
        let org = org.clone();
        let event = event.to_string();
        self.inner.tracker.track(async move {
            inner.run(org, event, payload).await;
        });
    }

    /// One delivery attempt of a `webhook.test` event, outside the retry
    /// loop, the scheduler and the tracker.
    pub async fn send_test_event(&self, webhook: &Webhook) -> Result<(), DeliveryError> {
        let config = &self.inner.config;
        let data = serde_json::json!({
            "message": format!("This is a test webhook from {}", config.platform_name),
            "webhook_id": webhook.id,
        });
        let payload = DispatchEnvelope::new(TEST_EVENT, data).to_bytes()?;

        match tokio::time::timeout(
            config.test_timeout(),
            self.inner.client.deliver(webhook, &payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        }
    }

    /// Must be called after every registration change of `org`.
    pub async fn invalidate(&self, org: &OrganizationId) -> Result<(), CacheError> {
        self.inner.directory.invalidate(org).await
    }

    pub fn directory(&self) -> &WebhookDirectory {
        &self.inner.directory
    }

    pub fn tracker(&self) -> &Arc<TaskTracker> {
        &self.inner.tracker
    }

    /// Wait until every dispatch started through this dispatcher's tracker
    /// has finished.
    pub async fn wait_idle(&self) {
        self.inner.tracker.wait().await;
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }
}

impl Inner {
    async fn run(self: Arc<Self>, org: OrganizationId, event: String, payload: Bytes) {
        let deadline = Deadline::after(self.config.dispatch_timeout());

        let webhooks = match self.directory.active_webhooks(&org).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                error!(organization_id = %org, event = %event, error = %e, "failed to load webhooks, dropping dispatch");
                return;
            }
        };

        // Per-call gate: concurrent dispatches do not share it.
        let gate = Arc::new(Semaphore::new(self.config.max_concurrent_deliveries()));
        let policy = self.config.retry_policy();
        let mut deliveries = JoinSet::new();

        for webhook in webhooks
            .into_iter()
            .filter(|w| w.is_active && w.subscribes_to(&event))
        {
            if deadline.expired() {
                warn!(organization_id = %org, event = %event, "dispatch deadline reached, skipping remaining webhooks");
                break;
            }

            let permit = tokio::select! {
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = sleep_until(deadline.instant()) => {
                    warn!(organization_id = %org, event = %event, "dispatch deadline reached, skipping remaining webhooks");
                    break;
                }
            };

            let inner = Arc::clone(&self);
            let event = event.clone();
            let payload = payload.clone();
            deliveries.spawn(async move {
                let _permit = permit;
                deliver_with_retry(&inner.client, &webhook, &event, &payload, deadline, policy).await
            });
        }

        if deliveries.is_empty() {
            debug!(organization_id = %org, event = %event, "no subscribed webhooks");
            return;
        }

        debug!(organization_id = %org, event = %event, scheduled = deliveries.len(), "webhook dispatch scheduled");
        while let Some(joined) = deliveries.join_next().await {
            if let Err(e) = joined {
                error!(organization_id = %org, event = %event, error = %e, "webhook delivery task failed");
            }
        }
        debug!(organization_id = %org, event = %event, "webhook dispatch finished");
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    store: Arc<dyn WebhookStore>,
    config: DispatcherConfig,
    cache: Option<Arc<dyn DirectoryCache>>,
    dialer: Option<SafeDialer>,
    tracker: Option<Arc<TaskTracker>>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Directory cache backend. Defaults to an in-memory cache.
    pub fn cache(mut self, cache: Arc<dyn DirectoryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Guarded resolver for outbound connections. Defaults to the system
    /// resolver.
    pub fn dialer(mut self, dialer: SafeDialer) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Tracker for background work, e.g. [`TaskTracker::global`]. Defaults
    /// to a tracker private to this dispatcher.
    pub fn tracker(mut self, tracker: Arc<TaskTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> Result<Dispatcher, BuildError> {
        let config = self.config;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryDirectoryCache::new(config.cache_ttl())));
        let dialer = self.dialer.unwrap_or_default();
        let client = DeliveryClient::with_dialer(&config, dialer)?;

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                directory: WebhookDirectory::new(self.store, cache),
                client,
                tracker: self.tracker.unwrap_or_default(),
                config,
            }),
        })
    }
}
