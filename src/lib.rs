//! Multi-tenant webhook fan-out.
//!
//! When a domain event happens for an organization, [`Dispatcher::dispatch`]
//! delivers it as a signed HTTP callback to every active webhook of that
//! organization subscribed to the event type, without blocking the caller.
//!
//! ## Guarantees
//! - Fire-and-forget: dispatch never fails or blocks the event producer
//! - At most 10 concurrent deliveries per dispatch call (configurable)
//! - 3 attempts per target with exponential backoff, bounded by a 2 minute
//!   dispatch deadline
//! - Identical payload bytes for every target of one dispatch
//! - `X-Webhook-Signature: sha256=<hex>` when the webhook has a secret
//! - No connection to loopback, private, link-local or unspecified
//!   addresses, checked at registration and again at every connect
//!
//! ## Non-Guarantees
//! - Delivery beyond the retry budget
//! - Durable delivery logs or dead-lettering
//! - Ordering between events
//!
//! The global connection bound is `concurrent dispatches × 10`: the admission
//! gate belongs to a single dispatch call.

mod config;
mod delivery;
mod directory;
mod dispatcher;
mod error;
mod retry;
mod signing;
mod ssrf;
mod storage;
mod telemetry;
mod tracker;
mod types;

#[cfg(feature = "redis")]
mod cache_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::{DispatcherConfig, MAX_TIMEOUT};
pub use delivery::DeliveryClient;
pub use directory::{DirectoryCache, MemoryDirectoryCache, WebhookDirectory, DEFAULT_DIRECTORY_TTL};
pub use dispatcher::{Dispatcher, DispatcherBuilder, TEST_EVENT};
pub use error::{
    BuildError,
    CacheError,
    ConnectRejection,
    DeliveryError,
    DirectoryError,
    StoreError,
    UrlRejection,
};
pub use retry::{deliver_with_retry, Deadline, DeliveryOutcome, DeliveryReport, RetryPolicy};
pub use signing::{sign, signature_header, verify_signature, SIGNATURE_HEADER};
pub use ssrf::{
    guard_literal_host,
    is_blocked_ip,
    validate_webhook_url,
    HostResolver,
    SafeDialer,
    SystemResolver,
};
pub use storage::{InMemoryWebhookStore, WebhookStore};
pub use tracker::{TaskTracker, TrackerGuard};
pub use types::{
    AttemptOutcome,
    DeliveryAttempt,
    DispatchEnvelope,
    OrganizationId,
    Webhook,
    WebhookId,
};

#[cfg(feature = "redis")]
pub use cache_redis::RedisDirectoryCache;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresWebhookStore;
