use std::net::IpAddr;

use thiserror::Error;

/// Why a webhook URL was refused at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlRejection {
    #[error("invalid URL: {0}")]
    Malformed(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("internal hostname not allowed: {0}")]
    InternalHost(String),

    #[error("private or reserved IP address not allowed: {0}")]
    BlockedAddress(IpAddr),
}

/// Why an outbound connection was refused at connect time.
#[derive(Debug, Error)]
pub enum ConnectRejection {
    #[error("DNS resolution failed for {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddresses(String),

    #[error("{host} resolves to blocked address {ip}")]
    BlockedAddress { host: String, ip: IpAddr },
}

/// Failure of a single delivery attempt.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid webhook URL: {0}")]
    InvalidUrl(String),

    #[error("blocked destination: {0}")]
    Blocked(#[from] ConnectRejection),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("delivery timed out")]
    Timeout,

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// HTTP status carried by the failure, if the endpoint answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Failure constructing a delivery client.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid User-Agent {0:?}")]
    UserAgent(String),
}

/// Failure of the webhook registry query.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
}

/// Failure loading an organization's active webhooks.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure talking to a directory cache backend.
///
/// Never fatal: the directory falls back to the store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
