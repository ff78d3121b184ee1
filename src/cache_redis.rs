#[cfg(feature = "redis")]
use std::time::Duration;

#[cfg(feature = "redis")]
use async_trait::async_trait;
#[cfg(feature = "redis")]
use bytes::Bytes;
#[cfg(feature = "redis")]
use redis::AsyncCommands;

#[cfg(feature = "redis")]
use crate::directory::{DirectoryCache, DEFAULT_DIRECTORY_TTL};
#[cfg(feature = "redis")]
use crate::error::CacheError;

/// Directory cache shared between processes through Redis.
///
/// Entries are written with `SET key value EX ttl`.
#[cfg(feature = "redis")]
pub struct RedisDirectoryCache {
    client: redis::Client,
    prefix: String,
    ttl: Duration,
}

#[cfg(feature = "redis")]
impl RedisDirectoryCache {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            ttl: DEFAULT_DIRECTORY_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }
}

#[cfg(feature = "redis")]
#[async_trait]
impl DirectoryCache for RedisDirectoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ttl_secs = self.ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(self.key(key), value.to_vec(), ttl_secs)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }
}
