use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use crate::services::{Cache, CacheError};

/// [`Cache`] over the Redis instance the web front end caches pages in.
///
/// Every key is namespaced under `prefix`, so `clear` only touches entries
/// written by the album list.
#[derive(Debug, Clone)]
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
}

impl RedisCache {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    pub fn from_url(redis_url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        Ok(Self::new(redis::Client::open(redis_url)?, prefix))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let removed: usize = conn.del(self.key(key)).await?;
        debug!(key, removed, "Invalidated cache entry");
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{}*", self.prefix))
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(());
        }
        let removed: usize = conn.del(&keys).await?;
        debug!(removed, "Cleared cache");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_prefixed() {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let cache = RedisCache::new(client, "albumlist:");
        assert_eq!(cache.key("alb-42"), "albumlist:alb-42");
    }
}
