use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, trace};

use crate::{Broker, Result, ResultStore};

/// Seconds a single `BLPOP` waits before the loop re-issues it.
const BLPOP_TIMEOUT_SECS: f64 = 5.0;

/// One reconnecting connection, opened on first use and shared by clones.
#[derive(Clone)]
struct SharedConnection {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl SharedConnection {
    fn new(client: redis::Client) -> Self {
        Self {
            client,
            manager: Arc::new(OnceCell::new()),
        }
    }

    async fn get(&self) -> Result<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

impl fmt::Debug for SharedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnection")
            .field("connected", &self.manager.initialized())
            .finish()
    }
}

/// Broker backed by Redis lists (`RPUSH` to enqueue, `BLPOP` to consume).
///
/// Entries live only in Redis memory: a Redis restart without persistence
/// loses whatever was queued.
#[derive(Debug, Clone)]
pub struct RedisBroker {
    conn: SharedConnection,
}

impl RedisBroker {
    pub fn new(client: redis::Client) -> Self {
        Self {
            conn: SharedConnection::new(client),
        }
    }

    pub fn from_url(redis_url: &str) -> Result<Self> {
        Ok(Self::new(redis::Client::open(redis_url)?))
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        let mut conn = self.conn.get().await?;
        let len: i64 = conn.rpush(queue, payload).await?;
        trace!(queue, len, "Pushed envelope");
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str) -> Result<String> {
        // A dedicated connection, so the blocking call does not hold up
        // commands sent over the shared one.
        let mut conn = self
            .conn
            .client
            .get_multiplexed_async_connection()
            .await?;
        loop {
            let popped: Option<(String, String)> = conn.blpop(queue, BLPOP_TIMEOUT_SECS).await?;
            match popped {
                Some((_, payload)) => return Ok(payload),
                None => debug!(queue, "Still waiting for instruction..."),
            }
        }
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>> {
        let mut conn = self.conn.get().await?;
        let popped: Option<String> = conn.lpop(queue, None).await?;
        Ok(popped)
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let mut conn = self.conn.get().await?;
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }
}

/// Result store using `SET key value EX ttl`.
#[derive(Debug, Clone)]
pub struct RedisResultStore {
    conn: SharedConnection,
}

impl RedisResultStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            conn: SharedConnection::new(client),
        }
    }

    pub fn from_url(redis_url: &str) -> Result<Self> {
        Ok(Self::new(redis::Client::open(redis_url)?))
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.get().await?;
        // Redis rejects EX 0
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.get().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }
}
