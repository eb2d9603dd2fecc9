use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{Broker, BrokerError, Result, ResultStore};

/// In-process broker backed by one `VecDeque` per queue name.
///
/// Behaves like the Redis list backend (FIFO, blocking pop) and is what the
/// test suite and single-binary deployments use.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes the broker: pending and future pops fail with [`BrokerError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Returns a copy of the entries waiting in `queue`, head first.
    pub async fn snapshot(&self, queue: &str) -> Vec<String> {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn push(&self, queue: &str, payload: String) -> Result<()> {
        self.ensure_open()?;
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(payload);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(&self, queue: &str) -> Result<String> {
        loop {
            // Register interest before checking so a push between the check
            // and the await still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(entry) = self.try_pop(queue).await? {
                return Ok(entry);
            }

            notified.await;
        }
    }

    async fn try_pop(&self, queue: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self
            .queues
            .lock()
            .await
            .get_mut(queue)
            .and_then(VecDeque::pop_front))
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.queues.lock().await.get(queue).map_or(0, VecDeque::len))
    }
}

/// In-process result store. Expiry is measured with tokio's clock so it
/// follows paused time in tests.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many live entries remain.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.len()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }
}
