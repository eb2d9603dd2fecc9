use std::sync::Arc;
use std::time::Duration;

use albumlist_worker_job::{JobEnvelope, TaskOutcome};
use tracing::warn;

use crate::{Broker, Result, ResultStore};

/// A named queue on a [`Broker`] that speaks envelopes instead of raw strings.
#[derive(Debug, Clone)]
pub struct JobQueue {
    broker: Arc<dyn Broker>,
    name: String,
}

impl JobQueue {
    pub fn new(broker: Arc<dyn Broker>, name: impl Into<String>) -> Self {
        Self {
            broker,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub async fn push(&self, envelope: &JobEnvelope) -> Result<()> {
        let payload = envelope.encode()?;
        self.broker.push(&self.name, payload).await
    }

    /// Waits for the next well-formed envelope.
    ///
    /// Entries that do not decode are logged and dropped; only transport
    /// errors are returned.
    pub async fn pop(&self) -> Result<JobEnvelope> {
        loop {
            let raw = self.broker.pop_blocking(&self.name).await?;
            if let Some(envelope) = self.decode_or_discard(&raw) {
                return Ok(envelope);
            }
        }
    }

    /// Like [`JobQueue::pop`] but returns `None` once the queue is empty.
    pub async fn try_pop(&self) -> Result<Option<JobEnvelope>> {
        while let Some(raw) = self.broker.try_pop(&self.name).await? {
            if let Some(envelope) = self.decode_or_discard(&raw) {
                return Ok(Some(envelope));
            }
        }
        Ok(None)
    }

    pub async fn len(&self) -> Result<usize> {
        self.broker.len(&self.name).await
    }

    fn decode_or_discard(&self, raw: &str) -> Option<JobEnvelope> {
        match JobEnvelope::decode(raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(queue = %self.name, error = %e, raw, "Discarding malformed envelope");
                None
            }
        }
    }
}

/// Stores `outcome` under `key` for `ttl`.
pub async fn publish_outcome(
    store: &dyn ResultStore,
    key: &str,
    outcome: &TaskOutcome,
    ttl: Duration,
) -> Result<()> {
    let value = serde_json::to_string(outcome)?;
    store.set(key, value, ttl).await
}

/// Reads the outcome published under `key`, if it is still live.
pub async fn fetch_outcome(store: &dyn ResultStore, key: &str) -> Result<Option<TaskOutcome>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryBroker, MemoryResultStore};
    use serde_json::json;

    #[tokio::test]
    async fn test_pop_skips_malformed_entries() {
        let broker = Arc::new(MemoryBroker::new());
        let queue = JobQueue::new(broker.clone(), "deferred_queue");

        broker
            .push("deferred_queue", "{garbage".into())
            .await
            .unwrap();
        let envelope = JobEnvelope::new("deferred_queue", "clear-cache", json!({}));
        queue.push(&envelope).await.unwrap();

        assert_eq!(queue.pop().await.unwrap(), envelope);
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_try_pop_on_empty_queue() {
        let queue = JobQueue::new(Arc::new(MemoryBroker::new()), "q");
        assert_eq!(queue.try_pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_outcome_round_trip_through_store() {
        let store = MemoryResultStore::new();
        let outcome = TaskOutcome::Ok { value: json!({ "count": 2 }) };
        publish_outcome(&store, "q:result:1", &outcome, Duration::from_secs(500))
            .await
            .unwrap();

        assert_eq!(fetch_outcome(&store, "q:result:1").await.unwrap(), Some(outcome));
        assert_eq!(fetch_outcome(&store, "q:result:2").await.unwrap(), None);
    }
}
