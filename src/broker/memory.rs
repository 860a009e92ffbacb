use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::broker::{Broker, FetchedMessage, MessageHeaders, TopicReader, TopicWriter};

// ============================================================================
// In-Memory Broker
// ============================================================================
//
// A process-local stand-in for the real broker offering the same four
// primitives: key-hashed partitions per topic, append-only per-partition
// logs, per-group committed offsets, and blocking fetch. Used by the
// integration tests and for running a service locally without Kafka.
//
// A reader's in-flight position advances on fetch independently of the
// committed offset, so an uncommitted message is redelivered only to a
// fresh reader of the same group (at-least-once semantics).
//
// ============================================================================

const DEFAULT_PARTITIONS: usize = 4;

#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

struct Shared {
    partitions: usize,
    state: Mutex<HashMap<String, TopicState>>,
    appended: Notify,
}

#[derive(Default)]
struct TopicState {
    partitions: Vec<Vec<StoredMessage>>,
    /// (group, partition) -> next offset to deliver to a fresh reader.
    committed: HashMap<(String, usize), i64>,
    fail_writes: bool,
    fail_fetches: bool,
    fail_commits: bool,
}

struct StoredMessage {
    key: String,
    headers: MessageHeaders,
    payload: Vec<u8>,
}

impl TopicState {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            committed: HashMap::new(),
            fail_writes: false,
            fail_fetches: false,
            fail_commits: false,
        }
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                partitions: partitions.max(1),
                state: Mutex::new(HashMap::new()),
                appended: Notify::new(),
            }),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.shared.partitions
    }

    /// The partition a key routes to, for asserting per-partition state.
    pub fn partition_for_key(&self, key: &str) -> i32 {
        partition_for(key, self.shared.partitions) as i32
    }

    /// Make every append on `topic` fail, to simulate a broker outage on
    /// one topic's channel.
    pub async fn fail_writes(&self, topic: &str, fail: bool) {
        let mut state = self.shared.state.lock().await;
        state
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.shared.partitions))
            .fail_writes = fail;
    }

    /// Make every fetch on `topic` fail, to exercise read-error handling.
    pub async fn fail_fetches(&self, topic: &str, fail: bool) {
        let mut state = self.shared.state.lock().await;
        state
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.shared.partitions))
            .fail_fetches = fail;
    }

    /// Make every offset commit on `topic` fail, to exercise commit-error
    /// handling.
    pub async fn fail_commits(&self, topic: &str, fail: bool) {
        let mut state = self.shared.state.lock().await;
        state
            .entry(topic.to_string())
            .or_insert_with(|| TopicState::new(self.shared.partitions))
            .fail_commits = fail;
    }

    pub async fn message_count(&self, topic: &str) -> usize {
        let state = self.shared.state.lock().await;
        state
            .get(topic)
            .map(|t| t.partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub async fn committed_offset(
        &self,
        topic: &str,
        group: &str,
        partition: i32,
    ) -> Option<i64> {
        let state = self.shared.state.lock().await;
        state
            .get(topic)?
            .committed
            .get(&(group.to_string(), partition as usize))
            .copied()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for MemoryBroker {
    fn writer(&self, topic: &str) -> Result<Arc<dyn TopicWriter>> {
        Ok(Arc::new(MemoryTopicWriter {
            shared: self.shared.clone(),
            topic: topic.to_string(),
        }))
    }

    fn reader(&self, topic: &str, group: &str) -> Result<Box<dyn TopicReader>> {
        Ok(Box::new(MemoryTopicReader {
            shared: self.shared.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            positions: None,
            cursor: 0,
        }))
    }
}

fn partition_for(key: &str, partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % partitions
}

struct MemoryTopicWriter {
    shared: Arc<Shared>,
    topic: String,
}

#[async_trait]
impl TopicWriter for MemoryTopicWriter {
    async fn append(
        &self,
        key: &str,
        headers: &MessageHeaders,
        payload: &[u8],
        _timeout: Duration,
    ) -> Result<()> {
        {
            let mut state = self.shared.state.lock().await;
            let topic = state
                .entry(self.topic.clone())
                .or_insert_with(|| TopicState::new(self.shared.partitions));

            if topic.fail_writes {
                bail!("injected write failure on topic '{}'", self.topic);
            }

            let partition = partition_for(key, self.shared.partitions);
            topic.partitions[partition].push(StoredMessage {
                key: key.to_string(),
                headers: headers.clone(),
                payload: payload.to_vec(),
            });
        }
        self.shared.appended.notify_waiters();
        Ok(())
    }

    async fn close(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

struct MemoryTopicReader {
    shared: Arc<Shared>,
    topic: String,
    group: String,
    /// Per-partition next-fetch position; seeded from the group's committed
    /// offsets on first fetch.
    positions: Option<Vec<i64>>,
    cursor: usize,
}

impl MemoryTopicReader {
    async fn try_next(&mut self) -> Result<Option<FetchedMessage>> {
        let mut state = self.shared.state.lock().await;
        let topic = state
            .entry(self.topic.clone())
            .or_insert_with(|| TopicState::new(self.shared.partitions));

        if topic.fail_fetches {
            bail!("injected fetch failure on topic '{}'", self.topic);
        }

        let partitions = self.shared.partitions;
        let group = &self.group;
        let positions = self.positions.get_or_insert_with(|| {
            (0..partitions)
                .map(|p| {
                    topic
                        .committed
                        .get(&(group.clone(), p))
                        .copied()
                        .unwrap_or(0)
                })
                .collect()
        });

        // Round-robin over partitions so one busy key cannot starve others.
        for i in 0..partitions {
            let partition = (self.cursor + i) % partitions;
            let position = positions[partition];
            if let Some(stored) = topic.partitions[partition].get(position as usize) {
                positions[partition] += 1;
                self.cursor = (partition + 1) % partitions;
                return Ok(Some(FetchedMessage {
                    topic: self.topic.clone(),
                    partition: partition as i32,
                    offset: position,
                    key: stored.key.clone(),
                    headers: Some(stored.headers.clone()),
                    payload: stored.payload.clone(),
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TopicReader for MemoryTopicReader {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<FetchedMessage>> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register for the append signal before checking, so an append
            // racing this check still wakes the wait below.
            let shared = self.shared.clone();
            let notified = shared.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_next().await? {
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, message: &FetchedMessage) -> Result<()> {
        let mut state = self.shared.state.lock().await;
        let topic = state
            .entry(self.topic.clone())
            .or_insert_with(|| TopicState::new(self.shared.partitions));
        if topic.fail_commits {
            bail!("injected commit failure on topic '{}'", self.topic);
        }
        topic.committed.insert(
            (self.group.clone(), message.partition as usize),
            message.offset + 1,
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.positions = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> MessageHeaders {
        MessageHeaders {
            event_id: "e1".to_string(),
            event_type: "user.created".to_string(),
            source: "auth-service".to_string(),
        }
    }

    #[tokio::test]
    async fn fetch_returns_none_after_wait_bound() {
        let broker = MemoryBroker::new();
        let mut reader = broker.reader("t", "g").unwrap();

        let fetched = reader
            .fetch(Duration::from_millis(50))
            .await
            .unwrap();
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn fetch_wakes_on_append() {
        let broker = MemoryBroker::new();
        let writer = broker.writer("t").unwrap();
        let mut reader = broker.reader("t", "g").unwrap();

        let write = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .append("k", &headers(), b"body", Duration::from_secs(1))
                .await
        });

        let fetched = reader.fetch(Duration::from_secs(5)).await.unwrap();
        write.await.unwrap().unwrap();

        let message = fetched.expect("append should wake the fetch");
        assert_eq!(message.payload, b"body");
        assert_eq!(message.offset, 0);
        assert_eq!(message.headers.unwrap(), headers());
    }

    #[tokio::test]
    async fn same_key_routes_to_one_partition() {
        let broker = MemoryBroker::new();
        let writer = broker.writer("t").unwrap();
        for _ in 0..5 {
            writer
                .append("u1", &headers(), b"m", Duration::from_secs(1))
                .await
                .unwrap();
        }

        let partition = broker.partition_for_key("u1");
        let state = broker.shared.state.lock().await;
        assert_eq!(state["t"].partitions[partition as usize].len(), 5);
    }

    #[tokio::test]
    async fn fresh_reader_resumes_from_committed_offset() {
        let broker = MemoryBroker::new();
        let writer = broker.writer("t").unwrap();
        for body in [b"m0", b"m1"] {
            writer
                .append("u1", &headers(), body, Duration::from_secs(1))
                .await
                .unwrap();
        }

        let mut reader = broker.reader("t", "g").unwrap();
        let first = reader
            .fetch(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        reader.commit(&first).await.unwrap();

        // Second message fetched but never committed.
        let second = reader
            .fetch(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.payload, b"m1");

        let mut restarted = broker.reader("t", "g").unwrap();
        let redelivered = restarted
            .fetch(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(redelivered.payload, b"m1");
        assert_eq!(redelivered.offset, second.offset);
    }

    #[tokio::test]
    async fn injected_failure_rejects_appends() {
        let broker = MemoryBroker::new();
        broker.fail_writes("t", true).await;

        let writer = broker.writer("t").unwrap();
        let result = writer
            .append("k", &headers(), b"m", Duration::from_secs(1))
            .await;
        assert!(result.is_err());
        assert_eq!(broker.message_count("t").await, 0);
    }

    #[tokio::test]
    async fn injected_failures_reject_fetch_and_commit() {
        let broker = MemoryBroker::new();
        let writer = broker.writer("t").unwrap();
        writer
            .append("k", &headers(), b"m", Duration::from_secs(1))
            .await
            .unwrap();

        broker.fail_fetches("t", true).await;
        let mut reader = broker.reader("t", "g").unwrap();
        assert!(reader.fetch(Duration::from_millis(50)).await.is_err());

        broker.fail_fetches("t", false).await;
        let message = reader
            .fetch(Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();

        broker.fail_commits("t", true).await;
        assert!(reader.commit(&message).await.is_err());
        assert_eq!(
            broker.committed_offset("t", "g", message.partition).await,
            None
        );

        broker.fail_commits("t", false).await;
        reader.commit(&message).await.unwrap();
        assert_eq!(
            broker.committed_offset("t", "g", message.partition).await,
            Some(message.offset + 1)
        );
    }
}
