use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

mod kafka;
mod memory;

pub use kafka::KafkaBroker;
pub use memory::MemoryBroker;

// ============================================================================
// Broker Abstraction
// ============================================================================
//
// The core needs four primitives from its broker: a partitioned append-only
// log per topic, key-based partition routing, named consumer groups, and
// manual offset commit. These traits express exactly that surface, so the
// Kafka-backed implementation and the in-memory test broker are
// interchangeable behind the Producer and Consumer.
//
// ============================================================================

pub const HEADER_EVENT_ID: &str = "event_id";
pub const HEADER_EVENT_TYPE: &str = "event_type";
pub const HEADER_SOURCE: &str = "source";

/// Header fields carried alongside the opaque body, redundant with the
/// envelope so brokers and tooling can filter without deserializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
}

/// One message pulled off a partition, addressed by (partition, offset).
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: String,
    pub headers: Option<MessageHeaders>,
    pub payload: Vec<u8>,
}

/// Outbound channel handle for a single topic. Safe for concurrent callers;
/// writes to the underlying connection are serialized per topic.
#[async_trait]
pub trait TopicWriter: Send + Sync {
    /// Append one keyed message, blocking until the broker acknowledges it
    /// or `timeout` elapses.
    async fn append(
        &self,
        key: &str,
        headers: &MessageHeaders,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()>;

    /// Flush in-flight messages and release the channel.
    async fn close(&self, timeout: Duration) -> Result<()>;
}

/// Inbound handle for one topic within one consumer group. Owned by exactly
/// one consumer instance; not shared.
#[async_trait]
pub trait TopicReader: Send + Sync {
    /// Long-poll the next message on this reader's assigned partitions.
    /// Returns `Ok(None)` when `max_wait` elapses with nothing to deliver.
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<FetchedMessage>>;

    /// Durably advance this group's committed offset past `message`.
    async fn commit(&mut self, message: &FetchedMessage) -> Result<()>;

    /// Release the broker connection. Call exactly once.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for per-topic channel handles against one broker.
pub trait Broker: Send + Sync {
    fn writer(&self, topic: &str) -> Result<Arc<dyn TopicWriter>>;

    fn reader(&self, topic: &str, group: &str) -> Result<Box<dyn TopicReader>>;
}
