use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;

use crate::broker::{
    Broker, FetchedMessage, MessageHeaders, TopicReader, TopicWriter, HEADER_EVENT_ID,
    HEADER_EVENT_TYPE, HEADER_SOURCE,
};
use crate::config::BrokerConfig;

// ============================================================================
// Kafka Broker Implementation
// ============================================================================
//
// One FutureProducer per topic writer, so backpressure and batching on one
// topic's channel never block another's. One StreamConsumer per reader with
// auto-commit disabled; progress only moves when the consumer commits.
//
// ============================================================================

pub struct KafkaBroker {
    config: BrokerConfig,
}

impl KafkaBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }
}

impl Broker for KafkaBroker {
    fn writer(&self, topic: &str) -> Result<Arc<dyn TopicWriter>> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set(
                "message.timeout.ms",
                self.config.message_timeout.as_millis().to_string(),
            )
            .create()
            .with_context(|| format!("failed to create producer for topic '{topic}'"))?;

        Ok(Arc::new(KafkaTopicWriter {
            topic: topic.to_string(),
            producer,
        }))
    }

    fn reader(&self, topic: &str, group: &str) -> Result<Box<dyn TopicReader>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("fetch.min.bytes", self.config.fetch_min_bytes.to_string())
            .set(
                "fetch.message.max.bytes",
                self.config.fetch_max_bytes.to_string(),
            )
            .set(
                "fetch.wait.max.ms",
                self.config.fetch_max_wait.as_millis().to_string(),
            )
            .create()
            .with_context(|| format!("failed to create consumer for group '{group}'"))?;

        consumer
            .subscribe(&[topic])
            .with_context(|| format!("failed to subscribe to topic '{topic}'"))?;

        Ok(Box::new(KafkaTopicReader {
            topic: topic.to_string(),
            consumer: Arc::new(consumer),
        }))
    }
}

struct KafkaTopicWriter {
    topic: String,
    producer: FutureProducer,
}

#[async_trait]
impl TopicWriter for KafkaTopicWriter {
    async fn append(
        &self,
        key: &str,
        headers: &MessageHeaders,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let record = FutureRecord::to(&self.topic)
            .key(key)
            .payload(payload)
            .headers(
                OwnedHeaders::new()
                    .insert(Header {
                        key: HEADER_EVENT_ID,
                        value: Some(headers.event_id.as_str()),
                    })
                    .insert(Header {
                        key: HEADER_EVENT_TYPE,
                        value: Some(headers.event_type.as_str()),
                    })
                    .insert(Header {
                        key: HEADER_SOURCE,
                        value: Some(headers.source.as_str()),
                    }),
            );

        self.producer
            .send(record, Timeout::After(timeout))
            .await
            .map(|_delivery| ())
            .map_err(|(e, _)| anyhow::anyhow!("kafka send error: {e}"))
    }

    async fn close(&self, timeout: Duration) -> Result<()> {
        // flush blocks inside librdkafka; keep it off the executor threads.
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || {
            producer
                .flush(Timeout::After(timeout))
                .map_err(|e| anyhow::anyhow!("kafka flush error: {e}"))
        })
        .await
        .map_err(|e| anyhow::anyhow!("kafka flush task failed: {e}"))?
    }
}

struct KafkaTopicReader {
    topic: String,
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl TopicReader for KafkaTopicReader {
    async fn fetch(&mut self, max_wait: Duration) -> Result<Option<FetchedMessage>> {
        let message = match tokio::time::timeout(max_wait, self.consumer.recv()).await {
            // Wait bound elapsed with nothing assigned/available.
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(anyhow::anyhow!("kafka receive error: {e}")),
            Ok(Ok(message)) => message,
        };

        let key = message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let payload = message.payload().unwrap_or_default().to_vec();

        Ok(Some(FetchedMessage {
            topic: self.topic.clone(),
            partition: message.partition(),
            offset: message.offset(),
            key,
            headers: message.headers().and_then(decode_headers),
            payload,
        }))
    }

    async fn commit(&mut self, message: &FetchedMessage) -> Result<()> {
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(
                &self.topic,
                message.partition,
                Offset::Offset(message.offset + 1),
            )
            .map_err(|e| anyhow::anyhow!("invalid commit position: {e}"))?;

        // A sync commit blocks inside librdkafka until the broker responds;
        // keep it off the executor threads.
        let consumer = self.consumer.clone();
        tokio::task::spawn_blocking(move || {
            consumer
                .commit(&offsets, CommitMode::Sync)
                .map_err(|e| anyhow::anyhow!("kafka commit error: {e}"))
        })
        .await
        .map_err(|e| anyhow::anyhow!("kafka commit task failed: {e}"))?
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        Ok(())
    }
}

fn decode_headers<H: Headers>(raw: &H) -> Option<MessageHeaders> {
    let mut event_id = None;
    let mut event_type = None;
    let mut source = None;

    for header in raw.iter() {
        let value = header
            .value
            .map(|v| String::from_utf8_lossy(v).into_owned());
        match header.key {
            HEADER_EVENT_ID => event_id = value,
            HEADER_EVENT_TYPE => event_type = value,
            HEADER_SOURCE => source = value,
            _ => {}
        }
    }

    Some(MessageHeaders {
        event_id: event_id?,
        event_type: event_type?,
        source: source?,
    })
}
