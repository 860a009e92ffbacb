use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broker::{Broker, MessageHeaders, TopicWriter};
use crate::config::BrokerConfig;
use crate::error::EventBusError;
use crate::event::Event;
use crate::metrics::{ErrorStage, InstrumentationSink};
use crate::topics::TopicRegistry;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Producer
// ============================================================================
//
// Publishes Events to registered streams. One writer handle per topic,
// opened once at construction, each behind its own circuit breaker: a
// broker outage on one stream trips only that stream's channel and leaves
// the others publishing.
//
// `publish` blocks until the broker acknowledges; `publish_async` detaches
// the same operation onto the runtime and reports failures only through
// logs and the instrumentation sink.
//
// ============================================================================

struct TopicChannel {
    broker_topic: String,
    writer: Arc<dyn TopicWriter>,
    breaker: CircuitBreaker,
}

struct ProducerInner {
    channels: HashMap<String, TopicChannel>,
    sink: Arc<dyn InstrumentationSink>,
    publish_timeout: Duration,
}

/// Cheaply cloneable handle; clones share the per-topic channels.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    /// Open one channel per registered stream. Fails fast if the broker
    /// rejects any channel handle.
    pub fn new(
        broker: &dyn Broker,
        registry: &TopicRegistry,
        sink: Arc<dyn InstrumentationSink>,
        config: &BrokerConfig,
    ) -> Result<Self, EventBusError> {
        let mut channels = HashMap::new();
        for (stream, broker_topic) in registry.streams() {
            let writer = broker
                .writer(broker_topic)
                .map_err(|e| EventBusError::BrokerWrite {
                    topic: broker_topic.to_string(),
                    cause: e,
                })?;
            channels.insert(
                stream.to_string(),
                TopicChannel {
                    broker_topic: broker_topic.to_string(),
                    writer,
                    breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
                },
            );
        }

        Ok(Self {
            inner: Arc::new(ProducerInner {
                channels,
                sink,
                publish_timeout: config.publish_timeout,
            }),
        })
    }

    /// Publish one event, blocking until broker acknowledgment or the
    /// configured timeout. Latency and a produced/error counter are
    /// recorded for every outcome.
    pub async fn publish(
        &self,
        stream: &str,
        key: &str,
        event: &Event,
    ) -> Result<(), EventBusError> {
        let started = Instant::now();
        let result = self.publish_inner(stream, key, event).await;
        self.inner
            .sink
            .observe_produce_latency(stream, started.elapsed());

        match &result {
            Ok(()) => {
                self.inner.sink.record_produced(stream);
                tracing::debug!(
                    topic = %stream,
                    key = %key,
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Published event"
                );
            }
            Err(error) => {
                self.inner.sink.record_error(stream, ErrorStage::Produce);
                tracing::error!(
                    topic = %stream,
                    key = %key,
                    event_id = %event.id,
                    error = %error,
                    "Failed to publish event"
                );
            }
        }
        result
    }

    async fn publish_inner(
        &self,
        stream: &str,
        key: &str,
        event: &Event,
    ) -> Result<(), EventBusError> {
        let channel =
            self.inner
                .channels
                .get(stream)
                .ok_or_else(|| EventBusError::TopicNotRegistered {
                    topic: stream.to_string(),
                })?;

        event.validate()?;
        let payload = event.to_bytes()?;
        let headers = MessageHeaders {
            event_id: event.id.to_string(),
            event_type: event.event_type.clone(),
            source: event.source.clone(),
        };

        channel
            .breaker
            .call(channel.writer.append(key, &headers, &payload, self.inner.publish_timeout))
            .await
            .map_err(|e| match e {
                CircuitBreakerError::CircuitOpen => EventBusError::BrokerWrite {
                    topic: channel.broker_topic.clone(),
                    cause: anyhow::anyhow!("circuit breaker open for topic channel"),
                },
                CircuitBreakerError::OperationFailed(source) => EventBusError::BrokerWrite {
                    topic: channel.broker_topic.clone(),
                    cause: source,
                },
            })
    }

    /// Fire-and-forget publish: schedules the operation on the runtime and
    /// returns immediately. Failures are observable only through logs and
    /// the instrumentation sink; callers needing delivery confirmation
    /// must use `publish`.
    pub fn publish_async(&self, stream: &str, key: &str, event: Event) -> tokio::task::JoinHandle<()> {
        let producer = self.clone();
        let stream = stream.to_string();
        let key = key.to_string();
        tokio::spawn(async move {
            // Outcome is already logged and counted inside publish.
            let _ = producer.publish(&stream, &key, &event).await;
        })
    }

    /// Best-effort close of every channel: all writers are attempted, the
    /// last failure (if any) is surfaced.
    pub async fn close(&self, timeout: Duration) -> Result<(), EventBusError> {
        let mut last_error = None;
        for (stream, channel) in &self.inner.channels {
            if let Err(error) = channel.writer.close(timeout).await {
                tracing::warn!(
                    topic = %stream,
                    error = %error,
                    "Failed to close topic channel"
                );
                last_error = Some(EventBusError::BrokerWrite {
                    topic: channel.broker_topic.clone(),
                    cause: error,
                });
            }
        }
        match last_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::metrics::NoopSink;
    use crate::topics::streams;
    use serde_json::{Map, Value};

    fn user_event() -> Event {
        let mut data = Map::new();
        data.insert("user_id".to_string(), Value::String("u1".to_string()));
        Event::new("user.created", "auth-service", data)
    }

    fn producer(broker: &MemoryBroker) -> Producer {
        Producer::new(
            broker,
            &TopicRegistry::platform(),
            Arc::new(NoopSink),
            &BrokerConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn publish_appends_to_registered_topic() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);

        producer
            .publish(streams::USERS, "u1", &user_event())
            .await
            .unwrap();

        assert_eq!(broker.message_count("picstream.users").await, 1);
    }

    #[tokio::test]
    async fn publish_to_unregistered_stream_fails_fast() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);

        let err = producer
            .publish("likes", "u1", &user_event())
            .await
            .unwrap_err();

        assert!(matches!(err, EventBusError::TopicNotRegistered { .. }));
        assert_eq!(broker.message_count("picstream.users").await, 0);
    }

    #[tokio::test]
    async fn publish_rejects_invalid_envelope() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        let event = Event::new("", "auth-service", Map::new());

        let err = producer
            .publish(streams::USERS, "u1", &event)
            .await
            .unwrap_err();
        assert!(matches!(err, EventBusError::EmptyField { field: "type" }));
    }

    #[tokio::test]
    async fn publish_async_is_observable_only_indirectly() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);

        let handle = producer.publish_async(streams::USERS, "u1", user_event());
        handle.await.unwrap();

        assert_eq!(broker.message_count("picstream.users").await, 1);
    }

    #[tokio::test]
    async fn close_attempts_every_channel() {
        let broker = MemoryBroker::new();
        let producer = producer(&broker);
        producer.close(Duration::from_secs(1)).await.unwrap();
    }
}
