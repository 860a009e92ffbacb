use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::broker::{Broker, FetchedMessage, TopicReader, TopicWriter};
use crate::error::EventBusError;
use crate::event::Event;
use crate::metrics::{ErrorStage, InstrumentationSink};
use crate::topics::TopicRegistry;

// ============================================================================
// Consumer
// ============================================================================
//
// At-least-once processing of one stream within a consumer group. Per
// message, strictly in sequence: fetch, decode, handle, commit. The offset
// only advances after the handler succeeds, so nothing is lost before the
// last committed position; a handler failure skips the commit and the loop
// moves on. There is no in-run retry; redelivery happens only if the
// process restarts before a later commit passes the message.
//
// The loop never terminates on a per-message error. Only cancellation or
// an escalated run of consecutive commit failures ends it.
//
// ============================================================================

/// Caller-supplied per-message handler. Must be safe to call repeatedly;
/// the Event is handed over by value.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: CancellationToken, event: Event) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can serve as handlers.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(CancellationToken, Event) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, ctx: CancellationToken, event: Event) -> anyhow::Result<()> {
        (self.0)(ctx, event).await
    }
}

#[derive(Clone)]
pub struct ConsumerOptions {
    /// Upper bound on one blocking fetch.
    pub fetch_max_wait: Duration,
    /// Pause after a failed fetch before retrying, so a down broker is not
    /// hammered in a tight loop.
    pub error_backoff: Duration,
    /// End the run loop after this many consecutive commit failures.
    /// `None` (the default) keeps the loop alive indefinitely.
    pub commit_failure_threshold: Option<u32>,
    /// Copy undecodable and handler-rejected messages to this writer.
    pub dead_letter: Option<Arc<dyn TopicWriter>>,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            fetch_max_wait: Duration::from_secs(10),
            error_backoff: Duration::from_millis(500),
            commit_failure_threshold: None,
            dead_letter: None,
        }
    }
}

impl ConsumerOptions {
    pub fn fetch_max_wait(mut self, max_wait: Duration) -> Self {
        self.fetch_max_wait = max_wait;
        self
    }

    pub fn error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn commit_failure_threshold(mut self, threshold: u32) -> Self {
        self.commit_failure_threshold = Some(threshold);
        self
    }

    pub fn dead_letter(mut self, writer: Arc<dyn TopicWriter>) -> Self {
        self.dead_letter = Some(writer);
        self
    }
}

pub struct Consumer {
    stream: String,
    group: String,
    reader: Box<dyn TopicReader>,
    sink: Arc<dyn InstrumentationSink>,
    options: ConsumerOptions,
}

impl Consumer {
    pub fn new(
        broker: &dyn Broker,
        registry: &TopicRegistry,
        stream: &str,
        group: &str,
        sink: Arc<dyn InstrumentationSink>,
        options: ConsumerOptions,
    ) -> Result<Self, EventBusError> {
        let broker_topic = registry.resolve(stream)?;
        let reader = broker
            .reader(broker_topic, group)
            .map_err(|e| EventBusError::BrokerRead {
                topic: broker_topic.to_string(),
                cause: e,
            })?;

        Ok(Self {
            stream: stream.to_string(),
            group: group.to_string(),
            reader,
            sink,
            options,
        })
    }

    /// Drive the fetch/decode/handle/commit loop until `token` is
    /// cancelled. Exactly one caller may drive a consumer instance;
    /// parallelism comes from running more instances in the same group.
    ///
    /// Returns `EventBusError::Cancelled` on shutdown, or `BrokerCommit`
    /// if the configured consecutive-commit-failure threshold is crossed.
    pub async fn run<H>(
        &mut self,
        token: CancellationToken,
        handler: &H,
    ) -> Result<(), EventBusError>
    where
        H: EventHandler + ?Sized,
    {
        tracing::info!(
            topic = %self.stream,
            group = %self.group,
            "Consumer run loop started"
        );
        let mut consecutive_commit_failures: u32 = 0;

        loop {
            let fetched = tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(topic = %self.stream, group = %self.group, "Consumer cancelled");
                    return Err(EventBusError::Cancelled);
                }
                fetched = self.reader.fetch(self.options.fetch_max_wait) => fetched,
            };

            let message = match fetched {
                Ok(Some(message)) => message,
                // Wait bound elapsed; go straight back to fetching.
                Ok(None) => continue,
                Err(error) => {
                    self.sink.record_error(&self.stream, ErrorStage::Consume);
                    tracing::warn!(
                        topic = %self.stream,
                        group = %self.group,
                        error = %error,
                        "Fetch failed, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => return Err(EventBusError::Cancelled),
                        _ = tokio::time::sleep(self.options.error_backoff) => {}
                    }
                    continue;
                }
            };

            let started = Instant::now();

            let event = match Event::from_bytes(&message.payload) {
                Ok(event) => event,
                Err(error) => {
                    // Malformed message: dropped, never committed, never
                    // retried in this run.
                    self.sink.record_error(&self.stream, ErrorStage::Unmarshal);
                    tracing::error!(
                        topic = %self.stream,
                        partition = message.partition,
                        offset = message.offset,
                        error = %error,
                        "Dropping undecodable message"
                    );
                    self.dead_letter(&message, "unmarshal").await;
                    continue;
                }
            };

            let event_id = event.id;
            if let Err(cause) = handler.handle(token.child_token(), event).await {
                let error = EventBusError::Handler(cause);
                self.sink.record_error(&self.stream, ErrorStage::Handle);
                tracing::warn!(
                    topic = %self.stream,
                    group = %self.group,
                    event_id = %event_id,
                    offset = message.offset,
                    error = %error,
                    "Handler rejected event, skipping commit"
                );
                self.dead_letter(&message, "handler").await;
                continue;
            }

            match self.reader.commit(&message).await {
                Ok(()) => {
                    consecutive_commit_failures = 0;
                    self.sink.record_consumed(&self.stream);
                    self.sink
                        .observe_consume_latency(&self.stream, started.elapsed());
                    tracing::debug!(
                        topic = %self.stream,
                        group = %self.group,
                        event_id = %event_id,
                        partition = message.partition,
                        offset = message.offset,
                        "Event handled and committed"
                    );
                }
                Err(error) => {
                    // A later successful commit still advances past this
                    // message; at worst it is reprocessed after a restart.
                    consecutive_commit_failures += 1;
                    self.sink.record_error(&self.stream, ErrorStage::Commit);
                    tracing::error!(
                        topic = %self.stream,
                        group = %self.group,
                        offset = message.offset,
                        failures = consecutive_commit_failures,
                        error = %error,
                        "Offset commit failed, continuing"
                    );
                    if let Some(threshold) = self.options.commit_failure_threshold {
                        if consecutive_commit_failures >= threshold {
                            return Err(EventBusError::BrokerCommit {
                                topic: self.stream.clone(),
                                cause: error,
                            });
                        }
                    }
                }
            }
        }
    }

    async fn dead_letter(&self, message: &FetchedMessage, reason: &str) {
        let Some(writer) = &self.options.dead_letter else {
            return;
        };
        let Some(headers) = &message.headers else {
            tracing::warn!(
                topic = %self.stream,
                offset = message.offset,
                "Cannot dead-letter message without headers"
            );
            return;
        };
        if let Err(error) = writer
            .append(&message.key, headers, &message.payload, Duration::from_secs(5))
            .await
        {
            tracing::warn!(
                topic = %self.stream,
                offset = message.offset,
                reason = %reason,
                error = %error,
                "Dead-letter append failed"
            );
        }
    }

    /// Release the broker connection. Consuming `self` makes a double
    /// close unrepresentable.
    pub async fn close(mut self) -> Result<(), EventBusError> {
        self.reader
            .close()
            .await
            .map_err(|e| EventBusError::BrokerRead {
                topic: self.stream.clone(),
                cause: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_default_to_no_escalation_and_no_dead_letter() {
        let options = ConsumerOptions::default();
        assert!(options.commit_failure_threshold.is_none());
        assert!(options.dead_letter.is_none());
        assert_eq!(options.fetch_max_wait, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn fn_handler_adapts_closures() {
        let handler = FnHandler(|_ctx, event: Event| async move {
            anyhow::ensure!(event.event_type == "user.created", "unexpected type");
            Ok(())
        });

        let event = Event::new("user.created", "auth-service", serde_json::Map::new());
        handler
            .handle(CancellationToken::new(), event)
            .await
            .unwrap();
    }
}
