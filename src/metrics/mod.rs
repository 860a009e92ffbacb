// Private module declaration
mod server;

use std::time::Duration;

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

// Re-export for public API
pub use server::start_metrics_server;

// ============================================================================
// Instrumentation Sink - Prometheus metrics for the event bus
// ============================================================================
//
// The Producer and Consumer call into an InstrumentationSink on every
// outcome. Sink calls are synchronous and must never affect message flow,
// so every implementation here records without returning errors.
//
// Exposed instruments:
// - events produced / consumed (labeled by topic)
// - produce / consume latency distributions (labeled by topic)
// - errors (labeled by topic and stage: produce/consume/unmarshal/handle/commit)
//
// ============================================================================

/// Where in the pipeline an error was counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStage {
    Produce,
    Consume,
    Unmarshal,
    Handle,
    Commit,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Produce => "produce",
            ErrorStage::Consume => "consume",
            ErrorStage::Unmarshal => "unmarshal",
            ErrorStage::Handle => "handle",
            ErrorStage::Commit => "commit",
        }
    }
}

pub trait InstrumentationSink: Send + Sync {
    fn record_produced(&self, topic: &str);
    fn record_consumed(&self, topic: &str);
    fn observe_produce_latency(&self, topic: &str, latency: Duration);
    fn observe_consume_latency(&self, topic: &str, latency: Duration);
    fn record_error(&self, topic: &str, stage: ErrorStage);
}

/// Sink that records nothing; the test double.
pub struct NoopSink;

impl InstrumentationSink for NoopSink {
    fn record_produced(&self, _topic: &str) {}
    fn record_consumed(&self, _topic: &str) {}
    fn observe_produce_latency(&self, _topic: &str, _latency: Duration) {}
    fn observe_consume_latency(&self, _topic: &str, _latency: Duration) {}
    fn record_error(&self, _topic: &str, _stage: ErrorStage) {}
}

/// Prometheus-backed sink, one per process, shared by every Producer and
/// Consumer instance.
pub struct PrometheusSink {
    registry: Registry,

    events_produced: IntCounterVec,
    events_consumed: IntCounterVec,
    produce_duration: HistogramVec,
    consume_duration: HistogramVec,
    event_errors: IntCounterVec,
}

impl PrometheusSink {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_produced = IntCounterVec::new(
            Opts::new("events_produced_total", "Total events published per topic"),
            &["topic"],
        )?;
        registry.register(Box::new(events_produced.clone()))?;

        let events_consumed = IntCounterVec::new(
            Opts::new(
                "events_consumed_total",
                "Total events handled and committed per topic",
            ),
            &["topic"],
        )?;
        registry.register(Box::new(events_consumed.clone()))?;

        let produce_duration = HistogramVec::new(
            HistogramOpts::new(
                "event_produce_duration_seconds",
                "Publish latency up to broker acknowledgment",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["topic"],
        )?;
        registry.register(Box::new(produce_duration.clone()))?;

        let consume_duration = HistogramVec::new(
            HistogramOpts::new(
                "event_consume_duration_seconds",
                "Per-message decode+handle+commit latency",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["topic"],
        )?;
        registry.register(Box::new(consume_duration.clone()))?;

        let event_errors = IntCounterVec::new(
            Opts::new("event_errors_total", "Event bus errors per topic and stage"),
            &["topic", "stage"],
        )?;
        registry.register(Box::new(event_errors.clone()))?;

        Ok(Self {
            registry,
            events_produced,
            events_consumed,
            produce_duration,
            consume_duration,
            event_errors,
        })
    }

    /// The registry backing this sink, for the /metrics endpoint.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl InstrumentationSink for PrometheusSink {
    fn record_produced(&self, topic: &str) {
        self.events_produced.with_label_values(&[topic]).inc();
    }

    fn record_consumed(&self, topic: &str) {
        self.events_consumed.with_label_values(&[topic]).inc();
    }

    fn observe_produce_latency(&self, topic: &str, latency: Duration) {
        self.produce_duration
            .with_label_values(&[topic])
            .observe(latency.as_secs_f64());
    }

    fn observe_consume_latency(&self, topic: &str, latency: Duration) {
        self.consume_duration
            .with_label_values(&[topic])
            .observe(latency.as_secs_f64());
    }

    fn record_error(&self, topic: &str, stage: ErrorStage) {
        self.event_errors
            .with_label_values(&[topic, stage.as_str()])
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_creation() {
        let sink = PrometheusSink::new().unwrap();
        assert!(!sink.registry.gather().is_empty());
    }

    #[test]
    fn test_record_produced() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_produced("users");
        sink.record_produced("users");
        sink.observe_produce_latency("users", Duration::from_millis(3));

        let gathered = sink.registry.gather();
        let produced = gathered
            .iter()
            .find(|m| m.name() == "events_produced_total")
            .unwrap();
        assert_eq!(produced.metric[0].counter.value, Some(2.0));
    }

    #[test]
    fn test_record_errors_by_stage() {
        let sink = PrometheusSink::new().unwrap();
        sink.record_error("users", ErrorStage::Unmarshal);
        sink.record_error("users", ErrorStage::Handle);
        sink.record_error("users", ErrorStage::Handle);

        let gathered = sink.registry.gather();
        let errors = gathered
            .iter()
            .find(|m| m.name() == "event_errors_total")
            .unwrap();
        assert_eq!(errors.metric.len(), 2); // Two different stage labels
    }
}
