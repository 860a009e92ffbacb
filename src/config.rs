use std::time::Duration;

// ============================================================================
// Broker Configuration
// ============================================================================
//
// Defaults are tuned for a local single-node Kafka/Redpanda; every knob can
// be overridden from the environment:
//
//   PICSTREAM_BROKERS              bootstrap servers ("host:port,...")
//   PICSTREAM_PUBLISH_TIMEOUT_MS   per-publish acknowledgment deadline
//   PICSTREAM_MESSAGE_TIMEOUT_MS   librdkafka message.timeout.ms
//   PICSTREAM_FETCH_MIN_BYTES      lower fetch batching bound
//   PICSTREAM_FETCH_MAX_BYTES      upper fetch batching bound
//   PICSTREAM_FETCH_MAX_WAIT_MS    long-poll bound for one fetch
//   PICSTREAM_METRICS_ADDR         bind address for the /metrics server
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub bootstrap_servers: String,
    /// How long a blocking publish waits for broker acknowledgment.
    pub publish_timeout: Duration,
    /// Broker-side delivery timeout for an in-flight record.
    pub message_timeout: Duration,
    /// Fetch batching window: wait for at least this many bytes...
    pub fetch_min_bytes: u32,
    /// ...but never return more than this many.
    pub fetch_max_bytes: u32,
    /// Upper bound on how long one fetch long-polls before returning empty.
    pub fetch_max_wait: Duration,
    /// Where `start_metrics_server` listens.
    pub metrics_addr: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "127.0.0.1:9092".to_string(),
            publish_timeout: Duration::from_secs(5),
            message_timeout: Duration::from_secs(5),
            fetch_min_bytes: 1,
            fetch_max_bytes: 1024 * 1024,
            fetch_max_wait: Duration::from_secs(10),
            metrics_addr: "0.0.0.0:9464".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bootstrap_servers: env_string("PICSTREAM_BROKERS")
                .unwrap_or(defaults.bootstrap_servers),
            publish_timeout: env_millis("PICSTREAM_PUBLISH_TIMEOUT_MS")
                .unwrap_or(defaults.publish_timeout),
            message_timeout: env_millis("PICSTREAM_MESSAGE_TIMEOUT_MS")
                .unwrap_or(defaults.message_timeout),
            fetch_min_bytes: env_u32("PICSTREAM_FETCH_MIN_BYTES")
                .unwrap_or(defaults.fetch_min_bytes),
            fetch_max_bytes: env_u32("PICSTREAM_FETCH_MAX_BYTES")
                .unwrap_or(defaults.fetch_max_bytes),
            fetch_max_wait: env_millis("PICSTREAM_FETCH_MAX_WAIT_MS")
                .unwrap_or(defaults.fetch_max_wait),
            metrics_addr: env_string("PICSTREAM_METRICS_ADDR").unwrap_or(defaults.metrics_addr),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_u32(key: &str) -> Option<u32> {
    env_string(key)?.trim().parse().ok()
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u32(key).map(|ms| Duration::from_millis(u64::from(ms)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_suit_local_development() {
        let config = BrokerConfig::default();
        assert_eq!(config.bootstrap_servers, "127.0.0.1:9092");
        assert_eq!(config.fetch_min_bytes, 1);
        assert_eq!(config.fetch_max_bytes, 1024 * 1024);
        assert_eq!(config.fetch_max_wait, Duration::from_secs(10));
        assert_eq!(config.metrics_addr, "0.0.0.0:9464");
    }
}
