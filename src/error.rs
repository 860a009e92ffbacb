// ============================================================================
// Event Bus Error Taxonomy
// ============================================================================
//
// One enum covering both sides of the bus:
// - Producer path: errors surface synchronously to the caller
// - Consumer path: per-message errors are logged/counted and the run loop
//   continues; only cancellation or an escalated commit failure ends it
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("topic '{topic}' is not registered")]
    TopicNotRegistered { topic: String },

    #[error("event field '{field}' must be non-empty")]
    EmptyField { field: &'static str },

    #[error("failed to serialize event: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("failed to deserialize event: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("broker write on topic '{topic}' failed: {cause}")]
    BrokerWrite { topic: String, cause: anyhow::Error },

    #[error("broker read on topic '{topic}' failed: {cause}")]
    BrokerRead { topic: String, cause: anyhow::Error },

    #[error("offset commit on topic '{topic}' failed: {cause}")]
    BrokerCommit { topic: String, cause: anyhow::Error },

    #[error("handler rejected event: {0}")]
    Handler(anyhow::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl EventBusError {
    /// True for shutdown-kind outcomes, so callers can avoid treating a
    /// cancelled run loop as an operational failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EventBusError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_distinguishable() {
        assert!(EventBusError::Cancelled.is_cancellation());
        assert!(!EventBusError::TopicNotRegistered {
            topic: "users".to_string()
        }
        .is_cancellation());
    }

    #[test]
    fn errors_render_topic() {
        let err = EventBusError::BrokerWrite {
            topic: "picstream.users".to_string(),
            cause: anyhow::anyhow!("connection refused"),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("picstream.users"));
        assert!(rendered.contains("connection refused"));
    }
}
