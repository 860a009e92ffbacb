use std::collections::HashMap;

use crate::error::EventBusError;

// ============================================================================
// Topic Registry
// ============================================================================
//
// Fixed mapping from logical event streams to broker topic ids, built once
// at startup. There is no dynamic topic creation: a publish or subscribe
// against an unregistered stream fails fast with TopicNotRegistered before
// any broker call is attempted.
//
// ============================================================================

/// Logical stream names for the platform's well-known topics.
pub mod streams {
    pub const USERS: &str = "users";
    pub const FEEDS: &str = "feeds";
    pub const NOTIFICATIONS: &str = "notifications";
}

#[derive(Debug, Clone)]
pub struct TopicRegistry {
    topics: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct TopicRegistryBuilder {
    topics: HashMap<String, String>,
}

impl TopicRegistryBuilder {
    pub fn register(
        mut self,
        stream: impl Into<String>,
        broker_topic: impl Into<String>,
    ) -> Self {
        self.topics.insert(stream.into(), broker_topic.into());
        self
    }

    pub fn build(self) -> TopicRegistry {
        TopicRegistry {
            topics: self.topics,
        }
    }
}

impl TopicRegistry {
    pub fn builder() -> TopicRegistryBuilder {
        TopicRegistryBuilder::default()
    }

    /// The platform's standard streams: one per producing service.
    pub fn platform() -> Self {
        Self::builder()
            .register(streams::USERS, "picstream.users")
            .register(streams::FEEDS, "picstream.feeds")
            .register(streams::NOTIFICATIONS, "picstream.notifications")
            .build()
    }

    pub fn resolve(&self, stream: &str) -> Result<&str, EventBusError> {
        self.topics
            .get(stream)
            .map(String::as_str)
            .ok_or_else(|| EventBusError::TopicNotRegistered {
                topic: stream.to_string(),
            })
    }

    pub fn contains(&self, stream: &str) -> bool {
        self.topics.contains_key(stream)
    }

    pub fn streams(&self) -> impl Iterator<Item = (&str, &str)> {
        self.topics.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_stream() {
        let registry = TopicRegistry::platform();
        assert_eq!(registry.resolve(streams::USERS).unwrap(), "picstream.users");
        assert!(registry.contains(streams::NOTIFICATIONS));
    }

    #[test]
    fn unregistered_stream_fails_fast() {
        let registry = TopicRegistry::platform();
        let err = registry.resolve("likes").unwrap_err();
        assert!(matches!(
            err,
            EventBusError::TopicNotRegistered { topic } if topic == "likes"
        ));
    }
}
