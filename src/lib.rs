//! # picstream-events
//!
//! Event messaging layer for the picstream services (gateway, auth, feed,
//! notification). Services publish domain events to a partitioned,
//! offset-addressed log broker and consume them in named groups with
//! at-least-once delivery and manual offset commit.
//!
//! ## Guarantees
//!
//! - **At-least-once**: a message is never lost before its offset is
//!   committed; it may be redelivered after a crash before commit.
//! - **Ordering within a key**: events published with the same partition
//!   key to the same topic are observed in publish order. No ordering
//!   across keys or topics.
//! - **Per-topic isolation**: each producer stream owns its channel handle
//!   and circuit breaker; a broker failure on one topic does not block
//!   publishes on another.
//!
//! ## Example
//!
//! ```rust,ignore
//! use picstream_events::{
//!     BrokerConfig, Event, KafkaBroker, Producer, PrometheusSink, TopicRegistry, streams,
//! };
//! use std::sync::Arc;
//!
//! let config = BrokerConfig::from_env();
//! let broker = KafkaBroker::new(config.clone());
//! let sink = Arc::new(PrometheusSink::new()?);
//! let registry = TopicRegistry::platform();
//!
//! let producer = Producer::new(&broker, &registry, sink, &config)?;
//! let event = Event::new("user.created", "auth-service", payload);
//! producer.publish(streams::USERS, "u1", &event).await?;
//! ```

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod metrics;
pub mod payloads;
pub mod producer;
pub mod topics;
mod utils;

pub use broker::{
    Broker, FetchedMessage, KafkaBroker, MemoryBroker, MessageHeaders, TopicReader, TopicWriter,
};
pub use config::BrokerConfig;
pub use consumer::{Consumer, ConsumerOptions, EventHandler, FnHandler};
pub use error::EventBusError;
pub use event::Event;
pub use metrics::{
    start_metrics_server, ErrorStage, InstrumentationSink, NoopSink, PrometheusSink,
};
pub use payloads::{DomainPayload, EventPayload, FeedCreated, NotificationRequested, UserCreated};
pub use producer::Producer;
pub use topics::{streams, TopicRegistry, TopicRegistryBuilder};
