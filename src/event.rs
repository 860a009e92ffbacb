use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::EventBusError;
use crate::payloads::EventPayload;

// ============================================================================
// Event Envelope
// ============================================================================
//
// The canonical envelope carried on every topic. `id` and `timestamp` are
// assigned exactly once by the factory and never mutated; the payload is an
// open JSON object whose schema is per-`type` and not enforced here.
//
// ============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Event {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Identifier of the producing service (e.g. "auth-service").
    pub source: String,

    pub timestamp: DateTime<Utc>,

    /// Open per-type payload.
    pub data: Map<String, Value>,

    /// Cross-cutting string pairs: correlation ids, trace context.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Factory for a fully-populated envelope with a fresh unique `id` and
    /// the current UTC time.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: Utc::now(),
            data,
            metadata: HashMap::new(),
        }
    }

    /// Build an envelope from a typed payload; the payload must serialize
    /// to a JSON object.
    pub fn from_payload<P: EventPayload>(
        source: impl Into<String>,
        payload: &P,
    ) -> Result<Self, EventBusError> {
        let value = serde_json::to_value(payload).map_err(EventBusError::Serialization)?;
        let data: Map<String, Value> =
            serde_json::from_value(value).map_err(EventBusError::Serialization)?;
        Ok(Self::new(P::event_type(), source, data))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decode the open payload back into a typed struct.
    pub fn payload<P: EventPayload>(&self) -> Result<P, EventBusError> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(EventBusError::Deserialization)
    }

    /// Publish-time invariant: `type` and `source` are non-empty.
    pub fn validate(&self) -> Result<(), EventBusError> {
        if self.event_type.trim().is_empty() {
            return Err(EventBusError::EmptyField { field: "type" });
        }
        if self.source.trim().is_empty() {
            return Err(EventBusError::EmptyField { field: "source" });
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EventBusError> {
        serde_json::to_vec(self).map_err(EventBusError::Serialization)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventBusError> {
        serde_json::from_slice(bytes).map_err(EventBusError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sample_data() -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("user_id".to_string(), Value::String("u1".to_string()));
        data
    }

    #[test]
    fn factory_assigns_unique_ids() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            let event = Event::new("user.created", "auth-service", sample_data());
            assert!(ids.insert(event.id));
        }
    }

    #[test]
    fn metadata_defaults_to_empty() {
        let event = Event::new("user.created", "auth-service", sample_data());
        assert!(event.metadata.is_empty());

        // An envelope on the wire without a metadata field still decodes.
        let wire = r#"{"id":"6a2f64ad-8f2a-4f91-b6a7-2f9f2d0e3c11","type":"user.created","source":"auth-service","timestamp":"2026-01-01T00:00:00Z","data":{}}"#;
        let decoded = Event::from_bytes(wire.as_bytes()).unwrap();
        assert!(decoded.metadata.is_empty());
    }

    #[test]
    fn wire_round_trip_preserves_envelope() {
        let event = Event::new("feed.created", "feed-service", sample_data())
            .with_metadata("correlation_id", "c-42");

        let bytes = event.to_bytes().unwrap();
        let decoded = Event::from_bytes(&bytes).unwrap();

        assert_eq!(decoded.id, event.id);
        assert_eq!(decoded.event_type, "feed.created");
        assert_eq!(decoded.source, "feed-service");
        assert_eq!(decoded.timestamp, event.timestamp);
        assert_eq!(decoded.data["user_id"], "u1");
        assert_eq!(decoded.metadata["correlation_id"], "c-42");
    }

    #[test]
    fn validate_rejects_empty_type_and_source() {
        let event = Event::new("", "auth-service", Map::new());
        assert!(matches!(
            event.validate(),
            Err(EventBusError::EmptyField { field: "type" })
        ));

        let event = Event::new("user.created", "  ", Map::new());
        assert!(matches!(
            event.validate(),
            Err(EventBusError::EmptyField { field: "source" })
        ));

        let event = Event::new("user.created", "auth-service", Map::new());
        assert!(event.validate().is_ok());
    }

    #[test]
    fn malformed_body_is_a_deserialization_error() {
        let err = Event::from_bytes(b"{not json").unwrap_err();
        assert!(matches!(err, EventBusError::Deserialization(_)));
    }
}
