use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EventBusError;
use crate::event::Event;

// ============================================================================
// Typed Event Payloads
// ============================================================================
//
// Per-type payload structs for the platform's domain occurrences, plus a
// tagged union for consumers that switch on `type`. The envelope itself
// stays schema-less; these are the known shapes layered on top, with an
// Unknown fallback for event types this build does not know about.
//
// ============================================================================

/// Associates a payload struct with its `type` tag on the wire.
pub trait EventPayload: Serialize + DeserializeOwned {
    fn event_type() -> &'static str
    where
        Self: Sized;
}

/// A new account was registered (published by the auth service).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserCreated {
    pub user_id: String,
    pub username: String,
    pub email: String,
}

impl EventPayload for UserCreated {
    fn event_type() -> &'static str {
        "user.created"
    }
}

/// An image post was created (published by the feed service).
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct FeedCreated {
    pub feed_id: String,
    pub user_id: String,
    pub image_url: String,
    pub caption: Option<String>,
}

impl EventPayload for FeedCreated {
    fn event_type() -> &'static str {
        "feed.created"
    }
}

/// A best-effort notification was requested for a user.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationRequested {
    pub recipient_id: String,
    pub kind: String,
    pub message: String,
}

impl EventPayload for NotificationRequested {
    fn event_type() -> &'static str {
        "notification.requested"
    }
}

/// Tagged union over the known payload shapes, keyed by the envelope's
/// `type`. Unknown types fall back to the raw payload map.
#[derive(Clone, Debug)]
pub enum DomainPayload {
    UserCreated(UserCreated),
    FeedCreated(FeedCreated),
    NotificationRequested(NotificationRequested),
    Unknown {
        event_type: String,
        data: Map<String, Value>,
    },
}

impl DomainPayload {
    pub fn decode(event: &Event) -> Result<Self, EventBusError> {
        let tag = event.event_type.as_str();
        if tag == UserCreated::event_type() {
            return Ok(DomainPayload::UserCreated(event.payload()?));
        }
        if tag == FeedCreated::event_type() {
            return Ok(DomainPayload::FeedCreated(event.payload()?));
        }
        if tag == NotificationRequested::event_type() {
            return Ok(DomainPayload::NotificationRequested(event.payload()?));
        }
        Ok(DomainPayload::Unknown {
            event_type: event.event_type.clone(),
            data: event.data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_payload_round_trips_through_envelope() {
        let payload = UserCreated {
            user_id: "u1".to_string(),
            username: "ansel".to_string(),
            email: "ansel@example.com".to_string(),
        };

        let event = Event::from_payload("auth-service", &payload).unwrap();
        assert_eq!(event.event_type, "user.created");
        assert_eq!(event.data["user_id"], "u1");

        let decoded: UserCreated = event.payload().unwrap();
        assert_eq!(decoded.username, "ansel");
    }

    #[test]
    fn tagged_decode_selects_by_type() {
        let payload = FeedCreated {
            feed_id: "f9".to_string(),
            user_id: "u1".to_string(),
            image_url: "https://cdn.picstream.io/f9.jpg".to_string(),
            caption: None,
        };
        let event = Event::from_payload("feed-service", &payload).unwrap();

        match DomainPayload::decode(&event).unwrap() {
            DomainPayload::FeedCreated(feed) => assert_eq!(feed.feed_id, "f9"),
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_falls_back_to_raw_map() {
        let mut data = Map::new();
        data.insert("anything".to_string(), Value::Bool(true));
        let event = Event::new("image.resized", "worker", data);

        match DomainPayload::decode(&event).unwrap() {
            DomainPayload::Unknown { event_type, data } => {
                assert_eq!(event_type, "image.resized");
                assert_eq!(data["anything"], true);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn mistyped_body_is_a_deserialization_error() {
        let mut data = Map::new();
        data.insert("user_id".to_string(), Value::Bool(false));
        let event = Event::new("user.created", "auth-service", data);

        assert!(matches!(
            DomainPayload::decode(&event),
            Err(EventBusError::Deserialization(_))
        ));
    }
}
