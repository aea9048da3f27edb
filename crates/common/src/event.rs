//! The event record consumed from the log
//!
//! Events are immutable once observed. The global `number` is dense and
//! monotonically increasing from 1; `position` is the ordinal of the event
//! within its own stream. Payloads are opaque bytes at this layer.

use serde::{Deserialize, Serialize};

/// An immutable event read from the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Global, dense, monotonically increasing ordinal (from 1)
    pub number: u64,

    /// Per-stream ordinal (from 1)
    pub position: u64,

    /// Identity of the stream this event belongs to
    pub stream_id: String,

    /// Topic used for subscription whitelisting
    pub topic: String,

    /// Application-level event type
    pub event_type: String,

    /// Opaque payload (schema and codec are out of scope here)
    pub payload: Vec<u8>,
}

impl Event {
    /// Create an event with empty type and payload
    pub fn new(
        number: u64,
        position: u64,
        stream_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            number,
            position,
            stream_id: stream_id.into(),
            topic: topic.into(),
            event_type: String::new(),
            payload: Vec::new(),
        }
    }

    /// Set the application-level event type
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = event_type.into();
        self
    }

    /// Set the payload bytes
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let event = Event::new(7, 3, "account-1", "deposits")
            .with_event_type("deposited")
            .with_payload(b"{}".to_vec());

        assert_eq!(event.number, 7);
        assert_eq!(event.position, 3);
        assert_eq!(event.stream_id, "account-1");
        assert_eq!(event.topic, "deposits");
        assert_eq!(event.event_type, "deposited");
        assert_eq!(event.payload, b"{}");
    }
}
