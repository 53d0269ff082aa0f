//! Server Events
//!
//! Allocation lifecycle events published on the `server#{id}` channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Channel carrying events for `server_id`.
pub fn server_channel(server_id: i64) -> String {
    format!("server#{}", server_id)
}

/// Body shared by allocate and deallocate events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    /// Event identifier.
    #[serde(rename = "EventID")]
    pub event_id: Uuid,
    /// Server the event targets.
    #[serde(rename = "ServerID")]
    pub server_id: i64,
    /// Allocation the event concerns.
    #[serde(rename = "AllocationID")]
    pub allocation_id: Uuid,
}

/// Event published by the SDK daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "EventType")]
pub enum ServerEvent {
    /// The server was allocated to a session.
    #[serde(rename = "AllocateEventType")]
    Allocate(EventBody),
    /// The server's allocation ended.
    #[serde(rename = "DeallocateEventType")]
    Deallocate(EventBody),
}

impl ServerEvent {
    /// Parse a publication's data.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        ServerEvent::deserialize(value)
    }

    /// Event body.
    pub fn body(&self) -> &EventBody {
        match self {
            ServerEvent::Allocate(body) | ServerEvent::Deallocate(body) => body,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EVENT_ID: &str = "e3e455f8-f977-11e9-bccf-1a111111f111";
    const ALLOCATION_ID: &str = "e3e455f8-f977-11e9-bccf-2a222222f222";

    #[test]
    fn test_parse_allocate() {
        let value = json!({
            "EventID": EVENT_ID,
            "EventType": "AllocateEventType",
            "ServerID": 12345,
            "AllocationID": ALLOCATION_ID,
        });

        let event = ServerEvent::from_value(&value).unwrap();
        assert!(matches!(event, ServerEvent::Allocate(_)));
        assert_eq!(event.body().server_id, 12345);
        assert_eq!(event.body().event_id.to_string(), EVENT_ID);
        assert_eq!(event.body().allocation_id.to_string(), ALLOCATION_ID);
    }

    #[test]
    fn test_parse_deallocate() {
        let value = json!({
            "EventID": EVENT_ID,
            "EventType": "DeallocateEventType",
            "ServerID": 12345,
            "AllocationID": ALLOCATION_ID,
        });

        let event = ServerEvent::from_value(&value).unwrap();
        assert!(matches!(event, ServerEvent::Deallocate(_)));
    }

    #[test]
    fn test_reject_unknown_type() {
        let value = json!({
            "EventID": EVENT_ID,
            "EventType": "RestartEventType",
            "ServerID": 1,
            "AllocationID": ALLOCATION_ID,
        });
        assert!(ServerEvent::from_value(&value).is_err());
    }

    #[test]
    fn test_reject_bad_uuid() {
        let value = json!({
            "EventID": "not-a-uuid",
            "EventType": "AllocateEventType",
            "ServerID": 1,
            "AllocationID": ALLOCATION_ID,
        });
        assert!(ServerEvent::from_value(&value).is_err());
    }

    #[test]
    fn test_channel_name() {
        assert_eq!(server_channel(987), "server#987");
    }
}
