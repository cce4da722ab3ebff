//! Core data types for pgfifo.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// A single queued message.
///
/// A message exists in the backlog from the moment its insertion transaction
/// commits until the moment a lease transaction that included it commits.
/// There is no persisted "leased" state; a lease is an exclusive row lock
/// held by an in-flight transaction.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    /// Unique message ID, assigned by the database on insertion.
    ///
    /// Only meaningful for correlating a leased row within a single delivery
    /// attempt; redelivered messages keep their id, but callers should not
    /// treat it as a stable external contract.
    pub id: i64,
    /// Timestamp when the message was inserted (informational only)
    pub queue_time: chrono::DateTime<chrono::Utc>,
    /// Topic the message was published to
    pub topic: String,
    /// Opaque message payload
    pub payload: Vec<u8>,
}

impl Message {
    /// Deserialize the payload into a typed value.
    ///
    /// Pass-through JSON decoding; the queue itself is agnostic to the
    /// payload's structure.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message {{ id: {}, topic: {}, queue_time: {}, payload: {} bytes }}",
            self.id,
            self.topic,
            self.queue_time,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Order {
        id: u64,
        sku: String,
    }

    fn message_with_payload(payload: &[u8]) -> Message {
        Message {
            id: 1,
            queue_time: chrono::Utc::now(),
            topic: "orders".to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_decode_json_payload() {
        let msg = message_with_payload(br#"{"id": 42, "sku": "widget"}"#);
        let order: Order = msg.decode().expect("valid JSON payload");
        assert_eq!(
            order,
            Order {
                id: 42,
                sku: "widget".to_string()
            }
        );
    }

    #[test]
    fn test_decode_malformed_payload_errors() {
        let msg = message_with_payload(b"not json");
        let result: crate::error::Result<Order> = msg.decode();
        assert!(matches!(
            result,
            Err(crate::error::Error::Serialization(_))
        ));
    }
}
