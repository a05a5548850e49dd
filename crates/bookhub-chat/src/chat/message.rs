//! Message types exchanged with UI code.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The normalized message every subscriber receives.
///
/// Serializes with camelCase keys (`senderId`, `createdAt`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMessage {
    /// Stable identifier, also the duplicate-suppression key.
    pub id: String,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    /// ISO-8601 creation time.
    pub created_at: String,
    pub is_read: bool,
    pub sender_name: String,
    pub receiver_name: String,
}

impl CanonicalMessage {
    /// Whether `user_id` is the sender or the receiver.
    pub fn involves(&self, user_id: i64) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// The other party of the conversation, seen from `user_id`.
    pub fn partner_of(&self, user_id: i64) -> Option<i64> {
        if self.sender_id == user_id {
            Some(self.receiver_id)
        } else if self.receiver_id == user_id {
            Some(self.sender_id)
        } else {
            None
        }
    }

    /// `created_at` parsed as RFC 3339, if it is in that format.
    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// A message this client sends, as emitted on `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    /// ISO-8601 send time.
    pub timestamp: String,
}

impl OutboundMessage {
    /// A message stamped with the current time.
    pub fn new(sender_id: i64, receiver_id: i64, content: impl Into<String>) -> Self {
        Self {
            sender_id,
            receiver_id,
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    /// The wire payload.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "senderId": self.sender_id,
            "receiverId": self.receiver_id,
            "content": self.content,
            "timestamp": self.timestamp,
        })
    }
}

/// The current instant as RFC 3339 UTC with millisecond precision.
pub(crate) fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Unix epoch milliseconds as RFC 3339 UTC, when in range.
pub(crate) fn epoch_millis_timestamp(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis).map(format_timestamp)
}

fn format_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> CanonicalMessage {
        CanonicalMessage {
            id: "m-1".into(),
            sender_id: 2,
            receiver_id: 1,
            content: "hi".into(),
            created_at: "2024-03-01T10:00:00.000Z".into(),
            is_read: false,
            sender_name: "Bob".into(),
            receiver_name: "User 1".into(),
        }
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "m-1",
                "senderId": 2,
                "receiverId": 1,
                "content": "hi",
                "createdAt": "2024-03-01T10:00:00.000Z",
                "isRead": false,
                "senderName": "Bob",
                "receiverName": "User 1",
            })
        );
    }

    #[test]
    fn test_partner_of() {
        let message = sample();
        assert_eq!(message.partner_of(1), Some(2));
        assert_eq!(message.partner_of(2), Some(1));
        assert_eq!(message.partner_of(3), None);
        assert!(message.involves(1));
        assert!(!message.involves(3));
    }

    #[test]
    fn test_created_at_utc() {
        let parsed = sample().created_at_utc().unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_709_287_200_000);

        let mut message = sample();
        message.created_at = "yesterday".into();
        assert_eq!(message.created_at_utc(), None);
    }

    #[test]
    fn test_outbound_payload() {
        let outbound = OutboundMessage::new(1, 2, "hello");
        let payload = outbound.to_payload();
        assert_eq!(payload["senderId"], 1);
        assert_eq!(payload["receiverId"], 2);
        assert_eq!(payload["content"], "hello");
        assert!(DateTime::parse_from_rfc3339(payload["timestamp"].as_str().unwrap()).is_ok());
        assert_eq!(payload, serde_json::to_value(&outbound).unwrap());
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        assert_eq!(
            epoch_millis_timestamp(1_709_287_200_000).as_deref(),
            Some("2024-03-01T10:00:00.000Z")
        );
        assert_eq!(epoch_millis_timestamp(i64::MAX), None);
    }
}
