//! Normalization of inbound message payloads.
//!
//! Producers disagree on field names (`senderId` vs `sender_id` vs
//! `fromUserId`) and on whether the message is nested under a wrapper key.
//! Every spelling the client understands is listed in [`FIELD_SPELLINGS`];
//! supporting a new producer is a one-line change there.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::message::{CanonicalMessage, epoch_millis_timestamp, now_timestamp};

/// A logical field of [`CanonicalMessage`] that is looked up by spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    SenderId,
    ReceiverId,
    Content,
    CreatedAt,
    SenderName,
    ReceiverName,
    IsRead,
}

/// Keys under which a payload may nest the actual message object.
pub const WRAPPER_KEYS: &[&str] = &["message", "data", "payload"];

/// Accepted spellings per field, in lookup order.
pub const FIELD_SPELLINGS: &[(Field, &[&str])] = &[
    (Field::Id, &["id", "messageId", "message_id", "_id"]),
    (
        Field::SenderId,
        &["senderId", "sender_id", "fromUserId", "from_user_id"],
    ),
    (
        Field::ReceiverId,
        &["receiverId", "receiver_id", "toUserId", "to_user_id"],
    ),
    (Field::Content, &["content", "message", "text", "body"]),
    (
        Field::CreatedAt,
        &["createdAt", "created_at", "timestamp", "sentAt", "sent_at"],
    ),
    (Field::SenderName, &["senderName", "sender_name"]),
    (Field::ReceiverName, &["receiverName", "receiver_name"]),
    (Field::IsRead, &["isRead", "is_read", "read"]),
];

/// Accepted spellings of the unread counter.
pub const UNREAD_COUNT_KEYS: &[&str] = &["unreadCount", "unread_count", "count"];

impl Field {
    /// The accepted spellings of this field, in lookup order.
    pub fn spellings(self) -> &'static [&'static str] {
        FIELD_SPELLINGS
            .iter()
            .find(|(field, _)| *field == self)
            .map(|(_, spellings)| *spellings)
            .unwrap_or(&[])
    }
}

/// Why a payload could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload has no integer sender id")]
    MissingSender,
    #[error("payload has no integer receiver id")]
    MissingReceiver,
}

/// Where fields are looked up: the nested message first, then the payload.
struct Sources<'a> {
    nested: Option<&'a Map<String, Value>>,
    outer: &'a Map<String, Value>,
}

impl<'a> Sources<'a> {
    fn new(outer: &'a Map<String, Value>) -> Self {
        let nested = WRAPPER_KEYS
            .iter()
            .find_map(|key| outer.get(*key).and_then(Value::as_object));
        Self { nested, outer }
    }

    /// First value under any spelling of `field` that `resolve` accepts.
    fn find<T>(&self, field: Field, resolve: impl Fn(&Value) -> Option<T>) -> Option<T> {
        self.nested
            .into_iter()
            .chain(std::iter::once(self.outer))
            .flat_map(|source| field.spellings().iter().filter_map(move |key| source.get(*key)))
            .find_map(resolve)
    }
}

/// Build a [`CanonicalMessage`] from a raw payload.
///
/// `is_read` is used when the payload carries no read flag.
pub fn normalize(payload: &Value, is_read: bool) -> Result<CanonicalMessage, NormalizeError> {
    let outer = payload.as_object().ok_or(NormalizeError::NotAnObject)?;
    let sources = Sources::new(outer);

    let sender_id = sources
        .find(Field::SenderId, as_integer)
        .ok_or(NormalizeError::MissingSender)?;
    let receiver_id = sources
        .find(Field::ReceiverId, as_integer)
        .ok_or(NormalizeError::MissingReceiver)?;

    let content = sources.find(Field::Content, as_text).unwrap_or_default();
    let created_at = sources
        .find(Field::CreatedAt, as_timestamp)
        .unwrap_or_else(now_timestamp);
    let id = sources
        .find(Field::Id, as_id)
        .unwrap_or_else(|| synthesize_id(sender_id, receiver_id, &created_at, &content));
    let sender_name = sources
        .find(Field::SenderName, as_name)
        .unwrap_or_else(|| default_name(sender_id));
    let receiver_name = sources
        .find(Field::ReceiverName, as_name)
        .unwrap_or_else(|| default_name(receiver_id));
    let is_read = sources.find(Field::IsRead, as_flag).unwrap_or(is_read);

    Ok(CanonicalMessage {
        id,
        sender_id,
        receiver_id,
        content,
        created_at,
        is_read,
        sender_name,
        receiver_name,
    })
}

/// Extract the unread counter from an `unread_count_update` payload.
///
/// A bare number is accepted as the count. Negative values clamp to zero;
/// anything unresolvable counts as zero.
pub fn unread_count(payload: &Value) -> u32 {
    let count = match payload {
        Value::Object(outer) => {
            let nested = WRAPPER_KEYS
                .iter()
                .find_map(|key| outer.get(*key).and_then(Value::as_object));
            nested
                .into_iter()
                .chain(std::iter::once(outer))
                .flat_map(|source| UNREAD_COUNT_KEYS.iter().filter_map(move |key| source.get(*key)))
                .find_map(as_integer)
        }
        other => as_integer(other),
    };
    count.map_or(0, |count| count.clamp(0, i64::from(u32::MAX)) as u32)
}

/// Display name used when a payload names nobody.
pub fn default_name(user_id: i64) -> String {
    format!("User {user_id}")
}

/// Integers, integral floats, and strings holding an integer.
pub fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_name(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

fn as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn as_timestamp(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(_) => as_integer(value).and_then(epoch_millis_timestamp),
        _ => None,
    }
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(_) => as_integer(value).map(|n| n != 0),
        Value::String(text) => match text.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Deterministic id for payloads without one. The content part is the first
/// 16 hex digits of its SHA-256.
fn synthesize_id(sender_id: i64, receiver_id: i64, created_at: &str, content: &str) -> String {
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    format!("{sender_id}-{receiver_id}-{created_at}-{}", &digest[..16])
}
