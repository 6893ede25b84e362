use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use validator::{Validate, ValidationError};

/// Store-assigned message identifier.
///
/// Backed by a `BIGSERIAL` column, so ordering by id matches insertion order.
/// Serialized as a decimal string to keep the `_id` field a string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<i64>().map(MessageId).map_err(de::Error::custom)
    }
}

/// Persisted chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    pub content: String,
    #[serde(rename = "createdAt", with = "iso_millis")]
    pub created_at: DateTime<Utc>,
}

/// Message accepted by the ingress API but not yet flushed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl PendingMessage {
    /// Stamps `created_at` now: the enqueue time, not the persist time.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Body of `POST /messages`
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMessageRequest {
    #[validate(custom(function = "validate_not_blank"))]
    pub content: String,
}

/// Body of the 202 returned by `POST /messages`
#[derive(Debug, Serialize, Deserialize)]
pub struct QueuedResponse {
    pub message: String,
}

impl QueuedResponse {
    pub fn queued() -> Self {
        Self {
            message: "Message queued for processing".to_string(),
        }
    }
}

pub fn validate_not_blank(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::new("blank_content"));
    }
    Ok(())
}

/// ISO-8601 with millisecond precision and a `Z` suffix, e.g. `2024-05-01T12:00:00.123Z`.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}
