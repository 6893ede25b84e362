use crate::models::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const NEW_MESSAGE: &str = "NEW_MESSAGE";

/// Server → client push event.
///
/// Serialized as `{"type": "...", "payload": {...}}`. New variants may be added;
/// consumers are expected to skip types they do not recognize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BroadcastEvent {
    #[serde(rename = "NEW_MESSAGE")]
    NewMessage(Message),
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl BroadcastEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BroadcastEvent::NewMessage(_) => NEW_MESSAGE,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Client-side decode. Unknown event types yield `Ok(None)`.
    pub fn decode(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw: RawEvent = serde_json::from_str(text)?;
        match raw.kind.as_str() {
            NEW_MESSAGE => serde_json::from_value(raw.payload).map(|m| Some(Self::NewMessage(m))),
            _ => Ok(None),
        }
    }
}

/// Destination for events discovered by the change notifier
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event: BroadcastEvent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageId;
    use chrono::{TimeZone, Utc};

    fn sample() -> BroadcastEvent {
        BroadcastEvent::NewMessage(Message {
            id: MessageId::new(7),
            content: "hello".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        })
    }

    #[test]
    fn test_new_message_wire_format() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_json().unwrap()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "NEW_MESSAGE",
                "payload": {
                    "_id": "7",
                    "content": "hello",
                    "createdAt": "2024-01-02T03:04:05.000Z"
                }
            })
        );
    }

    #[test]
    fn test_decode_known_event() {
        let text = sample().to_json().unwrap();
        assert_eq!(BroadcastEvent::decode(&text).unwrap(), Some(sample()));
    }

    #[test]
    fn test_decode_ignores_unknown_type() {
        let text = r#"{"type":"USER_TYPING","payload":{"who":"someone"}}"#;
        assert_eq!(BroadcastEvent::decode(text).unwrap(), None);

        let no_payload = r#"{"type":"PRESENCE"}"#;
        assert_eq!(BroadcastEvent::decode(no_payload).unwrap(), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(BroadcastEvent::decode("not json").is_err());
    }
}
