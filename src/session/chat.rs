use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    /// Local wall-clock time of sending, `HH:MM:SS`.
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let message = ChatMessage {
            sender: "me".into(),
            text: "hello".into(),
            timestamp: "12:00:01".into(),
        };
        let json: serde_json::Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"sender": "me", "text": "hello", "timestamp": "12:00:01"})
        );
    }

    #[test]
    fn parses_peer_messages() {
        let message =
            ChatMessage::from_bytes(br#"{"sender":"guest","text":"hi","timestamp":"09:30:00"}"#)
                .unwrap();
        assert_eq!(message.sender, "guest");
        assert_eq!(message.text, "hi");
    }

    #[test]
    fn rejects_garbage() {
        assert!(ChatMessage::from_bytes(b"hello").is_err());
        assert!(ChatMessage::from_bytes(br#"{"text":"no sender"}"#).is_err());
    }

    #[test]
    fn timestamp_format() {
        let message = ChatMessage::new("me", "hi");
        assert_eq!(message.timestamp.len(), 8);
        assert_eq!(message.timestamp.matches(':').count(), 2);
    }
}
