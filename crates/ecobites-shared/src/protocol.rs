use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, ThreadId};

/// Signals a client sends over its WebSocket. Frames are JSON text of the
/// form `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientSignal {
    /// Bind this connection to a user.
    Join(JoinPayload),

    /// Append a message to a thread and push it to the other participant.
    SendMessage(SendMessagePayload),
}

/// `data` of a `join`: either `{userId, token}` or a bare user id string.
/// The bare form carries no token and is rejected at join time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", from = "JoinWire")]
pub struct JoinPayload {
    #[serde(default)]
    pub user_id: Option<String>,
    /// Bearer token proving the connection speaks for `user_id`
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinWire {
    Bare(String),
    Full(JoinFields),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinFields {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    token: Option<String>,
}

impl From<JoinWire> for JoinPayload {
    fn from(wire: JoinWire) -> Self {
        match wire {
            JoinWire::Bare(user_id) => Self {
                user_id: Some(user_id),
                token: None,
            },
            JoinWire::Full(fields) => Self {
                user_id: fields.user_id,
                token: fields.token,
            },
        }
    }
}

// Fields are optional so a malformed signal still decodes and can be rejected
// with a precise validation error instead of a parse failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub message: OutgoingMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

/// Pushes the server sends to a connected client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerPush {
    /// A message was appended to one of the recipient's threads.
    NewMessage(NewMessagePayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub thread_id: ThreadId,
    pub message: ChatMessage,
}

impl ClientSignal {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerPush {
    pub fn new_message(thread_id: ThreadId, message: ChatMessage) -> Self {
        Self::NewMessage(NewMessagePayload { thread_id, message })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use chrono::Utc;

    #[test]
    fn test_join_signal_decodes() {
        let signal =
            ClientSignal::from_json(r#"{"event":"join","data":{"userId":"u-1","token":"t"}}"#)
                .unwrap();
        assert_eq!(
            signal,
            ClientSignal::Join(JoinPayload {
                user_id: Some("u-1".into()),
                token: Some("t".into()),
            })
        );
    }

    #[test]
    fn test_bare_user_id_join_decodes_without_token() {
        let signal = ClientSignal::from_json(r#"{"event":"join","data":"u-1"}"#).unwrap();
        assert_eq!(
            signal,
            ClientSignal::Join(JoinPayload {
                user_id: Some("u-1".into()),
                token: None,
            })
        );
    }

    #[test]
    fn test_send_message_with_missing_fields_still_decodes() {
        let signal =
            ClientSignal::from_json(r#"{"event":"sendMessage","data":{"message":{}}}"#).unwrap();
        match signal {
            ClientSignal::SendMessage(payload) => {
                assert!(payload.thread_id.is_none());
                assert!(payload.message.content.is_none());
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_an_error() {
        assert!(ClientSignal::from_json(r#"{"event":"typing","data":{}}"#).is_err());
        assert!(ClientSignal::from_json("not json").is_err());
    }

    #[test]
    fn test_new_message_push_shape() {
        let thread_id = ThreadId::new();
        let push = ServerPush::new_message(
            thread_id,
            ChatMessage {
                seq: 0,
                sender_id: UserId::parse("senderId", "r-1").unwrap(),
                content: "Is this available?".into(),
                timestamp: Utc::now(),
            },
        );

        let value: serde_json::Value = serde_json::from_str(&push.to_json().unwrap()).unwrap();
        assert_eq!(value["event"], "newMessage");
        assert_eq!(value["data"]["threadId"], thread_id.to_string());
        assert_eq!(value["data"]["message"]["senderId"], "r-1");
        assert_eq!(value["data"]["message"]["content"], "Is this available?");
    }
}
