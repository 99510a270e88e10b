// Wire events exchanged with browser clients over the WebSocket

use crate::chat::message::{Message, ReplyRef};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;

/// Events a client may send. Anything else is logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientEvent {
    SetUsername {
        username: String,
    },
    #[serde(rename_all = "camelCase")]
    ChangeUsername {
        new_username: String,
    },
    User {
        message: String,
        #[serde(flatten)]
        reply: ReplyFields,
    },
    File(InboundFile),
    AdminLogin {
        username: String,
        password: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        #[serde(deserialize_with = "message_id")]
        message_id: u64,
    },
    Typing,
    StopTyping,
}

impl ClientEvent {
    /// Parse one text frame
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Optional reply fields shared by `user` and `file` events
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyFields {
    #[serde(default, deserialize_with = "optional_message_id")]
    pub reply_to: Option<u64>,
    #[serde(default)]
    pub reply_username: Option<String>,
    #[serde(default)]
    pub reply_message: Option<String>,
}

impl ReplyFields {
    /// A reply reference, if the client pointed at a message
    pub fn into_ref(self) -> Option<ReplyRef> {
        let reply_to = self.reply_to?;
        Some(ReplyRef {
            reply_to,
            reply_username: self.reply_username,
            reply_message: self.reply_message,
        })
    }
}

/// Attachment upload as sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFile {
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub file_data: String,
    #[serde(default)]
    pub file_category: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub reply: ReplyFields,
}

/// Clients send ids either as numbers or as decimal strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

impl NumberOrString {
    fn into_id<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            NumberOrString::Number(n) => Ok(n),
            NumberOrString::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid message id: {:?}", s))),
        }
    }
}

fn message_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    NumberOrString::deserialize(deserializer)?.into_id()
}

fn optional_message_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value.into_id().map(Some),
        None => Ok(None),
    }
}

/// Anything the server pushes to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServerEvent {
    /// A `user` or `file` record, serialized with its own `type` tag
    Chat(Arc<Message>),
    Notice(Notice),
}

/// Server-originated events that are not chat records
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Notice {
    Init {
        messages: Vec<Arc<Message>>,
    },
    OnlineUsers {
        users: Vec<String>,
    },
    UsernameSet {
        username: String,
    },
    UsernameTaken {
        message: String,
    },
    UsernameInvalid {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    UsernameChanged {
        old_username: String,
        new_username: String,
    },
    System {
        message: String,
        timestamp: u64,
    },
    Mention {
        from: String,
        message: String,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteMessage {
        message_id: u64,
    },
    Typing {
        username: String,
    },
    StopTyping {
        username: String,
    },
}

impl ServerEvent {
    /// Transient server notice
    pub fn system(message: impl Into<String>) -> Self {
        ServerEvent::Notice(Notice::System {
            message: message.into(),
            timestamp: crate::chat::message::now_millis(),
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Notice(Notice::Error {
            message: message.into(),
        })
    }

    /// Serialize to a JSON text frame
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Notice> for ServerEvent {
    fn from(notice: Notice) -> Self {
        ServerEvent::Notice(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_events() {
        let event = ClientEvent::from_text(r#"{"type":"set-username","username":"alice"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::SetUsername {
                username: "alice".to_string()
            }
        );

        let event =
            ClientEvent::from_text(r#"{"type":"change-username","newUsername":"bob"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::ChangeUsername {
                new_username: "bob".to_string()
            }
        );

        let event = ClientEvent::from_text(r#"{"type":"typing","username":"ignored"}"#).unwrap();
        assert_eq!(event, ClientEvent::Typing);
    }

    #[test]
    fn test_message_id_as_number_or_string() {
        let event = ClientEvent::from_text(r#"{"type":"delete-message","messageId":"12"}"#).unwrap();
        assert_eq!(event, ClientEvent::DeleteMessage { message_id: 12 });

        let event = ClientEvent::from_text(r#"{"type":"delete-message","messageId":4}"#).unwrap();
        assert_eq!(event, ClientEvent::DeleteMessage { message_id: 4 });

        assert!(ClientEvent::from_text(r#"{"type":"delete-message","messageId":"x"}"#).is_err());
    }

    #[test]
    fn test_reply_fields() {
        let event = ClientEvent::from_text(
            r#"{"type":"user","message":"sure","replyTo":"0","replyUsername":"bob","replyMessage":"lunch?"}"#,
        )
        .unwrap();

        let ClientEvent::User { message, reply } = event else {
            panic!("Wrong event parsed");
        };
        assert_eq!(message, "sure");
        let reply = reply.into_ref().unwrap();
        assert_eq!(reply.reply_to, 0);
        assert_eq!(reply.reply_username.as_deref(), Some("bob"));

        let event = ClientEvent::from_text(r#"{"type":"user","message":"plain"}"#).unwrap();
        let ClientEvent::User { reply, .. } = event else {
            panic!("Wrong event parsed");
        };
        assert_eq!(reply.into_ref(), None);
    }

    #[test]
    fn test_unknown_and_malformed_events_are_errors() {
        assert!(ClientEvent::from_text(r#"{"type":"launch-missiles"}"#).is_err());
        assert!(ClientEvent::from_text("not json").is_err());
        assert!(ClientEvent::from_text(r#"{"type":"set-username"}"#).is_err());
    }

    #[test]
    fn test_notice_wire_shape() {
        let event: ServerEvent = Notice::UsernameChanged {
            old_username: "a".to_string(),
            new_username: "b".to_string(),
        }
        .into();
        let value: serde_json::Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "username-changed");
        assert_eq!(value["oldUsername"], "a");
        assert_eq!(value["newUsername"], "b");

        let event: ServerEvent = Notice::DeleteMessage { message_id: 9 }.into();
        let value: serde_json::Value = serde_json::from_str(&event.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "delete-message");
        assert_eq!(value["messageId"], 9);
    }
}
