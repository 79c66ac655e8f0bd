//! Wire-shape normalization at the store boundary.
//!
//! Upstream responses are not uniform: the conversation-list and timeline
//! endpoints sometimes wrap the counterpart as `{ "user": { ...user } }`
//! instead of a bare user object. Decoding always unwraps one level rather
//! than trusting the shape depth. Push payloads are untyped JSON and decode
//! into the closed [`PushEvent`] union, with anything unexpected mapped to
//! [`PushEvent::Ignored`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

use crate::types::{
    Attachment, Conversation, ConversationListEntry, ConversationTimeline, InboundFrame, Message,
    MessageKind, PushEvent, User,
};

/// User reference that may arrive double-wrapped.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WireUserRef {
    /// `{ "user": { "_id": .. } }`
    Nested { user: User },
    /// `{ "_id": .. }`
    Flat(User),
}

impl WireUserRef {
    /// Unwrap exactly one level of nesting.
    pub fn into_user(self) -> User {
        match self {
            Self::Nested { user } | Self::Flat(user) => user,
        }
    }
}

/// Conversation-list entry as sent by the chat service.
#[derive(Debug, Clone, Deserialize)]
pub struct WireConversationEntry {
    user: WireUserRef,
    chat: Conversation,
}

impl From<WireConversationEntry> for ConversationListEntry {
    fn from(wire: WireConversationEntry) -> Self {
        Self {
            user: wire.user.into_user(),
            chat: wire.chat,
        }
    }
}

/// Timeline response as sent by the chat service.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTimeline {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
    user: WireUserRef,
}

impl From<WireTimeline> for ConversationTimeline {
    fn from(wire: WireTimeline) -> Self {
        let messages = wire
            .messages
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<Message>(value) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(error = %err, "dropping malformed message from timeline");
                    None
                }
            })
            .collect();
        Self {
            messages,
            participant: wire.user.into_user(),
        }
    }
}

/// Message as sent on the wire, before content validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "_id")]
    id: String,
    chat_id: String,
    sender: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    image: Option<Attachment>,
    #[serde(default)]
    message_type: Option<MessageKind>,
    #[serde(default)]
    seen: bool,
    #[serde(default)]
    seen_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WireMessage> for Message {
    type Error = String;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let text = wire.text.filter(|text| !text.is_empty());
        if text.is_none() && wire.image.is_none() {
            return Err(format!(
                "message '{}' has neither text nor attachment",
                wire.id
            ));
        }
        let kind = wire.message_type.unwrap_or(if wire.image.is_some() {
            MessageKind::Image
        } else {
            MessageKind::Text
        });

        Ok(Self {
            id: wire.id,
            chat_id: wire.chat_id,
            sender: wire.sender,
            text,
            attachment: wire.image,
            kind,
            seen: wire.seen,
            seen_at: wire.seen_at,
            created_at: wire.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSeenReceipt {
    chat_id: String,
    message_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTypingSignal {
    chat_id: String,
    user_id: String,
}

/// Decode one pushed frame into a [`PushEvent`]; never fails.
pub fn decode_push_frame(frame: InboundFrame) -> PushEvent {
    let InboundFrame { name, payload } = frame;
    let decoded = match name.as_str() {
        "newMessage" => serde_json::from_value::<Message>(payload).map(PushEvent::NewMessage),
        "messagesSeen" => {
            serde_json::from_value::<WireSeenReceipt>(payload).map(|receipt| {
                PushEvent::MessagesSeen {
                    chat_id: receipt.chat_id,
                    message_ids: receipt.message_ids,
                }
            })
        }
        "userTyping" => serde_json::from_value::<WireTypingSignal>(payload).map(|signal| {
            PushEvent::UserTyping {
                chat_id: signal.chat_id,
                user_id: signal.user_id,
            }
        }),
        "userStoppedTyping" => {
            serde_json::from_value::<WireTypingSignal>(payload).map(|signal| {
                PushEvent::UserStoppedTyping {
                    chat_id: signal.chat_id,
                    user_id: signal.user_id,
                }
            })
        }
        _ => {
            return PushEvent::Ignored {
                name,
                reason: "unknown signal".to_owned(),
            };
        }
    };

    decoded.unwrap_or_else(|err| PushEvent::Ignored {
        name,
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn user_json(id: &str) -> serde_json::Value {
        json!({ "_id": id, "name": "Bob", "email": "bob@example.org" })
    }

    fn chat_json(id: &str) -> serde_json::Value {
        json!({
            "_id": id,
            "users": ["u1", "u2"],
            "latestMessage": { "sender": "u2", "text": "hey" },
            "createdAt": "2025-01-01T10:00:00Z",
            "updatedAt": "2025-01-02T10:00:00Z",
            "unseenCount": 3
        })
    }

    #[test]
    fn unwraps_double_wrapped_conversation_user() {
        let entry: ConversationListEntry = serde_json::from_value(json!({
            "user": { "user": user_json("u2") },
            "chat": chat_json("c1"),
        }))
        .expect("nested entry should decode");

        assert_eq!(entry.user.id, "u2");
        assert_eq!(entry.user.name, "Bob");
        assert_eq!(entry.chat.unseen_count, 3);
    }

    #[test]
    fn accepts_flat_conversation_user() {
        let entry: ConversationListEntry = serde_json::from_value(json!({
            "user": user_json("u2"),
            "chat": chat_json("c1"),
        }))
        .expect("flat entry should decode");

        assert_eq!(entry.user.id, "u2");
        assert_eq!(entry.chat.id, "c1");
    }

    #[test]
    fn missing_unseen_count_defaults_to_zero() {
        let mut chat = chat_json("c1");
        chat.as_object_mut()
            .expect("chat is an object")
            .remove("unseenCount");
        let entry: ConversationListEntry =
            serde_json::from_value(json!({ "user": user_json("u2"), "chat": chat }))
                .expect("entry should decode");
        assert_eq!(entry.chat.unseen_count, 0);
    }

    #[test]
    fn timeline_drops_messages_without_content() {
        let timeline: ConversationTimeline = serde_json::from_value(json!({
            "messages": [
                {
                    "_id": "m1", "chatId": "c1", "sender": "u2", "text": "hello",
                    "messageType": "text", "seen": false, "createdAt": "2025-01-02T10:00:00Z"
                },
                {
                    "_id": "m2", "chatId": "c1", "sender": "u2",
                    "messageType": "text", "seen": false, "createdAt": "2025-01-02T10:01:00Z"
                }
            ],
            "user": { "user": user_json("u2") },
        }))
        .expect("timeline should decode");

        assert_eq!(timeline.messages.len(), 1);
        assert_eq!(timeline.messages[0].id, "m1");
        assert_eq!(timeline.participant.id, "u2");
    }

    #[test]
    fn decodes_new_message_frame() {
        let event = decode_push_frame(InboundFrame::new(
            "newMessage",
            json!({
                "_id": "m9", "chatId": "c1", "sender": "u2",
                "image": { "url": "https://cdn.example.org/a.png", "publicId": "a" },
                "messageType": "image", "seen": false, "createdAt": "2025-01-02T10:00:00Z"
            }),
        ));

        match event {
            PushEvent::NewMessage(message) => {
                assert_eq!(message.id, "m9");
                assert_eq!(message.kind, MessageKind::Image);
                assert!(message.text.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn infers_image_kind_when_discriminator_is_missing() {
        let event = decode_push_frame(InboundFrame::new(
            "newMessage",
            json!({
                "_id": "m9", "chatId": "c1", "sender": "u2",
                "image": { "url": "https://cdn.example.org/a.png" },
                "createdAt": "2025-01-02T10:00:00Z"
            }),
        ));
        let PushEvent::NewMessage(message) = event else {
            panic!("expected new message");
        };
        assert_eq!(message.kind, MessageKind::Image);
    }

    #[test]
    fn decodes_seen_and_typing_frames() {
        let seen = decode_push_frame(InboundFrame::new(
            "messagesSeen",
            json!({ "chatId": "c1", "messageIds": ["m1", "m2"] }),
        ));
        assert_eq!(
            seen,
            PushEvent::MessagesSeen {
                chat_id: "c1".into(),
                message_ids: vec!["m1".into(), "m2".into()],
            }
        );

        let typing = decode_push_frame(InboundFrame::new(
            "userStoppedTyping",
            json!({ "chatId": "c1", "userId": "u2" }),
        ));
        assert_eq!(
            typing,
            PushEvent::UserStoppedTyping {
                chat_id: "c1".into(),
                user_id: "u2".into(),
            }
        );
    }

    #[test]
    fn malformed_and_unknown_frames_are_ignored() {
        let empty = decode_push_frame(InboundFrame::new(
            "newMessage",
            json!({ "_id": "m1", "chatId": "c1", "sender": "u2", "createdAt": "2025-01-02T10:00:00Z" }),
        ));
        assert!(matches!(empty, PushEvent::Ignored { ref name, .. } if name == "newMessage"));

        let wrong_shape = decode_push_frame(InboundFrame::new("userTyping", json!("c1")));
        assert!(matches!(wrong_shape, PushEvent::Ignored { .. }));

        let unknown = decode_push_frame(InboundFrame::new("getOnlineUser", json!(["u1"])));
        assert_eq!(
            unknown,
            PushEvent::Ignored {
                name: "getOnlineUser".into(),
                reason: "unknown signal".into(),
            }
        );
    }
}
