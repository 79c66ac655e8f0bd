use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::SyncError,
    normalization::{WireConversationEntry, WireMessage, WireTimeline},
};

/// Placeholder preview shown for attachment-only messages.
pub const IMAGE_PREVIEW_TEXT: &str = "📷 image";

/// User record as returned by the user service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Stable user identifier.
    #[serde(rename = "_id")]
    pub id: String,
    /// Display name.
    pub name: String,
    /// Contact identifier (email address).
    #[serde(default)]
    pub email: String,
}

/// Denormalized summary of the newest message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct LatestMessage {
    /// Sender user ID.
    pub sender: String,
    /// Display-ready preview text.
    #[serde(default)]
    pub text: String,
}

impl LatestMessage {
    /// Preview with explicit sender and text.
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Build the list preview for a message, substituting a placeholder for attachments.
    pub fn for_message(message: &Message) -> Self {
        let text = match message.kind {
            MessageKind::Image => IMAGE_PREVIEW_TEXT.to_owned(),
            MessageKind::Text => message.text.clone().unwrap_or_default(),
        };
        Self::new(message.sender.clone(), text)
    }
}

/// Two-party conversation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation ID.
    #[serde(rename = "_id")]
    pub id: String,
    /// Both participant user IDs.
    #[serde(default)]
    pub users: Vec<String>,
    /// Latest-message summary, absent for brand-new conversations.
    #[serde(default)]
    pub latest_message: Option<LatestMessage>,
    pub created_at: DateTime<Utc>,
    /// Recency timestamp used for list ordering.
    pub updated_at: DateTime<Utc>,
    /// Messages not yet viewed by the local user.
    #[serde(default)]
    pub unseen_count: u32,
}

/// Conversation paired with the other participant's flattened user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "WireConversationEntry")]
pub struct ConversationListEntry {
    /// The non-self participant.
    pub user: User,
    /// Conversation metadata.
    pub chat: Conversation,
}

/// Message content discriminator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// Remote reference to an uploaded attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub public_id: String,
}

/// One message in a conversation timeline.
///
/// Decoding goes through [`WireMessage`], which rejects messages carrying
/// neither text nor an attachment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", try_from = "WireMessage")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub chat_id: String,
    pub sender: String,
    pub text: Option<String>,
    #[serde(rename = "image")]
    pub attachment: Option<Attachment>,
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    pub seen: bool,
    pub seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Timeline fetch result for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "WireTimeline")]
pub struct ConversationTimeline {
    pub messages: Vec<Message>,
    /// The other participant, unwrapped one level when nested.
    #[serde(rename = "user")]
    pub participant: User,
}

/// Send-message response: the created message plus the echoed sender ID.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SentMessage {
    pub message: Message,
    pub sender: String,
}

/// Attachment bytes handed to the gateway as an opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutgoingAttachment {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Message composed locally and not yet accepted by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub text: Option<String>,
    pub attachment: Option<OutgoingAttachment>,
}

impl OutgoingMessage {
    /// Text-only draft.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    /// Reject drafts with blank text and no attachment, before any network call.
    pub fn validate(&self) -> Result<(), SyncError> {
        let has_text = self
            .text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty());
        if has_text || self.attachment.is_some() {
            Ok(())
        } else {
            Err(SyncError::empty_message())
        }
    }

    /// Text to transmit, dropping whitespace-only input.
    pub fn sendable_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

/// Raw push frame as delivered by the connection manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InboundFrame {
    /// Signal name, for example `newMessage`.
    pub name: String,
    /// Untyped JSON payload.
    pub payload: serde_json::Value,
}

impl InboundFrame {
    /// Frame named `name` carrying `payload`.
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Closed set of pushed events understood by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushEvent {
    /// A message was created in some conversation.
    NewMessage(Message),
    /// The counterpart viewed the listed messages.
    MessagesSeen {
        chat_id: String,
        message_ids: Vec<String>,
    },
    /// A participant started typing.
    UserTyping { chat_id: String, user_id: String },
    /// A participant stopped typing.
    UserStoppedTyping { chat_id: String, user_id: String },
    /// Unknown signal or malformed payload; dropped by the engine.
    Ignored { name: String, reason: String },
}

/// Signals emitted to the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboundSignal {
    JoinChat { chat_id: String },
    LeaveChat { chat_id: String },
    Typing { chat_id: String, user_id: String },
    StopTyping { chat_id: String, user_id: String },
}

impl OutboundSignal {
    /// Wire signal name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat { .. } => "joinChat",
            Self::LeaveChat { .. } => "leaveChat",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stopTyping",
        }
    }

    /// Wire payload: a bare conversation ID for room signals, an object for typing.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::JoinChat { chat_id } | Self::LeaveChat { chat_id } => {
                serde_json::Value::String(chat_id.clone())
            }
            Self::Typing { chat_id, user_id } | Self::StopTyping { chat_id, user_id } => {
                serde_json::json!({ "chatId": chat_id, "userId": user_id })
            }
        }
    }

    /// Conversation the signal targets.
    pub fn chat_id(&self) -> &str {
        match self {
            Self::JoinChat { chat_id }
            | Self::LeaveChat { chat_id }
            | Self::Typing { chat_id, .. }
            | Self::StopTyping { chat_id, .. } => chat_id,
        }
    }
}

/// User actions accepted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncCommand {
    /// Make a conversation the active one.
    SelectConversation { chat_id: String },
    /// Leave the active conversation without selecting another.
    Deselect,
    /// Create a conversation with another user and activate it.
    StartConversation { other_user_id: String },
    /// Compose-box content changed.
    InputChanged { text: String },
    /// Send a message to the active conversation.
    SendMessage(OutgoingMessage),
    /// Re-fetch the conversation list.
    RefreshConversations,
    /// Re-fetch the user directory.
    RefreshUsers,
    /// List known users matching a name query.
    SearchUsers { query: String },
    /// Leave the active room, cancel timers and stop the runtime.
    Shutdown,
}

/// Non-blocking user notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notice {
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable text.
    pub message: String,
}

impl Notice {
    /// Notice with a stable code and display text.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&SyncError> for Notice {
    fn from(err: &SyncError) -> Self {
        Self::new(err.code.clone(), err.message.clone())
    }
}

/// Sidebar row derived from one conversation list entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationRow {
    pub chat_id: String,
    pub user: User,
    pub latest_message: Option<LatestMessage>,
    /// Whether the latest message was sent by the local user.
    pub latest_is_own: bool,
    pub unseen_count: u32,
    pub updated_at: DateTime<Utc>,
    pub is_online: bool,
    pub is_selected: bool,
}

/// User directory row used when starting a new conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub user: User,
    pub is_online: bool,
}

/// Read-only view of everything the engine holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SyncSnapshot {
    /// `true` once a conversation list fetch has succeeded, even if it was empty.
    pub conversations_loaded: bool,
    pub conversations: Vec<ConversationRow>,
    pub active_chat_id: Option<String>,
    pub participant: Option<User>,
    pub participant_online: bool,
    pub remote_typing: bool,
    pub messages: Vec<Message>,
}

/// Events broadcast by the sync runtime to its subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SyncEvent {
    /// No bearer credential was available; nothing was loaded.
    NoSession,
    /// The local user's profile resolved and the engine is running.
    SessionReady { user: User },
    /// State changed; carries a fresh snapshot.
    Snapshot(SyncSnapshot),
    /// A recoverable failure the user should hear about.
    Notice(Notice),
    /// Answer to a user search.
    Directory {
        query: String,
        entries: Vec<DirectoryEntry>,
    },
    /// The runtime loop exited.
    Stopped,
}

/// Runtime tuning values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Inactivity window after the last keystroke before stop-typing is emitted.
    pub typing_idle: Duration,
    /// Command queue capacity.
    pub command_buffer: usize,
    /// Broadcast event buffer capacity.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            typing_idle: Duration::from_secs(2),
            command_buffer: 64,
            event_buffer: 256,
        }
    }
}
