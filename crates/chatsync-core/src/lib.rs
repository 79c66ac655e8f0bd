//! Client-side synchronization core for two-party chat.
//!
//! This crate holds the local conversation list, the active timeline and the
//! typing/presence state, and reconciles request/response snapshots with
//! pushed events. I/O is reached only through [`SyncGateway`] and
//! [`ConnectionManager`]; [`spawn_runtime`] drives everything from one task.

/// Command/event channels and the push-connection seam.
pub mod channel;
/// Ordered conversation list with unseen counters.
pub mod chat_list;
/// Reconciliation of snapshots with pushed events.
pub mod engine;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Request/response boundary.
pub mod gateway;
/// Wire-shape decoding for responses and push frames.
pub mod normalization;
/// Online-user view.
pub mod presence;
/// Backoff policy for idempotent fetches.
pub mod retry;
/// Task that owns the engine.
pub mod runtime;
/// Active conversation's message timeline.
pub mod timeline;
/// Data model and consumer-facing protocol types.
pub mod types;
/// Local typing debounce and remote typing flag.
pub mod typing;

pub use channel::{
    ConnectionManager, EventStream, LoopbackConnection, SyncChannelError, SyncChannels,
};
pub use chat_list::ChatListStore;
pub use engine::{Effect, FetchOutcome, FetchRequest, ReconciliationEngine, RequestTag};
pub use error::{SyncError, SyncErrorCategory, classify_http_status};
pub use gateway::SyncGateway;
pub use normalization::decode_push_frame;
pub use presence::PresenceTracker;
pub use retry::RetryPolicy;
pub use runtime::{SyncHandle, spawn_runtime};
pub use timeline::MessageStore;
pub use types::{
    Attachment, Conversation, ConversationListEntry, ConversationRow, ConversationTimeline,
    DirectoryEntry, IMAGE_PREVIEW_TEXT, InboundFrame, LatestMessage, Message, MessageKind, Notice,
    OutboundSignal, OutgoingAttachment, OutgoingMessage, PushEvent, RuntimeConfig, SentMessage,
    SyncCommand, SyncEvent, SyncSnapshot, User,
};
pub use typing::{LocalTypingState, TimerToken, TypingCoordinator};
