use std::future::Future;

use crate::{
    error::SyncError,
    types::{ConversationListEntry, ConversationTimeline, OutgoingMessage, SentMessage, User},
};

/// Request/response API consumed by the sync runtime.
///
/// Every call carries the session's bearer credential; implementations fail
/// with `no_session` when none is available.
pub trait SyncGateway: Send + Sync + 'static {
    /// Whether a bearer credential is available at all.
    fn has_credential(&self) -> bool;

    /// The local user's own profile.
    fn fetch_profile(&self) -> impl Future<Output = Result<User, SyncError>> + Send;

    /// Every conversation of the session, with the other participant unwrapped.
    fn fetch_conversations(
        &self,
    ) -> impl Future<Output = Result<Vec<ConversationListEntry>, SyncError>> + Send;

    /// Every other user.
    fn fetch_users(&self) -> impl Future<Output = Result<Vec<User>, SyncError>> + Send;

    /// Timeline and participant of one conversation.
    fn fetch_timeline(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<ConversationTimeline, SyncError>> + Send;

    /// Create a two-party conversation; resolves to its ID.
    fn create_conversation(
        &self,
        local_user_id: &str,
        other_user_id: &str,
    ) -> impl Future<Output = Result<String, SyncError>> + Send;

    /// Send a message to a conversation.
    fn send_message(
        &self,
        chat_id: &str,
        message: &OutgoingMessage,
    ) -> impl Future<Output = Result<SentMessage, SyncError>> + Send;
}
