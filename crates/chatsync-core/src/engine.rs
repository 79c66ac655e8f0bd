//! Reconciliation of fetched snapshots with pushed events.
//!
//! The engine is a synchronous state container: every input (user command,
//! pushed event, fetch outcome, timer expiry) is applied in arrival order and
//! yields a list of [`Effect`]s for the runtime to carry out. Fetches are
//! tagged so results for a conversation that is no longer active are dropped.

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::{
    chat_list::ChatListStore,
    error::SyncError,
    presence::PresenceTracker,
    timeline::MessageStore,
    types::{
        ConversationListEntry, ConversationRow, ConversationTimeline, DirectoryEntry,
        LatestMessage, Notice, OutboundSignal, OutgoingMessage, PushEvent, SentMessage,
        SyncCommand, SyncSnapshot, User,
    },
    typing::{TimerToken, TypingAction, TypingCoordinator},
};

/// Tags one timeline fetch with the activation it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTag(u64);

/// Request/response calls the engine wants performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchRequest {
    Conversations,
    Users,
    Timeline {
        tag: RequestTag,
        chat_id: String,
    },
    CreateConversation {
        local_user_id: String,
        other_user_id: String,
    },
    SendMessage {
        client_txn_id: String,
        chat_id: String,
        message: OutgoingMessage,
    },
}

/// Completed request/response calls, fed back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Conversations(Result<Vec<ConversationListEntry>, SyncError>),
    Users(Result<Vec<User>, SyncError>),
    Timeline {
        tag: RequestTag,
        chat_id: String,
        result: Result<ConversationTimeline, SyncError>,
    },
    ConversationCreated {
        other_user_id: String,
        result: Result<String, SyncError>,
    },
    MessageSent {
        client_txn_id: String,
        chat_id: String,
        result: Result<SentMessage, SyncError>,
    },
}

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a signal on the event channel.
    Emit(OutboundSignal),
    /// Issue a request/response call.
    Fetch(FetchRequest),
    /// (Re)arm the typing idle timer.
    ArmTypingTimer(TimerToken),
    /// Cancel the typing idle timer.
    CancelTypingTimer,
    /// Surface a non-blocking notification.
    Notify(Notice),
}

impl From<TypingAction> for Effect {
    fn from(action: TypingAction) -> Self {
        match action {
            TypingAction::Emit(signal) => Self::Emit(signal),
            TypingAction::ArmTimer(token) => Self::ArmTypingTimer(token),
            TypingAction::CancelTimer => Self::CancelTypingTimer,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveConversation {
    chat_id: String,
    tag: RequestTag,
    participant: Option<User>,
}

/// Single arbiter for every inbound event.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    local_user: User,
    chats: ChatListStore,
    messages: MessageStore,
    typing: TypingCoordinator,
    users: Vec<User>,
    conversations_loaded: bool,
    active: Option<ActiveConversation>,
    next_tag: u64,
    clock: fn() -> DateTime<Utc>,
}

impl ReconciliationEngine {
    /// Empty engine for the signed-in `local_user`.
    pub fn new(local_user: User) -> Self {
        Self {
            chats: ChatListStore::new(local_user.id.clone()),
            messages: MessageStore::new(),
            typing: TypingCoordinator::new(local_user.id.clone()),
            users: Vec::new(),
            conversations_loaded: false,
            active: None,
            next_tag: 0,
            clock: Utc::now,
            local_user,
        }
    }

    /// Replace the wall clock used for `updated_at`/`seen_at` stamps.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Signed-in user.
    pub fn local_user(&self) -> &User {
        &self.local_user
    }

    /// Conversation list.
    pub fn chats(&self) -> &ChatListStore {
        &self.chats
    }

    /// Active conversation's messages.
    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    /// Typing state.
    pub fn typing(&self) -> &TypingCoordinator {
        &self.typing
    }

    /// Last fetched user directory.
    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Currently selected conversation.
    pub fn active_chat_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.chat_id.as_str())
    }

    /// Initial snapshot requests issued once the session is known.
    pub fn initial_load(&self) -> Vec<Effect> {
        vec![
            Effect::Fetch(FetchRequest::Conversations),
            Effect::Fetch(FetchRequest::Users),
        ]
    }

    /// Apply one user action.
    ///
    /// Validation failures are returned before anything is mutated.
    pub fn handle_command(&mut self, command: SyncCommand) -> Result<Vec<Effect>, SyncError> {
        match command {
            SyncCommand::SelectConversation { chat_id } => Ok(self.select(chat_id)),
            SyncCommand::Deselect | SyncCommand::Shutdown => Ok(self.leave_active()),
            SyncCommand::StartConversation { other_user_id } => {
                Ok(vec![Effect::Fetch(FetchRequest::CreateConversation {
                    local_user_id: self.local_user.id.clone(),
                    other_user_id,
                })])
            }
            SyncCommand::InputChanged { text } => Ok(map_typing(self.typing.on_input(&text))),
            SyncCommand::SendMessage(message) => self.send(message),
            SyncCommand::RefreshConversations => {
                Ok(vec![Effect::Fetch(FetchRequest::Conversations)])
            }
            SyncCommand::RefreshUsers => Ok(vec![Effect::Fetch(FetchRequest::Users)]),
            // Answered by the runtime from `user_directory`, which needs presence.
            SyncCommand::SearchUsers { .. } => Ok(Vec::new()),
        }
    }

    /// Apply one pushed event.
    pub fn handle_push(&mut self, event: PushEvent) -> Vec<Effect> {
        match event {
            PushEvent::NewMessage(message) => {
                let chat_id = message.chat_id.clone();
                let is_active = self.active_chat_id() == Some(chat_id.as_str());
                let preview = LatestMessage::for_message(&message);
                if is_active {
                    self.messages.append_if_absent(message);
                }

                if self.chats.contains(&chat_id) {
                    self.chats
                        .bump_to_top(&chat_id, preview, !is_active, (self.clock)());
                    Vec::new()
                } else {
                    debug!(%chat_id, "message for unknown conversation; refreshing list");
                    vec![Effect::Fetch(FetchRequest::Conversations)]
                }
            }
            PushEvent::MessagesSeen {
                chat_id,
                message_ids,
            } => {
                // Seen state of inactive conversations is left to the next fetch.
                if self.active_chat_id() == Some(chat_id.as_str()) {
                    let changed = self.messages.mark_seen(&message_ids, (self.clock)());
                    trace!(%chat_id, changed, "applied seen receipt");
                }
                Vec::new()
            }
            PushEvent::UserTyping { chat_id, user_id } => {
                self.typing.on_remote_signal(&chat_id, &user_id, true);
                Vec::new()
            }
            PushEvent::UserStoppedTyping { chat_id, user_id } => {
                self.typing.on_remote_signal(&chat_id, &user_id, false);
                Vec::new()
            }
            PushEvent::Ignored { name, reason } => {
                trace!(%name, %reason, "ignoring push event");
                Vec::new()
            }
        }
    }

    /// Apply one completed request/response call.
    pub fn handle_outcome(&mut self, outcome: FetchOutcome) -> Vec<Effect> {
        match outcome {
            FetchOutcome::Conversations(Ok(entries)) => {
                self.chats.replace_all(entries);
                self.conversations_loaded = true;
                if let Some(active) = self.active.as_mut() {
                    self.chats.reset_unseen(&active.chat_id);
                    if active.participant.is_none() {
                        active.participant =
                            self.chats.get(&active.chat_id).map(|entry| entry.user.clone());
                    }
                }
                Vec::new()
            }
            FetchOutcome::Users(Ok(users)) => {
                debug!(user_count = users.len(), "user directory replaced");
                self.users = users;
                Vec::new()
            }
            FetchOutcome::Timeline {
                tag,
                chat_id,
                result,
            } => self.apply_timeline(tag, chat_id, result),
            FetchOutcome::ConversationCreated {
                other_user_id,
                result: Ok(chat_id),
            } => {
                debug!(%chat_id, %other_user_id, "conversation created");
                let mut effects = self.select(chat_id);
                effects.push(Effect::Fetch(FetchRequest::Conversations));
                effects
            }
            FetchOutcome::ConversationCreated {
                other_user_id,
                result: Err(err),
            } => {
                warn!(%other_user_id, error = %err, "failed to create conversation");
                vec![Effect::Notify(Notice::new(
                    err.code,
                    "failed to start the chat",
                ))]
            }
            FetchOutcome::MessageSent {
                client_txn_id,
                chat_id,
                result: Ok(sent),
            } => {
                debug!(%client_txn_id, %chat_id, message_id = %sent.message.id, "message sent");
                let mut preview = LatestMessage::for_message(&sent.message);
                preview.sender = sent.sender;
                if self.active_chat_id() == Some(chat_id.as_str()) {
                    self.messages.append_if_absent(sent.message);
                }
                if self
                    .chats
                    .bump_to_top(&chat_id, preview, false, (self.clock)())
                {
                    Vec::new()
                } else {
                    vec![Effect::Fetch(FetchRequest::Conversations)]
                }
            }
            FetchOutcome::MessageSent {
                client_txn_id,
                chat_id,
                result: Err(err),
            } => {
                warn!(%client_txn_id, %chat_id, error = %err, "send failed");
                vec![Effect::Notify(Notice::from(&err))]
            }
            FetchOutcome::Conversations(Err(err)) | FetchOutcome::Users(Err(err)) => {
                warn!(error = %err, "snapshot fetch failed; keeping current state");
                vec![Effect::Notify(Notice::from(&err))]
            }
        }
    }

    /// Typing idle timer fired.
    pub fn on_typing_timer(&mut self, token: TimerToken) -> Vec<Effect> {
        map_typing(self.typing.on_timer_elapsed(token))
    }

    /// Re-fetch everything after pushed events may have been dropped upstream.
    ///
    /// The active timeline is re-fetched under a fresh tag without clearing
    /// it, so nothing already shown disappears.
    pub fn resync(&mut self) -> Vec<Effect> {
        let mut effects = vec![Effect::Fetch(FetchRequest::Conversations)];
        let tag = self.next_request_tag();
        if let Some(active) = self.active.as_mut() {
            active.tag = tag;
            effects.push(Effect::Fetch(FetchRequest::Timeline {
                tag,
                chat_id: active.chat_id.clone(),
            }));
        }
        effects
    }

    /// Read-only view for consumers.
    pub fn snapshot(&self, presence: &PresenceTracker) -> SyncSnapshot {
        let active_chat_id = self.active_chat_id().map(str::to_owned);
        let conversations = self
            .chats
            .entries()
            .iter()
            .map(|entry| ConversationRow {
                chat_id: entry.chat.id.clone(),
                user: entry.user.clone(),
                latest_is_own: entry
                    .chat
                    .latest_message
                    .as_ref()
                    .is_some_and(|latest| latest.sender == self.local_user.id),
                latest_message: entry.chat.latest_message.clone(),
                unseen_count: entry.chat.unseen_count,
                updated_at: entry.chat.updated_at,
                is_online: presence.is_online(&entry.user.id),
                is_selected: active_chat_id.as_deref() == Some(entry.chat.id.as_str()),
            })
            .collect();
        let participant = self
            .active
            .as_ref()
            .and_then(|active| active.participant.clone());

        SyncSnapshot {
            conversations_loaded: self.conversations_loaded,
            conversations,
            participant_online: participant
                .as_ref()
                .is_some_and(|user| presence.is_online(&user.id)),
            participant,
            active_chat_id,
            remote_typing: self.typing.remote_typing(),
            messages: self.messages.messages().to_vec(),
        }
    }

    /// Users other than self whose name contains `query`, case-insensitively.
    pub fn user_directory(&self, query: &str, presence: &PresenceTracker) -> Vec<DirectoryEntry> {
        let needle = query.trim().to_lowercase();
        self.users
            .iter()
            .filter(|user| user.id != self.local_user.id)
            .filter(|user| user.name.to_lowercase().contains(&needle))
            .map(|user| DirectoryEntry {
                user: user.clone(),
                is_online: presence.is_online(&user.id),
            })
            .collect()
    }

    fn select(&mut self, chat_id: String) -> Vec<Effect> {
        if self.active_chat_id() == Some(chat_id.as_str()) {
            return Vec::new();
        }

        let mut effects = self.leave_active();
        effects.extend(map_typing(self.typing.activate(chat_id.clone())));
        let tag = self.next_request_tag();
        self.active = Some(ActiveConversation {
            chat_id: chat_id.clone(),
            tag,
            participant: self.chats.get(&chat_id).map(|entry| entry.user.clone()),
        });
        self.chats.reset_unseen(&chat_id);
        debug!(%chat_id, ?tag, "conversation activated");

        // Join before fetching so nothing pushed in between is missed.
        effects.push(Effect::Emit(OutboundSignal::JoinChat {
            chat_id: chat_id.clone(),
        }));
        effects.push(Effect::Fetch(FetchRequest::Timeline { tag, chat_id }));
        effects
    }

    fn leave_active(&mut self) -> Vec<Effect> {
        let mut effects = map_typing(self.typing.deactivate());
        if let Some(previous) = self.active.take() {
            debug!(chat_id = %previous.chat_id, "conversation deactivated");
            effects.push(Effect::Emit(OutboundSignal::LeaveChat {
                chat_id: previous.chat_id,
            }));
        }
        self.messages.clear();
        effects
    }

    fn send(&mut self, message: OutgoingMessage) -> Result<Vec<Effect>, SyncError> {
        message.validate()?;
        let chat_id = self
            .active_chat_id()
            .map(str::to_owned)
            .ok_or_else(|| SyncError::no_active_conversation("send_message"))?;

        let mut effects = map_typing(self.typing.on_send());
        let client_txn_id = Uuid::new_v4().to_string();
        trace!(%client_txn_id, %chat_id, "queueing send");
        effects.push(Effect::Fetch(FetchRequest::SendMessage {
            client_txn_id,
            chat_id,
            message,
        }));
        Ok(effects)
    }

    fn apply_timeline(
        &mut self,
        tag: RequestTag,
        chat_id: String,
        result: Result<ConversationTimeline, SyncError>,
    ) -> Vec<Effect> {
        let Some(active) = self.active.as_mut().filter(|active| active.tag == tag) else {
            debug!(%chat_id, ?tag, "discarding stale timeline result");
            return Vec::new();
        };

        match result {
            Ok(timeline) => {
                // Messages pushed between join and resolution survive the overwrite.
                let gap = self.messages.messages().to_vec();
                self.messages.replace(timeline.messages);
                for message in gap {
                    self.messages.append_if_absent(message);
                }
                active.participant = Some(timeline.participant);
                debug!(
                    %chat_id,
                    message_count = self.messages.len(),
                    "active timeline loaded"
                );
                vec![Effect::Fetch(FetchRequest::Conversations)]
            }
            Err(err) => {
                warn!(%chat_id, error = %err, "timeline fetch failed");
                vec![Effect::Notify(Notice::from(&err))]
            }
        }
    }

    fn next_request_tag(&mut self) -> RequestTag {
        self.next_tag = self.next_tag.wrapping_add(1);
        RequestTag(self.next_tag)
    }
}

fn map_typing(actions: Vec<TypingAction>) -> Vec<Effect> {
    actions.into_iter().map(Effect::from).collect()
}
