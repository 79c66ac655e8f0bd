use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::types::{ConversationListEntry, LatestMessage};

/// Every conversation the local user participates in, newest first.
///
/// Entries stay sorted by `updated_at` descending. Mutation is crate-private:
/// only the reconciliation engine writes here.
#[derive(Debug, Clone)]
pub struct ChatListStore {
    local_user_id: String,
    entries: Vec<ConversationListEntry>,
    /// Conversations with client-side unseen increments a snapshot has not caught up with yet.
    tracked_unseen: HashSet<String>,
}

impl ChatListStore {
    /// Empty list owned by `local_user_id`.
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            entries: Vec::new(),
            tracked_unseen: HashSet::new(),
        }
    }

    /// Entries in display order.
    pub fn entries(&self) -> &[ConversationListEntry] {
        &self.entries
    }

    /// Entry for `chat_id`, if listed.
    pub fn get(&self, chat_id: &str) -> Option<&ConversationListEntry> {
        self.entries.iter().find(|entry| entry.chat.id == chat_id)
    }

    /// Whether `chat_id` is listed.
    pub fn contains(&self, chat_id: &str) -> bool {
        self.position(chat_id).is_some()
    }

    /// Unseen counter for `chat_id`, if listed.
    pub fn unseen_count(&self, chat_id: &str) -> Option<u32> {
        self.get(chat_id).map(|entry| entry.chat.unseen_count)
    }

    /// Number of listed conversations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no conversations are listed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Overwrite the list with a fetched snapshot.
    ///
    /// A conversation whose counter was incremented client-side keeps the
    /// larger of the two counts until a snapshot reports at least as many.
    pub(crate) fn replace_all(&mut self, entries: Vec<ConversationListEntry>) {
        let mut seen_ids = HashSet::new();
        let mut incoming = Vec::with_capacity(entries.len());
        for mut entry in entries {
            if !seen_ids.insert(entry.chat.id.clone()) {
                warn!(chat_id = %entry.chat.id, "dropping duplicate conversation from snapshot");
                continue;
            }

            if self.tracked_unseen.contains(&entry.chat.id) {
                let local = self.unseen_count(&entry.chat.id).unwrap_or(0);
                if entry.chat.unseen_count >= local {
                    self.tracked_unseen.remove(&entry.chat.id);
                } else {
                    trace!(
                        chat_id = %entry.chat.id,
                        snapshot = entry.chat.unseen_count,
                        local,
                        "keeping locally tracked unseen count"
                    );
                    entry.chat.unseen_count = local;
                }
            }
            incoming.push(entry);
        }

        incoming.sort_by(|a, b| b.chat.updated_at.cmp(&a.chat.updated_at));
        self.tracked_unseen.retain(|chat_id| seen_ids.contains(chat_id));
        self.entries = incoming;
        debug!(conversation_count = self.entries.len(), "conversation list replaced");
    }

    /// Move a conversation to the front after a new message.
    ///
    /// Returns `false` without touching anything when the conversation is not
    /// in the list; the next full refresh will bring it in.
    pub(crate) fn bump_to_top(
        &mut self,
        chat_id: &str,
        preview: LatestMessage,
        increment_unseen: bool,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(index) = self.position(chat_id) else {
            trace!(%chat_id, "bump target not in conversation list");
            return false;
        };

        let mut entry = self.entries.remove(index);
        // Never sort behind an entry stamped ahead of the local clock.
        let newest = self
            .entries
            .first()
            .map(|first| first.chat.updated_at)
            .unwrap_or(now);
        entry.chat.updated_at = now.max(newest);

        if increment_unseen && preview.sender != self.local_user_id {
            entry.chat.unseen_count = entry.chat.unseen_count.saturating_add(1);
            self.tracked_unseen.insert(chat_id.to_owned());
        }
        entry.chat.latest_message = Some(preview);

        trace!(
            %chat_id,
            unseen_count = entry.chat.unseen_count,
            "conversation bumped to top"
        );
        self.entries.insert(0, entry);
        true
    }

    /// Zero a conversation's counter in place, without reordering.
    pub(crate) fn reset_unseen(&mut self, chat_id: &str) -> bool {
        self.tracked_unseen.remove(chat_id);
        match self.entries.iter_mut().find(|entry| entry.chat.id == chat_id) {
            Some(entry) => {
                entry.chat.unseen_count = 0;
                true
            }
            None => false,
        }
    }

    fn position(&self, chat_id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.chat.id == chat_id)
    }
}
