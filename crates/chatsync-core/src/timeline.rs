use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::types::Message;

/// Message timeline of the active conversation, in display order.
///
/// Message IDs are unique within the store. Seen flags only ever move from
/// `false` to `true`.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: Vec<Message>,
    ids: HashSet<String>,
}

impl MessageStore {
    /// Empty timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current messages in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Message with `message_id`, if stored.
    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    /// Whether a message with `message_id` is stored.
    pub fn contains(&self, message_id: &str) -> bool {
        self.ids.contains(message_id)
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the timeline holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Overwrite the timeline with a fetched one.
    ///
    /// Messages already marked seen here stay seen even if the fetched copy
    /// lags behind.
    pub(crate) fn replace(&mut self, messages: Vec<Message>) {
        let previous = std::mem::take(&mut self.messages);
        self.ids.clear();

        for mut message in messages {
            if self.ids.contains(&message.id) {
                continue;
            }
            if !message.seen
                && let Some(old) = previous
                    .iter()
                    .find(|old| old.id == message.id && old.seen)
            {
                message.seen = true;
                message.seen_at = old.seen_at;
            }
            self.ids.insert(message.id.clone());
            self.messages.push(message);
        }
        trace!(message_count = self.messages.len(), "timeline replaced");
    }

    /// Append at the tail unless a message with the same ID is already present.
    pub(crate) fn append_if_absent(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            trace!(message_id = %message.id, "duplicate message ignored");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Mark every stored message in `message_ids` as seen; returns how many changed.
    pub(crate) fn mark_seen(&mut self, message_ids: &[String], now: DateTime<Utc>) -> usize {
        let wanted: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        let mut changed = 0;
        for message in &mut self.messages {
            if !message.seen && wanted.contains(message.id.as_str()) {
                message.seen = true;
                message.seen_at = Some(now);
                changed += 1;
            }
        }
        changed
    }

    /// Drop every message.
    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::types::MessageKind;

    fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, second).unwrap()
    }

    fn message(id: &str, text: &str) -> Message {
        Message {
            id: id.to_owned(),
            chat_id: "c1".to_owned(),
            sender: "u2".to_owned(),
            text: Some(text.to_owned()),
            attachment: None,
            kind: MessageKind::Text,
            seen: false,
            seen_at: None,
            created_at: at(0),
        }
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn append_if_absent_is_idempotent() {
        let mut store = MessageStore::new();
        assert!(store.append_if_absent(message("m1", "one")));
        assert!(store.append_if_absent(message("m2", "two")));
        assert!(!store.append_if_absent(message("m1", "one (echo)")));

        assert_eq!(ids(&store), ["m1", "m2"]);
        assert_eq!(store.get("m1").map(|m| m.text.as_deref()), Some(Some("one")));
    }

    #[test]
    fn replace_overwrites_and_dedupes_snapshot() {
        let mut store = MessageStore::new();
        store.append_if_absent(message("old", "gone"));
        store.replace(vec![message("m1", "a"), message("m2", "b"), message("m1", "dup")]);

        assert_eq!(ids(&store), ["m1", "m2"]);
        assert!(!store.contains("old"));
        assert!(!store.append_if_absent(message("m2", "again")));
    }

    #[test]
    fn mark_seen_sets_flag_and_timestamp_for_known_ids_only() {
        let mut store = MessageStore::new();
        store.replace(vec![message("m1", "a"), message("m2", "b"), message("m3", "c")]);

        let changed = store.mark_seen(&["m1".into(), "m3".into(), "m404".into()], at(5));

        assert_eq!(changed, 2);
        assert!(store.get("m1").is_some_and(|m| m.seen && m.seen_at == Some(at(5))));
        assert!(store.get("m2").is_some_and(|m| !m.seen && m.seen_at.is_none()));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn mark_seen_is_monotonic_across_overlapping_calls() {
        let mut store = MessageStore::new();
        store.replace(vec![message("m1", "a"), message("m2", "b")]);

        store.mark_seen(&["m1".into()], at(1));
        let changed = store.mark_seen(&["m1".into(), "m2".into()], at(2));

        assert_eq!(changed, 1);
        let m1 = store.get("m1").expect("m1 present");
        assert!(m1.seen);
        assert_eq!(m1.seen_at, Some(at(1)));
        assert!(store.get("m2").is_some_and(|m| m.seen));
    }

    #[test]
    fn replace_keeps_previously_seen_flags() {
        let mut store = MessageStore::new();
        store.replace(vec![message("m1", "a")]);
        store.mark_seen(&["m1".into()], at(3));

        store.replace(vec![message("m1", "a"), message("m2", "b")]);

        let m1 = store.get("m1").expect("m1 present");
        assert!(m1.seen);
        assert_eq!(m1.seen_at, Some(at(3)));
    }

    #[test]
    fn clear_empties_timeline_and_forgets_ids() {
        let mut store = MessageStore::new();
        store.append_if_absent(message("m1", "a"));
        store.clear();

        assert!(store.is_empty());
        assert!(store.append_if_absent(message("m1", "a")));
    }
}
