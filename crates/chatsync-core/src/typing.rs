use tracing::trace;

use crate::types::OutboundSignal;

/// Local typing emission state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTypingState {
    /// No typing signal outstanding.
    Idle,
    /// `typing` was emitted and the idle timer is armed.
    Typing,
}

/// Identifies one arming of the idle timer; expiries carrying an older token are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

/// Side effects requested by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingAction {
    /// Send a signal to the event channel.
    Emit(OutboundSignal),
    /// (Re)arm the single idle timer, replacing any armed one.
    ArmTimer(TimerToken),
    /// Drop the armed timer without firing it.
    CancelTimer,
}

/// Debounced local typing emission plus remote typing observation, scoped to
/// the active conversation.
#[derive(Debug, Clone)]
pub struct TypingCoordinator {
    local_user_id: String,
    chat_id: Option<String>,
    local: LocalTypingState,
    armed: Option<TimerToken>,
    next_token: u64,
    remote_typing: bool,
}

impl TypingCoordinator {
    /// Idle coordinator for `local_user_id` with no active conversation.
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            chat_id: None,
            local: LocalTypingState::Idle,
            armed: None,
            next_token: 0,
            remote_typing: false,
        }
    }

    /// Current local typing state.
    pub fn local_state(&self) -> LocalTypingState {
        self.local
    }

    /// Whether the other participant of the active conversation is typing.
    pub fn remote_typing(&self) -> bool {
        self.remote_typing
    }

    /// Token of the pending idle timer, if one is armed.
    pub fn armed_timer(&self) -> Option<TimerToken> {
        self.armed
    }

    /// Switch to a new active conversation, finishing any typing in the old one.
    pub fn activate(&mut self, chat_id: impl Into<String>) -> Vec<TypingAction> {
        let actions = self.stop_local();
        self.chat_id = Some(chat_id.into());
        self.remote_typing = false;
        actions
    }

    /// Leave the active conversation; the pending timer never fires afterwards.
    pub fn deactivate(&mut self) -> Vec<TypingAction> {
        let actions = self.stop_local();
        self.chat_id = None;
        self.remote_typing = false;
        actions
    }

    /// Compose-box content changed.
    pub fn on_input(&mut self, text: &str) -> Vec<TypingAction> {
        let Some(chat_id) = self.chat_id.clone() else {
            return Vec::new();
        };

        if text.trim().is_empty() {
            return self.stop_local();
        }

        let token = self.arm();
        match self.local {
            LocalTypingState::Idle => {
                self.local = LocalTypingState::Typing;
                trace!(%chat_id, "local typing started");
                vec![
                    TypingAction::Emit(OutboundSignal::Typing {
                        chat_id,
                        user_id: self.local_user_id.clone(),
                    }),
                    TypingAction::ArmTimer(token),
                ]
            }
            LocalTypingState::Typing => vec![TypingAction::ArmTimer(token)],
        }
    }

    /// A message is being sent; stop typing without waiting for the timer.
    pub fn on_send(&mut self) -> Vec<TypingAction> {
        self.stop_local()
    }

    /// Idle timer fired.
    pub fn on_timer_elapsed(&mut self, token: TimerToken) -> Vec<TypingAction> {
        if self.armed != Some(token) {
            trace!(?token, "ignoring stale typing timer");
            return Vec::new();
        }
        self.armed = None;
        self.emit_stop()
    }

    /// Apply a remote typing/stop-typing signal; returns whether the flag changed.
    pub fn on_remote_signal(&mut self, chat_id: &str, user_id: &str, typing: bool) -> bool {
        if self.chat_id.as_deref() != Some(chat_id) || user_id == self.local_user_id {
            return false;
        }
        let changed = self.remote_typing != typing;
        self.remote_typing = typing;
        changed
    }

    fn arm(&mut self) -> TimerToken {
        self.next_token = self.next_token.wrapping_add(1);
        let token = TimerToken(self.next_token);
        self.armed = Some(token);
        token
    }

    fn stop_local(&mut self) -> Vec<TypingAction> {
        let mut actions = Vec::new();
        if self.armed.take().is_some() {
            actions.push(TypingAction::CancelTimer);
        }
        actions.extend(self.emit_stop());
        actions
    }

    fn emit_stop(&mut self) -> Vec<TypingAction> {
        if self.local != LocalTypingState::Typing {
            return Vec::new();
        }
        self.local = LocalTypingState::Idle;
        match &self.chat_id {
            Some(chat_id) => {
                trace!(%chat_id, "local typing stopped");
                vec![TypingAction::Emit(OutboundSignal::StopTyping {
                    chat_id: chat_id.clone(),
                    user_id: self.local_user_id.clone(),
                })]
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typing() -> OutboundSignal {
        OutboundSignal::Typing {
            chat_id: "c1".into(),
            user_id: "u1".into(),
        }
    }

    fn stop() -> OutboundSignal {
        OutboundSignal::StopTyping {
            chat_id: "c1".into(),
            user_id: "u1".into(),
        }
    }

    fn emitted(actions: &[TypingAction]) -> Vec<OutboundSignal> {
        actions
            .iter()
            .filter_map(|action| match action {
                TypingAction::Emit(signal) => Some(signal.clone()),
                _ => None,
            })
            .collect()
    }

    fn armed_token(actions: &[TypingAction]) -> TimerToken {
        actions
            .iter()
            .find_map(|action| match action {
                TypingAction::ArmTimer(token) => Some(*token),
                _ => None,
            })
            .expect("timer should be armed")
    }

    fn active() -> TypingCoordinator {
        let mut coordinator = TypingCoordinator::new("u1");
        coordinator.activate("c1");
        coordinator
    }

    #[test]
    fn first_keystroke_emits_typing_and_arms_timer() {
        let mut coordinator = active();
        let actions = coordinator.on_input("h");

        assert_eq!(emitted(&actions), [typing()]);
        assert_eq!(coordinator.local_state(), LocalTypingState::Typing);
        assert_eq!(coordinator.armed_timer(), Some(armed_token(&actions)));
    }

    #[test]
    fn later_keystrokes_only_rearm() {
        let mut coordinator = active();
        coordinator.on_input("h");
        let actions = coordinator.on_input("he");

        assert!(emitted(&actions).is_empty());
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], TypingAction::ArmTimer(_)));
    }

    #[test]
    fn expiry_emits_stop_once_and_ignores_stale_tokens() {
        let mut coordinator = active();
        let first = armed_token(&coordinator.on_input("h"));
        let second = armed_token(&coordinator.on_input("hi"));

        assert!(coordinator.on_timer_elapsed(first).is_empty());
        assert_eq!(emitted(&coordinator.on_timer_elapsed(second)), [stop()]);
        assert!(coordinator.on_timer_elapsed(second).is_empty());
        assert_eq!(coordinator.local_state(), LocalTypingState::Idle);
    }

    #[test]
    fn send_cancels_timer_and_stops_immediately() {
        let mut coordinator = active();
        let token = armed_token(&coordinator.on_input("hello"));

        let actions = coordinator.on_send();

        assert_eq!(
            actions,
            [TypingAction::CancelTimer, TypingAction::Emit(stop())]
        );
        assert!(coordinator.on_timer_elapsed(token).is_empty());
    }

    #[test]
    fn send_while_idle_emits_nothing() {
        let mut coordinator = active();
        assert!(coordinator.on_send().is_empty());
    }

    #[test]
    fn clearing_input_stops_typing() {
        let mut coordinator = active();
        coordinator.on_input("x");
        let actions = coordinator.on_input("   ");
        assert_eq!(emitted(&actions), [stop()]);
        assert!(coordinator.on_input("").is_empty());
    }

    #[test]
    fn input_without_active_conversation_is_ignored() {
        let mut coordinator = TypingCoordinator::new("u1");
        assert!(coordinator.on_input("hello").is_empty());
    }

    #[test]
    fn deactivate_cancels_pending_timer_and_remote_flag() {
        let mut coordinator = active();
        let token = armed_token(&coordinator.on_input("x"));
        coordinator.on_remote_signal("c1", "u2", true);

        let actions = coordinator.deactivate();

        assert_eq!(
            actions,
            [TypingAction::CancelTimer, TypingAction::Emit(stop())]
        );
        assert!(!coordinator.remote_typing());
        assert!(coordinator.on_timer_elapsed(token).is_empty());
    }

    #[test]
    fn switching_conversation_stops_typing_in_previous_one() {
        let mut coordinator = active();
        coordinator.on_input("x");

        let actions = coordinator.activate("c2");
        assert_eq!(emitted(&actions), [stop()]);

        let actions = coordinator.on_input("y");
        assert_eq!(
            emitted(&actions),
            [OutboundSignal::Typing {
                chat_id: "c2".into(),
                user_id: "u1".into(),
            }]
        );
    }

    #[test]
    fn remote_signals_apply_only_to_active_conversation_and_other_user() {
        let mut coordinator = active();

        assert!(!coordinator.on_remote_signal("c2", "u2", true));
        assert!(!coordinator.on_remote_signal("c1", "u1", true));
        assert!(!coordinator.remote_typing());

        assert!(coordinator.on_remote_signal("c1", "u2", true));
        assert!(coordinator.remote_typing());
        assert!(coordinator.on_remote_signal("c1", "u2", false));
        assert!(!coordinator.remote_typing());
    }
}
