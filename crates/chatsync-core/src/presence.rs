use std::collections::HashSet;

use tokio::sync::watch;

/// Read-only view of the online-user set maintained by the connection manager.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    online: watch::Receiver<HashSet<String>>,
}

impl PresenceTracker {
    /// Tracker following `online`.
    pub fn new(online: watch::Receiver<HashSet<String>>) -> Self {
        Self { online }
    }

    /// Tracker with nobody online and no upstream.
    pub fn detached() -> Self {
        let (_tx, online) = watch::channel(HashSet::new());
        Self { online }
    }

    /// Whether `user_id` is currently online.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.online.borrow().contains(user_id)
    }

    /// Copy of the current online set.
    pub fn online_users(&self) -> HashSet<String> {
        self.online.borrow().clone()
    }

    /// Wait for the upstream set to change; `false` once the upstream is gone.
    pub async fn changed(&mut self) -> bool {
        self.online.changed().await.is_ok()
    }
}
