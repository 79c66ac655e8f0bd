use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    presence::PresenceTracker,
    types::{InboundFrame, OutboundSignal, SyncCommand, SyncEvent},
};

/// Broadcast event stream type used by subscribers.
pub type EventStream = broadcast::Receiver<SyncEvent>;

/// Errors returned by sync channel operations.
#[derive(Debug, Error)]
pub enum SyncChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Command/event channel pair between the runtime and its consumers.
#[derive(Clone, Debug)]
pub struct SyncChannels {
    command_tx: mpsc::Sender<SyncCommand>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl SyncChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(command_buffer: usize, event_buffer: usize) -> (Self, mpsc::Receiver<SyncCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));

        (
            Self {
                command_tx,
                event_tx,
            },
            command_rx,
        )
    }

    /// Subscribe to emitted sync events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Send one command to the runtime.
    pub async fn send_command(&self, command: SyncCommand) -> Result<(), SyncChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncChannelError::CommandChannelClosed)
    }

    /// Event sender alone, for producers that must not keep the command queue open.
    pub fn event_sender(&self) -> broadcast::Sender<SyncEvent> {
        self.event_tx.clone()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Push-channel primitives supplied by the connection manager.
///
/// Transport, reconnection and room membership on the server side are the
/// manager's concern; the engine only emits signals and consumes frames.
pub trait ConnectionManager: Send + Sync + 'static {
    /// Send one signal to the server.
    fn emit(&self, signal: &OutboundSignal);

    /// Subscribe to pushed frames.
    fn subscribe(&self) -> broadcast::Receiver<InboundFrame>;

    /// Online-user set maintained by the manager.
    fn presence(&self) -> PresenceTracker;
}

/// In-process connection manager: frames are injected by hand and emitted
/// signals are recorded.
#[derive(Clone, Debug)]
pub struct LoopbackConnection {
    inbound_tx: broadcast::Sender<InboundFrame>,
    outbound_tx: broadcast::Sender<OutboundSignal>,
    emitted: Arc<Mutex<Vec<OutboundSignal>>>,
    online_tx: Arc<watch::Sender<HashSet<String>>>,
}

impl LoopbackConnection {
    /// Connection whose frame and outbound channels hold `buffer` items.
    pub fn new(buffer: usize) -> Self {
        let (inbound_tx, _) = broadcast::channel(buffer.max(1));
        let (outbound_tx, _) = broadcast::channel(buffer.max(1));
        let (online_tx, _) = watch::channel(HashSet::new());
        Self {
            inbound_tx,
            outbound_tx,
            emitted: Arc::new(Mutex::new(Vec::new())),
            online_tx: Arc::new(online_tx),
        }
    }

    /// Deliver one frame to every subscriber; returns how many received it.
    pub fn push(&self, frame: InboundFrame) -> usize {
        self.inbound_tx.send(frame).unwrap_or(0)
    }

    /// Replace the online-user set.
    pub fn set_online<I, S>(&self, user_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.online_tx
            .send_replace(user_ids.into_iter().map(Into::into).collect());
    }

    /// Every signal emitted so far, in order.
    pub fn emitted(&self) -> Vec<OutboundSignal> {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Observe signals as they are emitted.
    pub fn subscribe_outbound(&self) -> broadcast::Receiver<OutboundSignal> {
        self.outbound_tx.subscribe()
    }
}

impl Default for LoopbackConnection {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ConnectionManager for LoopbackConnection {
    fn emit(&self, signal: &OutboundSignal) {
        self.emitted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(signal.clone());
        let _ = self.outbound_tx.send(signal.clone());
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        self.inbound_tx.subscribe()
    }

    fn presence(&self) -> PresenceTracker {
        PresenceTracker::new(self.online_tx.subscribe())
    }
}
