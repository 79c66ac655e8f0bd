//! Single-task driver for [`ReconciliationEngine`].
//!
//! One spawned task owns the engine and multiplexes user commands, pushed
//! frames, completed fetches, the typing idle timer and presence changes.
//! Every input is applied to completion before the next one is polled.

use std::{future::pending, pin::Pin, sync::Arc};

use futures::{
    FutureExt, StreamExt,
    future::BoxFuture,
    stream::FuturesUnordered,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    time::{Sleep, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    channel::{ConnectionManager, EventStream, SyncChannelError, SyncChannels},
    engine::{Effect, FetchOutcome, FetchRequest, ReconciliationEngine},
    gateway::SyncGateway,
    normalization::decode_push_frame,
    presence::PresenceTracker,
    types::{InboundFrame, Notice, RuntimeConfig, SyncCommand, SyncEvent, SyncSnapshot},
    typing::TimerToken,
};

/// Handle to a running sync task.
#[derive(Clone, Debug)]
pub struct SyncHandle {
    channels: SyncChannels,
    stop: CancellationToken,
}

impl SyncHandle {
    pub async fn send(&self, command: SyncCommand) -> Result<(), SyncChannelError> {
        self.channels.send_command(command).await
    }

    pub fn subscribe(&self) -> EventStream {
        self.channels.subscribe()
    }

    /// Ask the runtime to leave the active room and exit.
    ///
    /// Falls back to cancellation when the command queue is already closed.
    pub async fn shutdown(&self) {
        if self.send(SyncCommand::Shutdown).await.is_err() {
            self.stop.cancel();
        }
    }

    /// Stop without waiting for queued commands; teardown signals are still sent.
    pub fn cancel(&self) {
        self.stop.cancel();
    }
}

/// Spawn the runtime task.
///
/// The returned stream is subscribed before the task starts, so it observes
/// the very first event (`NoSession` or `SessionReady`).
pub fn spawn_runtime<G, C>(
    gateway: Arc<G>,
    connection: Arc<C>,
    config: RuntimeConfig,
) -> (SyncHandle, EventStream)
where
    G: SyncGateway,
    C: ConnectionManager,
{
    let (channels, command_rx) = SyncChannels::new(config.command_buffer, config.event_buffer);
    let events = channels.subscribe();
    let stop = CancellationToken::new();
    let runtime = SyncRuntime {
        gateway,
        connection,
        events: channels.event_sender(),
        command_rx,
        stop: stop.child_token(),
        config,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    (SyncHandle { channels, stop }, events)
}

type PendingFetches = FuturesUnordered<BoxFuture<'static, FetchOutcome>>;

struct TypingTimer {
    token: TimerToken,
    deadline: Pin<Box<Sleep>>,
}

enum LoopInput {
    Stop,
    Command(SyncCommand),
    Frame(InboundFrame),
    Lagged(u64),
    FramesClosed,
    Fetched(FetchOutcome),
    TypingElapsed(TimerToken),
    PresenceChanged,
    PresenceClosed,
}

struct SyncRuntime<G, C> {
    gateway: Arc<G>,
    connection: Arc<C>,
    events: broadcast::Sender<SyncEvent>,
    command_rx: mpsc::Receiver<SyncCommand>,
    stop: CancellationToken,
    config: RuntimeConfig,
}

impl<G, C> SyncRuntime<G, C>
where
    G: SyncGateway,
    C: ConnectionManager,
{
    async fn run(mut self) {
        if !self.gateway.has_credential() {
            info!("no session credential; nothing to synchronize");
            self.emit(SyncEvent::NoSession);
            self.emit(SyncEvent::Stopped);
            return;
        }

        let profile = tokio::select! {
            _ = self.stop.cancelled() => {
                self.emit(SyncEvent::Stopped);
                return;
            }
            profile = self.gateway.fetch_profile() => profile,
        };
        let local_user = match profile {
            Ok(user) => user,
            Err(err) => {
                warn!(error = %err, "failed to load session profile");
                self.emit(SyncEvent::Notice(Notice::from(&err)));
                self.emit(SyncEvent::Stopped);
                return;
            }
        };

        info!(user_id = %local_user.id, "session ready");
        self.emit(SyncEvent::SessionReady {
            user: local_user.clone(),
        });

        let mut engine = ReconciliationEngine::new(local_user);
        let mut frames = self.connection.subscribe();
        let mut frames_open = true;
        let mut presence = self.connection.presence();
        let mut presence_open = true;
        let mut fetches = PendingFetches::new();
        let mut typing_timer: Option<TypingTimer> = None;
        let mut published: Option<SyncSnapshot> = None;

        self.apply(engine.initial_load(), &mut fetches, &mut typing_timer);
        self.publish(&engine, &presence, &mut published);

        loop {
            let input = tokio::select! {
                _ = self.stop.cancelled() => LoopInput::Stop,
                command = self.command_rx.recv() => {
                    command.map_or(LoopInput::Stop, LoopInput::Command)
                }
                frame = frames.recv(), if frames_open => match frame {
                    Ok(frame) => LoopInput::Frame(frame),
                    Err(RecvError::Lagged(skipped)) => LoopInput::Lagged(skipped),
                    Err(RecvError::Closed) => LoopInput::FramesClosed,
                },
                Some(outcome) = fetches.next(), if !fetches.is_empty() => {
                    LoopInput::Fetched(outcome)
                }
                token = typing_deadline(&mut typing_timer) => LoopInput::TypingElapsed(token),
                open = presence.changed(), if presence_open => {
                    if open {
                        LoopInput::PresenceChanged
                    } else {
                        LoopInput::PresenceClosed
                    }
                }
            };

            let effects = match input {
                LoopInput::Stop | LoopInput::Command(SyncCommand::Shutdown) => break,
                LoopInput::Command(SyncCommand::SearchUsers { query }) => {
                    let entries = engine.user_directory(&query, &presence);
                    self.emit(SyncEvent::Directory { query, entries });
                    Vec::new()
                }
                LoopInput::Command(command) => match engine.handle_command(command) {
                    Ok(effects) => effects,
                    Err(err) => {
                        debug!(error = %err, "command rejected");
                        vec![Effect::Notify(Notice::from(&err))]
                    }
                },
                LoopInput::Frame(frame) => {
                    trace!(name = %frame.name, "push frame received");
                    engine.handle_push(decode_push_frame(frame))
                }
                LoopInput::Lagged(skipped) => {
                    warn!(skipped, "push frames dropped; resynchronizing");
                    engine.resync()
                }
                LoopInput::FramesClosed => {
                    warn!("push channel closed");
                    frames_open = false;
                    Vec::new()
                }
                LoopInput::Fetched(outcome) => engine.handle_outcome(outcome),
                LoopInput::TypingElapsed(token) => {
                    typing_timer = None;
                    engine.on_typing_timer(token)
                }
                LoopInput::PresenceChanged => Vec::new(),
                LoopInput::PresenceClosed => {
                    debug!("presence source closed");
                    presence_open = false;
                    Vec::new()
                }
            };

            self.apply(effects, &mut fetches, &mut typing_timer);
            self.publish(&engine, &presence, &mut published);
        }

        let teardown = engine
            .handle_command(SyncCommand::Shutdown)
            .unwrap_or_default();
        self.apply(teardown, &mut fetches, &mut typing_timer);
        self.publish(&engine, &presence, &mut published);
        if !fetches.is_empty() {
            debug!(in_flight = fetches.len(), "dropping in-flight fetches");
        }
        info!("sync runtime stopped");
        self.emit(SyncEvent::Stopped);
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }

    fn apply(
        &self,
        effects: Vec<Effect>,
        fetches: &mut PendingFetches,
        typing_timer: &mut Option<TypingTimer>,
    ) {
        for effect in effects {
            match effect {
                Effect::Emit(signal) => {
                    trace!(signal = signal.name(), chat_id = signal.chat_id(), "emitting signal");
                    self.connection.emit(&signal);
                }
                Effect::Fetch(request) => {
                    fetches.push(execute(Arc::clone(&self.gateway), request).boxed());
                }
                Effect::ArmTypingTimer(token) => {
                    *typing_timer = Some(TypingTimer {
                        token,
                        deadline: Box::pin(sleep(self.config.typing_idle)),
                    });
                }
                Effect::CancelTypingTimer => *typing_timer = None,
                Effect::Notify(notice) => self.emit(SyncEvent::Notice(notice)),
            }
        }
    }

    fn publish(
        &self,
        engine: &ReconciliationEngine,
        presence: &PresenceTracker,
        published: &mut Option<SyncSnapshot>,
    ) {
        let snapshot = engine.snapshot(presence);
        if published.as_ref() == Some(&snapshot) {
            return;
        }
        *published = Some(snapshot.clone());
        self.emit(SyncEvent::Snapshot(snapshot));
    }
}

async fn typing_deadline(timer: &mut Option<TypingTimer>) -> TimerToken {
    match timer {
        Some(timer) => {
            timer.deadline.as_mut().await;
            timer.token
        }
        None => pending().await,
    }
}

async fn execute<G: SyncGateway>(gateway: Arc<G>, request: FetchRequest) -> FetchOutcome {
    match request {
        FetchRequest::Conversations => {
            FetchOutcome::Conversations(gateway.fetch_conversations().await)
        }
        FetchRequest::Users => FetchOutcome::Users(gateway.fetch_users().await),
        FetchRequest::Timeline { tag, chat_id } => {
            let result = gateway.fetch_timeline(&chat_id).await;
            FetchOutcome::Timeline {
                tag,
                chat_id,
                result,
            }
        }
        FetchRequest::CreateConversation {
            local_user_id,
            other_user_id,
        } => {
            let result = gateway
                .create_conversation(&local_user_id, &other_user_id)
                .await;
            FetchOutcome::ConversationCreated {
                other_user_id,
                result,
            }
        }
        FetchRequest::SendMessage {
            client_txn_id,
            chat_id,
            message,
        } => {
            let result = gateway.send_message(&chat_id, &message).await;
            FetchOutcome::MessageSent {
                client_txn_id,
                chat_id,
                result,
            }
        }
    }
}
