mod config;
mod logging;

use std::{process::ExitCode, sync::Arc, time::Duration};

use chatsync_core::{
    EventStream, LoopbackConnection, SyncCommand, SyncEvent, SyncHandle, SyncSnapshot,
    spawn_runtime,
};
use chatsync_http::HttpSyncGateway;
use chatsync_platform::{OsKeyringSecretStore, StaticCredential, TokenStore};
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{error, info, warn};

use crate::config::SyncConfig;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SyncConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::from(2);
        }
    };
    info!(?config, "starting chatsync smoke run");

    let tokens = TokenStore::new(OsKeyringSecretStore, &config.user_service);
    let credentials = Arc::new(StaticCredential::new(config.session_token(&tokens)));
    let gateway = match HttpSyncGateway::new(config.gateway_config(), credentials) {
        Ok(gateway) => Arc::new(gateway),
        Err(err) => {
            error!(error = %err, "failed to build gateway");
            return ExitCode::FAILURE;
        }
    };

    // No push transport here: frames only arrive if injected.
    let connection = Arc::new(LoopbackConnection::default());
    let (handle, mut events) = spawn_runtime(gateway, connection, config.runtime_config());
    let wait = config.load_wait();

    let Some(snapshot) = wait_for_snapshot(&mut events, wait, |s| s.conversations_loaded).await
    else {
        handle.shutdown().await;
        return ExitCode::FAILURE;
    };
    print_conversations(&snapshot);

    if let Some(chat_id) = config.open_chat.clone() {
        open_conversation(&handle, &mut events, chat_id, wait).await;
    }

    handle.shutdown().await;
    let _ = wait_for_event(&mut events, wait, |event| *event == SyncEvent::Stopped).await;
    ExitCode::SUCCESS
}

async fn open_conversation(
    handle: &SyncHandle,
    events: &mut EventStream,
    chat_id: String,
    wait: Duration,
) {
    if handle
        .send(SyncCommand::SelectConversation {
            chat_id: chat_id.clone(),
        })
        .await
        .is_err()
    {
        warn!(%chat_id, "runtime stopped before the conversation could be opened");
        return;
    }

    let loaded = wait_for_snapshot(events, wait, |s| {
        s.active_chat_id.as_deref() == Some(chat_id.as_str()) && s.participant.is_some()
    })
    .await;
    match loaded {
        Some(snapshot) => print_timeline(&snapshot),
        None => warn!(%chat_id, "conversation did not load"),
    }
}

/// Wait for a snapshot matching `predicate`; `None` on timeout, shutdown or no session.
async fn wait_for_snapshot<F>(
    events: &mut EventStream,
    wait: Duration,
    mut predicate: F,
) -> Option<SyncSnapshot>
where
    F: FnMut(&SyncSnapshot) -> bool,
{
    let event = wait_for_event(events, wait, |event| match event {
        SyncEvent::Snapshot(snapshot) => predicate(snapshot),
        SyncEvent::NoSession | SyncEvent::Stopped => true,
        _ => false,
    })
    .await?;
    match event {
        SyncEvent::Snapshot(snapshot) => Some(snapshot),
        _ => None,
    }
}

async fn wait_for_event<F>(
    events: &mut EventStream,
    wait: Duration,
    mut predicate: F,
) -> Option<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    let result = timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    log_event(&event);
                    if predicate(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        warn!(wait_ms = wait.as_millis() as u64, "timed out waiting for sync event");
        None
    })
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::NoSession => warn!("no session token; set CHATSYNC_TOKEN or store one"),
        SyncEvent::SessionReady { user } => {
            info!(user_id = %user.id, name = %user.name, "session ready");
        }
        SyncEvent::Notice(notice) => warn!(code = %notice.code, "{}", notice.message),
        SyncEvent::Stopped => info!("runtime stopped"),
        SyncEvent::Snapshot(_) | SyncEvent::Directory { .. } => {}
    }
}

fn print_conversations(snapshot: &SyncSnapshot) {
    println!("{} conversation(s):", snapshot.conversations.len());
    for row in &snapshot.conversations {
        let preview = row
            .latest_message
            .as_ref()
            .map(|latest| {
                if row.latest_is_own {
                    format!("You: {}", latest.text)
                } else {
                    latest.text.clone()
                }
            })
            .unwrap_or_default();
        println!(
            "  [{}] {} ({}) unseen={} {}",
            row.chat_id,
            row.user.name,
            if row.is_online { "online" } else { "offline" },
            row.unseen_count,
            preview
        );
    }
}

fn print_timeline(snapshot: &SyncSnapshot) {
    let participant = snapshot
        .participant
        .as_ref()
        .map(|user| user.name.as_str())
        .unwrap_or("?");
    println!(
        "conversation with {participant}: {} message(s)",
        snapshot.messages.len()
    );
    for message in &snapshot.messages {
        let body = message
            .text
            .as_deref()
            .unwrap_or(chatsync_core::IMAGE_PREVIEW_TEXT);
        let seen = if message.seen { " ✓✓" } else { "" };
        println!(
            "  {} {}: {body}{seen}",
            message.created_at.format("%H:%M"),
            message.sender
        );
    }
}
