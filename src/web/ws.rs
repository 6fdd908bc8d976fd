//! Viewer WebSocket: audio push plus the control channel
//!
//! Binary messages carry one little-endian S16 PCM chunk each. Text
//! messages are JSON control messages in both directions, see
//! [`crate::control::session`].
//!
//! Writes go through a per-socket writer task. Control replies wait for
//! room in their queue; audio chunks are dropped when the viewer cannot
//! keep up, so a slow socket never delays input handling.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handlers::validate_profile;
use crate::control::{ControlSession, ServerMessage};
use crate::state::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Control replies, pings and pongs queued ahead of the writer
const CONTROL_QUEUE: usize = 32;
/// Audio chunks queued ahead of the writer; older audio is worthless
const AUDIO_QUEUE: usize = 2;
/// How long the writer may take to flush after the session ends
const WRITER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_player")]
    pub player: u8,
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_player() -> u8 {
    1
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn to_text(message: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!("Failed to serialize control reply: {}", e);
            None
        }
    }
}

/// Outcome of offering an audio chunk to the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Push {
    Queued,
    Dropped,
    Closed,
}

/// Handle to the writer task of one socket
struct Outbound {
    control: mpsc::Sender<Message>,
    audio: mpsc::Sender<Message>,
}

impl Outbound {
    /// Spawn the writer; it ends once the handle is dropped and the
    /// queues are drained, or when the sink fails
    fn spawn<S>(sink: S) -> (Self, JoinHandle<()>)
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (control, mut control_rx) = mpsc::channel::<Message>(CONTROL_QUEUE);
        let (audio, mut audio_rx) = mpsc::channel::<Message>(AUDIO_QUEUE);

        let writer = tokio::spawn(async move {
            let mut sink = sink;
            let mut control_open = true;
            let mut audio_open = true;
            loop {
                let message = tokio::select! {
                    biased;
                    message = control_rx.recv(), if control_open => match message {
                        Some(message) => message,
                        None => {
                            control_open = false;
                            continue;
                        }
                    },
                    message = audio_rx.recv(), if audio_open => match message {
                        Some(message) => message,
                        None => {
                            audio_open = false;
                            continue;
                        }
                    },
                    else => break,
                };
                if let Err(e) = sink.send(message).await {
                    debug!("Viewer socket write failed: {}", e);
                    return;
                }
            }
            let _ = sink.close().await;
        });

        (Self { control, audio }, writer)
    }

    /// Queue a control message, waiting for room; false once the writer is gone
    async fn reply(&self, message: Message) -> bool {
        self.control.send(message).await.is_ok()
    }

    /// Queue a keepalive frame without waiting; a full queue skips it
    fn try_control(&self, message: Message) -> bool {
        match self.control.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("Control queue full, skipping keepalive");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn push_audio(&self, message: Message) -> Push {
        match self.audio.try_send(message) {
            Ok(()) => Push::Queued,
            Err(TrySendError::Full(_)) => Push::Dropped,
            Err(TrySendError::Closed(_)) => Push::Closed,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, query: WsQuery) {
    let (mut sender, mut receiver) = socket.split();

    let opened = match validate_profile(&query.profile) {
        Ok(()) => {
            ControlSession::open(
                query.profile.clone(),
                query.player,
                state.relay.clone(),
                state.config.clone(),
                state.remaps.clone(),
            )
            .await
        }
        Err(e) => Err(e),
    };
    let mut session = match opened {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejecting viewer socket: {}", e);
            let reply = ServerMessage::Error {
                message: e.to_string(),
            };
            if let Some(message) = to_text(&reply) {
                let _ = sender.send(message).await;
            }
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("Viewer socket connected (profile '{}')", session.profile());

    let (outbound, mut writer) = Outbound::spawn(sender);

    let mut audio_rx = state.gateway.subscribe_audio();
    let mut audio_open = true;
    let mut audio_dropped: u64 = 0;
    let mut changes = state.config.subscribe();
    let mut changes_open = true;
    let mut shutdown = state.gateway.shutdown_signal();
    let mut closed = false;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut connected = match to_text(&session.mapping_message()) {
        Some(message) => outbound.reply(message).await,
        None => true,
    };

    while connected {
        tokio::select! {
            chunk = audio_rx.recv(), if audio_open => {
                match chunk {
                    Ok(chunk) => {
                        if !session.audio_enabled() {
                            continue;
                        }
                        match outbound.push_audio(Message::Binary(chunk.data.to_vec())) {
                            Push::Queued => {}
                            Push::Dropped => audio_dropped += 1,
                            Push::Closed => {
                                debug!("Viewer writer closed, dropping audio");
                                break;
                            }
                        }
                    }
                    // Only the newest chunk matters to a slow viewer
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Viewer lagged, skipped {} audio chunks", skipped);
                    }
                    Err(RecvError::Closed) => {
                        audio_open = false;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for reply in session.handle_text(&text).await {
                            let Some(message) = to_text(&reply) else { continue };
                            if !outbound.reply(message).await {
                                connected = false;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        connected = outbound.try_control(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Viewer requested close");
                        closed = true;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Viewer socket receive error: {}", e);
                        break;
                    }
                    None => break,
                }
            }

            change = changes.recv(), if changes_open => {
                let updated = match change {
                    Ok(change) => session.apply_change(&change).await,
                    Err(RecvError::Lagged(_)) => session.reload_mapping().await,
                    Err(RecvError::Closed) => {
                        changes_open = false;
                        continue;
                    }
                };
                match updated {
                    Ok(replies) => {
                        for reply in replies {
                            let Some(message) = to_text(&reply) else { continue };
                            if !outbound.reply(message).await {
                                connected = false;
                                break;
                            }
                        }
                    }
                    Err(e) => warn!(
                        "Failed to reload mapping for profile '{}': {}",
                        session.profile(),
                        e
                    ),
                }
            }

            _ = shutdown.recv() => {
                break;
            }

            _ = ping_interval.tick() => {
                if !outbound.try_control(Message::Ping(Vec::new())) {
                    warn!("Viewer writer closed, disconnecting");
                    break;
                }
            }
        }
    }

    if !closed {
        let _ = outbound.control.try_send(Message::Close(None));
    }
    drop(outbound);
    if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        debug!("Viewer writer did not drain in time");
        writer.abort();
    }

    if audio_dropped > 0 {
        debug!("Dropped {} audio chunks for a slow viewer", audio_dropped);
    }
    let profile = session.profile().to_string();
    session.close().await;
    info!("Viewer socket disconnected (profile '{}')", profile);
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as sink_channel;

    fn text(body: &str) -> Message {
        Message::Text(body.to_string())
    }

    #[tokio::test]
    async fn test_stalled_viewer_does_not_block_replies() {
        // Nobody reads this end, so the writer stalls after one message
        let (sink, _stalled) = sink_channel::channel::<Message>(0);
        let (outbound, writer) = Outbound::spawn(sink);

        let mut dropped = 0;
        let pushes = async {
            for i in 0..50u8 {
                if outbound.push_audio(Message::Binary(vec![i; 16])) == Push::Dropped {
                    dropped += 1;
                }
                tokio::task::yield_now().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), pushes)
            .await
            .unwrap();
        assert!(dropped > 0);

        let replied = tokio::time::timeout(Duration::from_secs(1), outbound.reply(text("{}")))
            .await
            .unwrap();
        assert!(replied);

        writer.abort();
    }

    #[tokio::test]
    async fn test_control_written_before_queued_audio() {
        let (sink, mut written) = sink_channel::channel::<Message>(16);
        let (outbound, writer) = Outbound::spawn(sink);

        // The writer has not run yet: two chunks fit, the rest are dropped
        let pushed: Vec<Push> = (0..5u8)
            .map(|i| outbound.push_audio(Message::Binary(vec![i])))
            .collect();
        assert_eq!(&pushed[..2], &[Push::Queued, Push::Queued]);
        assert!(pushed[2..].iter().all(|p| *p == Push::Dropped));

        assert!(outbound.reply(text(r#"{"type":"audio","enabled":true}"#)).await);
        drop(outbound);
        writer.await.unwrap();

        let mut order = Vec::new();
        while let Some(message) = written.next().await {
            order.push(message);
        }
        assert_eq!(
            order,
            vec![
                text(r#"{"type":"audio","enabled":true}"#),
                Message::Binary(vec![0]),
                Message::Binary(vec![1]),
            ]
        );
    }

    #[tokio::test]
    async fn test_push_after_writer_failure_reports_closed() {
        let (sink, written) = sink_channel::channel::<Message>(1);
        drop(written);
        let (outbound, writer) = Outbound::spawn(sink);

        assert!(outbound.reply(text("{}")).await);
        writer.await.unwrap();

        assert_eq!(outbound.push_audio(Message::Binary(vec![0])), Push::Closed);
        assert!(!outbound.reply(text("{}")).await);
        assert!(!outbound.try_control(Message::Ping(Vec::new())));
    }
}
