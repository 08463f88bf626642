//! The event channel: one background task owning the WebSocket.
//!
//! External code communicates with the task through typed command and
//! notification channels, keeping the transport fully asynchronous. `send`
//! is fire-and-forget: confirmation arrives later as a distinct server
//! event. The adapter performs no retry/backoff of its own — callers poll
//! [`EventChannel::await_connected`] with bounded attempts to decide when to
//! resume event-channel use.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use banter_shared::constants::CHANNEL_BUFFER;
use banter_shared::protocol::{ClientEvent, ServerEvent};
use banter_shared::types::{ConversationKey, UserId};

use crate::error::{NetError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the channel task.
#[derive(Debug)]
pub enum ChannelCommand {
    /// Emit an event to the server.
    Send(ClientEvent),
    /// Attempt one re-dial if currently disconnected.
    Reconnect,
    /// Leave the room and shut the task down.
    Disconnect,
}

/// Notifications sent *from* the channel task to the application.
#[derive(Debug, Clone)]
pub enum ChannelNotification {
    /// The socket is up and the room has been joined.
    LinkUp,
    /// The socket dropped; sends will fail fast until reconnected.
    LinkDown,
    /// A server event arrived.
    Event(ServerEvent),
}

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Configuration for spawning the channel task.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://host:port/ws`.
    pub ws_url: String,
    /// The conversation whose room is joined on connect.
    pub room: ConversationKey,
    /// Identity presented to the server.
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Caller-side handle to the channel task. Cloneable; all clones feed the
/// same socket.
#[derive(Debug, Clone)]
pub struct EventChannel {
    cmd_tx: mpsc::Sender<ChannelCommand>,
    state_rx: watch::Receiver<LinkState>,
}

impl EventChannel {
    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Emit an event. Fails fast with [`NetError::TransportUnavailable`]
    /// while disconnected; the caller decides whether to fall back to REST.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(NetError::TransportUnavailable);
        }
        self.cmd_tx
            .send(ChannelCommand::Send(event))
            .await
            .map_err(|_| NetError::ChannelClosed)
    }

    /// Poll for connectivity, requesting one re-dial per attempt.
    /// Returns `true` as soon as the channel is connected, `false` once the
    /// bounded attempts are exhausted.
    pub async fn await_connected(&self, attempts: u32, interval: Duration) -> bool {
        for _ in 0..attempts {
            if self.is_connected() {
                return true;
            }
            if self
                .cmd_tx
                .send(ChannelCommand::Reconnect)
                .await
                .is_err()
            {
                return false;
            }
            tokio::time::sleep(interval).await;
        }
        self.is_connected()
    }

    /// Leave the room and terminate the channel task. In-flight operations
    /// are abandoned, not awaited.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(ChannelCommand::Disconnect).await;
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Spawn the event-channel task.
///
/// The task dials immediately; connection state is observable through the
/// returned handle, so callers need not (and cannot) await the first dial.
///
/// # Returns
///
/// `(handle, notification_rx)`
pub fn spawn_channel(
    config: ChannelConfig,
) -> (EventChannel, mpsc::Receiver<ChannelNotification>) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<ChannelCommand>(CHANNEL_BUFFER);
    let (notif_tx, notif_rx) = mpsc::channel::<ChannelNotification>(CHANNEL_BUFFER);
    let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);

    tokio::spawn(run_channel(config, cmd_rx, notif_tx, state_tx));

    (EventChannel { cmd_tx, state_rx }, notif_rx)
}

async fn run_channel(
    config: ChannelConfig,
    mut cmd_rx: mpsc::Receiver<ChannelCommand>,
    notif_tx: mpsc::Sender<ChannelNotification>,
    state_tx: watch::Sender<LinkState>,
) {
    let mut socket = dial(&config, &state_tx, &notif_tx).await;

    loop {
        match socket.as_mut() {
            Some(ws) => {
                let mut lost = false;

                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(ChannelCommand::Send(event)) => {
                            if let Err(e) = write_event(ws, &event).await {
                                warn!(error = %e, "Send failed, marking channel down");
                                lost = true;
                            }
                        }
                        Some(ChannelCommand::Reconnect) => {
                            debug!("Reconnect requested while connected, ignoring");
                        }
                        Some(ChannelCommand::Disconnect) => {
                            let leave = ClientEvent::LeaveRoom {
                                room: config.room.clone(),
                                user_id: config.user_id.clone(),
                            };
                            let _ = write_event(ws, &leave).await;
                            let _ = ws.close(None).await;
                            break;
                        }
                        None => {
                            info!("Command channel closed, shutting down event channel");
                            let _ = ws.close(None).await;
                            break;
                        }
                    },

                    frame = ws.next() => match frame {
                        Some(Ok(WsMessage::Text(txt))) => {
                            match ServerEvent::from_bytes(txt.as_bytes()) {
                                Ok(event) => {
                                    debug!(len = txt.len(), "Server event received");
                                    let _ = notif_tx
                                        .send(ChannelNotification::Event(event))
                                        .await;
                                }
                                Err(e) => {
                                    // Malformed events are dropped, never fatal.
                                    warn!(error = %e, "Ignoring malformed server event");
                                }
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            info!("Server closed the event channel");
                            lost = true;
                        }
                        Some(Ok(_)) => {
                            // Binary/ping/pong frames carry nothing for us.
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Event channel read error");
                            lost = true;
                        }
                    },
                }

                if lost {
                    socket = None;
                    mark_down(&state_tx, &notif_tx).await;
                }
            }

            None => match cmd_rx.recv().await {
                Some(ChannelCommand::Reconnect) => {
                    socket = dial(&config, &state_tx, &notif_tx).await;
                }
                Some(ChannelCommand::Send(_)) => {
                    // Callers fail fast before this point; a late command can
                    // still race the state flip.
                    warn!("Dropping send while disconnected");
                }
                Some(ChannelCommand::Disconnect) | None => break,
            },
        }
    }

    let _ = state_tx.send(LinkState::Disconnected);
    info!("Event channel task terminated");
}

/// One dial attempt: connect, join the room, publish the state flip.
async fn dial(
    config: &ChannelConfig,
    state_tx: &watch::Sender<LinkState>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
) -> Option<WsStream> {
    let _ = state_tx.send(LinkState::Connecting);

    match connect_async(config.ws_url.as_str()).await {
        Ok((mut ws, _)) => {
            let join = ClientEvent::JoinRoom {
                room: config.room.clone(),
                user_id: config.user_id.clone(),
            };
            if let Err(e) = write_event(&mut ws, &join).await {
                warn!(error = %e, "Failed to join room after connect");
                let _ = state_tx.send(LinkState::Disconnected);
                return None;
            }

            info!(url = %config.ws_url, room = %config.room, "Event channel connected");
            let _ = state_tx.send(LinkState::Connected);
            let _ = notif_tx.send(ChannelNotification::LinkUp).await;
            Some(ws)
        }
        Err(e) => {
            warn!(url = %config.ws_url, error = %e, "Event channel dial failed");
            let _ = state_tx.send(LinkState::Disconnected);
            None
        }
    }
}

async fn mark_down(
    state_tx: &watch::Sender<LinkState>,
    notif_tx: &mpsc::Sender<ChannelNotification>,
) {
    let _ = state_tx.send(LinkState::Disconnected);
    let _ = notif_tx.send(ChannelNotification::LinkDown).await;
}

async fn write_event(ws: &mut WsStream, event: &ClientEvent) -> Result<()> {
    let txt = serde_json::to_string(event).map_err(banter_shared::ProtocolError::from)?;
    ws.send(WsMessage::text(txt)).await?;
    Ok(())
}
