//! One conversation's orchestration loop.
//!
//! The session task exclusively owns the timeline, presence, transfer table
//! and read marker for a single conversation; every mutation happens inside
//! this loop, one event at a time, so no locking is needed. The loop must
//! still tolerate re-delivered and arbitrarily interleaved events — all
//! state is keyed by message/transfer id, never by arrival order.
//!
//! Work that would stall the loop (REST calls, chunk streaming, reassembly
//! decode + cache write) runs in spawned tasks that report back through an
//! internal channel.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use banter_media::{CompletedTransfer, MediaCache, MediaError, TransferSummary, TransferTable};
use banter_net::{
    spawn_channel, ChannelConfig, ChannelNotification, EventChannel, NetError, RestClient,
};
use banter_shared::constants::{
    CHANNEL_BUFFER, READ_DEBOUNCE_MS, RECONNECT_POLL_ATTEMPTS, RECONNECT_POLL_INTERVAL_MS,
};
use banter_shared::model::{Attachment, Message, MessageKind, ReplySnapshot};
use banter_shared::protocol::{ClientEvent, MessagePayload, ServerEvent, SubmitPayload};
use banter_shared::types::{ConversationKey, TempId, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::SessionEvent;
use crate::presence::PresenceTracker;
use crate::receipts::ReadMarker;
use crate::timeline::Timeline;

/// Everything needed to open a conversation.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub config: ClientConfig,
    pub room: ConversationKey,
    pub user_id: UserId,
    pub username: String,
}

/// User-initiated actions, sent through the [`SessionHandle`].
#[derive(Debug)]
pub enum SessionCommand {
    SendText {
        content: String,
        reply_to: Option<ReplySnapshot>,
    },
    SendAttachment {
        path: PathBuf,
        kind: MessageKind,
    },
    SetTyping {
        active: bool,
    },
    /// Re-fetch conversation history over REST.
    Refresh,
    Teardown,
}

/// Completions reported by spawned tasks.
#[derive(Debug)]
enum InternalEvent {
    RestSubmitDone {
        temp_id: TempId,
        result: Result<MessagePayload, NetError>,
    },
    ChunkSendDone {
        temp_id: TempId,
        result: Result<TransferSummary, MediaError>,
    },
    ReassemblyDone {
        message_id: String,
        result: Result<PathBuf, MediaError>,
    },
    HistoryLoaded {
        result: Result<Vec<MessagePayload>, NetError>,
    },
}

/// Caller-side handle to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send_text(
        &self,
        content: impl Into<String>,
        reply_to: Option<ReplySnapshot>,
    ) -> Result<(), ClientError> {
        self.command(SessionCommand::SendText {
            content: content.into(),
            reply_to,
        })
        .await
    }

    pub async fn send_attachment(
        &self,
        path: impl Into<PathBuf>,
        kind: MessageKind,
    ) -> Result<(), ClientError> {
        self.command(SessionCommand::SendAttachment {
            path: path.into(),
            kind,
        })
        .await
    }

    pub async fn set_typing(&self, active: bool) -> Result<(), ClientError> {
        self.command(SessionCommand::SetTyping { active }).await
    }

    pub async fn refresh(&self) -> Result<(), ClientError> {
        self.command(SessionCommand::Refresh).await
    }

    /// Tear the session down: stop typing, leave the room, drop the
    /// channel. In-flight transfers are abandoned, not awaited.
    pub async fn teardown(&self) -> Result<(), ClientError> {
        self.command(SessionCommand::Teardown).await
    }

    async fn command(&self, cmd: SessionCommand) -> Result<(), ClientError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Spawn the session task for one conversation.
///
/// Each conversation gets its own session; a group room and a direct
/// conversation never share one.
///
/// # Returns
///
/// `(handle, event_rx)` — commands go in through the handle, rendered state
/// and notices come out of the event receiver.
pub fn spawn_session(
    params: SessionParams,
) -> anyhow::Result<(SessionHandle, mpsc::Receiver<SessionEvent>)> {
    let cache = MediaCache::open(params.config.cache_dir.clone())?;
    let rest = RestClient::new(&params.config.http_url);
    let (channel, notif_rx) = spawn_channel(ChannelConfig {
        ws_url: params.config.ws_url.clone(),
        room: params.room.clone(),
        user_id: params.user_id.clone(),
    });

    let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(CHANNEL_BUFFER);
    let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(CHANNEL_BUFFER);
    let (internal_tx, internal_rx) = mpsc::channel::<InternalEvent>(CHANNEL_BUFFER);

    let session = Session {
        timeline: Timeline::new(params.room.clone(), params.user_id.clone()),
        presence: PresenceTracker::new(params.user_id.clone()),
        transfers: TransferTable::new(),
        marker: ReadMarker::new(Duration::from_millis(READ_DEBOUNCE_MS)),
        channel,
        rest,
        cache,
        event_tx,
        internal_tx,
        params,
    };

    tokio::spawn(session.run(cmd_rx, notif_rx, internal_rx));

    Ok((SessionHandle { cmd_tx }, event_rx))
}

struct Session {
    timeline: Timeline,
    presence: PresenceTracker,
    transfers: TransferTable,
    marker: ReadMarker,
    channel: EventChannel,
    rest: RestClient,
    cache: MediaCache,
    event_tx: mpsc::Sender<SessionEvent>,
    internal_tx: mpsc::Sender<InternalEvent>,
    params: SessionParams,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
        mut notif_rx: mpsc::Receiver<ChannelNotification>,
        mut internal_rx: mpsc::Receiver<InternalEvent>,
    ) {
        info!(room = %self.params.room, "Conversation session started");
        self.spawn_history_fetch();

        loop {
            let read_deadline = self.marker.deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Teardown) | None => {
                        self.teardown().await;
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                Some(event) = internal_rx.recv() => {
                    self.handle_internal(event).await;
                }

                Some(note) = notif_rx.recv() => {
                    self.handle_notification(note).await;
                }

                _ = sleep_until_deadline(read_deadline) => {
                    self.flush_read_marker().await;
                }
            }
        }

        info!(room = %self.params.room, "Conversation session terminated");
    }

    // -----------------------------------------------------------------------
    // User commands
    // -----------------------------------------------------------------------

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SendText { content, reply_to } => {
                self.send_text(content, reply_to).await;
            }
            SessionCommand::SendAttachment { path, kind } => {
                self.send_attachment(path, kind).await;
            }
            SessionCommand::SetTyping { active } => {
                let event = if active {
                    ClientEvent::StartTyping {
                        room: self.params.room.clone(),
                        user_id: self.params.user_id.clone(),
                        username: self.params.username.clone(),
                    }
                } else {
                    ClientEvent::StopTyping {
                        room: self.params.room.clone(),
                        user_id: self.params.user_id.clone(),
                    }
                };
                // Typing indication is best-effort; no REST fallback.
                if let Err(e) = self.channel.send(event).await {
                    debug!(error = %e, "Typing emit skipped");
                }
            }
            SessionCommand::Refresh => self.spawn_history_fetch(),
            // Teardown is intercepted by the run loop before dispatch.
            SessionCommand::Teardown => {}
        }
    }

    /// Optimistic submission: insert a `sending` entry immediately, then try
    /// the channel, degrading to REST when it is unavailable.
    async fn send_text(&mut self, content: String, reply_to: Option<ReplySnapshot>) {
        let temp_id = TempId::generate();
        let message = Message::outgoing(
            temp_id.clone(),
            self.params.room.clone(),
            self.params.user_id.clone(),
            self.params.username.clone(),
            content,
            MessageKind::Text,
            None,
            reply_to,
        );
        let submit = self.submit_payload_for(&temp_id, &message);

        self.timeline.insert_local(message);
        self.emit_timeline().await;

        match self.channel.send(ClientEvent::SubmitMessage(submit.clone())).await {
            Ok(()) => {}
            Err(NetError::TransportUnavailable) => self.spawn_rest_submit(temp_id, submit),
            Err(e) => self.roll_back_send(&temp_id, e.to_string()).await,
        }
    }

    async fn send_attachment(&mut self, path: PathBuf, kind: MessageKind) {
        let temp_id = TempId::generate();

        let file_size = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Attachment unreadable");
                self.emit(SessionEvent::SendFailed {
                    temp_id,
                    reason: e.to_string(),
                })
                .await;
                return;
            }
        };
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();

        let message = Message::outgoing(
            temp_id.clone(),
            self.params.room.clone(),
            self.params.user_id.clone(),
            self.params.username.clone(),
            String::new(),
            kind,
            Some(Attachment {
                // Local preview URI, shown until the resolved one lands.
                file_url: format!("file://{}", path.display()),
                file_name,
                file_size,
                duration: None,
            }),
            None,
        );
        let submit = self.submit_payload_for(&temp_id, &message);

        self.timeline.insert_local(message);
        self.emit_timeline().await;

        if self.channel.is_connected() {
            match self.channel.send(ClientEvent::SubmitMessage(submit)).await {
                Ok(()) => self.spawn_chunk_stream(temp_id, path, kind),
                Err(NetError::TransportUnavailable) => {
                    self.spawn_rest_upload(temp_id, path, kind)
                }
                Err(e) => self.roll_back_send(&temp_id, e.to_string()).await,
            }
        } else {
            self.spawn_rest_upload(temp_id, path, kind);
        }
    }

    fn submit_payload_for(&self, temp_id: &TempId, message: &Message) -> SubmitPayload {
        SubmitPayload {
            client_temp_id: temp_id.clone(),
            room: message.conversation.clone(),
            sender: message.sender.clone(),
            sender_name: message.sender_name.clone(),
            content: message.content.clone(),
            kind: message.kind,
            timestamp: message.timestamp,
            attachment: message.attachment.clone(),
            reply_to: message.reply_to.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Channel notifications
    // -----------------------------------------------------------------------

    async fn handle_notification(&mut self, note: ChannelNotification) {
        match note {
            ChannelNotification::LinkUp => {
                self.emit(SessionEvent::ConnectionChanged { connected: true })
                    .await;
            }
            ChannelNotification::LinkDown => {
                self.emit(SessionEvent::ConnectionChanged { connected: false })
                    .await;
                // Bounded reconnection polling; a LinkUp notification
                // reports success, silence means the channel stays down.
                let channel = self.channel.clone();
                tokio::spawn(async move {
                    channel
                        .await_connected(
                            RECONNECT_POLL_ATTEMPTS,
                            Duration::from_millis(RECONNECT_POLL_INTERVAL_MS),
                        )
                        .await;
                });
            }
            ChannelNotification::Event(event) => self.handle_server_event(event).await,
        }
    }

    async fn handle_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(payload) => {
                let id = payload.id.clone();
                let from_peer = payload.sender != self.params.user_id;

                if self.timeline.apply_broadcast(payload) {
                    self.emit_timeline().await;
                }
                if from_peer {
                    self.marker.note([id], Instant::now());
                }
            }

            ServerEvent::MessageAck(ack) => {
                if self.timeline.apply_ack(ack.message_id, ack.client_temp_id) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::MessageRejected {
                client_temp_id,
                reason,
            } => {
                self.timeline.remove_failed(&client_temp_id);
                self.emit_timeline().await;
                self.emit(SessionEvent::SubmissionBlocked {
                    temp_id: client_temp_id,
                    reason,
                })
                .await;
            }

            ServerEvent::MessageEdited {
                message_id,
                content,
            } => {
                if self.timeline.apply_edit(&message_id, content) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::MessageDeleted(payload) => {
                if self.timeline.apply_delete(&payload) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::ReactionUpdated {
                message_id,
                reactions,
            } => {
                if self.timeline.apply_reactions(&message_id, reactions) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::ModerationUpdated {
                message_id,
                moderation,
            } => {
                if self.timeline.apply_moderation(&message_id, moderation) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::ReadReceiptBatch { receipts } => {
                if self.timeline.apply_receipts(&receipts) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::MessageStatus { message_id, status } => {
                if self.timeline.apply_status(&message_id, status) {
                    self.emit_timeline().await;
                }
            }

            ServerEvent::OnlineUsers { users } => {
                self.presence.replace_roster(users);
                self.emit_presence().await;
            }

            ServerEvent::UserJoined { user_id } => {
                if self.presence.on_joined(user_id) {
                    self.emit_presence().await;
                }
            }

            ServerEvent::UserLeft { user_id } => {
                if self.presence.on_left(&user_id) {
                    self.emit_presence().await;
                }
            }

            ServerEvent::Typing { user_id, username } => {
                if self.presence.set_typing(user_id, username) {
                    self.emit_presence().await;
                }
            }

            ServerEvent::StopTyping { user_id } => {
                if self.presence.clear_typing(&user_id) {
                    self.emit_presence().await;
                }
            }

            ServerEvent::TransferStart(start) => {
                if let Some(completed) = self.transfers.begin(&start) {
                    self.spawn_reassembly(completed);
                }
            }

            ServerEvent::TransferChunk(chunk) => {
                if let Some(completed) = self.transfers.store_chunk(&chunk) {
                    self.spawn_reassembly(completed);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Spawned-task completions
    // -----------------------------------------------------------------------

    async fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::RestSubmitDone { temp_id, result } => match result {
                Ok(payload) => {
                    self.timeline.apply_ack(payload.id.clone(), temp_id);
                    self.timeline.apply_broadcast(payload);
                    self.emit_timeline().await;
                }
                Err(NetError::Rejected(reason)) => {
                    self.timeline.remove_failed(&temp_id);
                    self.emit_timeline().await;
                    self.emit(SessionEvent::SubmissionBlocked { temp_id, reason })
                        .await;
                }
                Err(e) => self.roll_back_send(&temp_id, e.to_string()).await,
            },

            InternalEvent::ChunkSendDone { temp_id, result } => match result {
                Ok(summary) => {
                    debug!(
                        temp_id = %temp_id,
                        chunks = summary.total_chunks,
                        "Chunk stream completed"
                    );
                }
                Err(e) => self.roll_back_send(&temp_id, e.to_string()).await,
            },

            InternalEvent::ReassemblyDone { message_id, result } => match result {
                Ok(path) => {
                    let url = path.to_string_lossy().to_string();
                    if self.timeline.resolve_attachment(&message_id, &url) {
                        self.emit_timeline().await;
                    }
                }
                Err(e) => {
                    // Non-fatal: the message stays in `sending`, no retry.
                    warn!(msg_id = %message_id, error = %e, "Reassembly failed");
                }
            },

            InternalEvent::HistoryLoaded { result } => match result {
                Ok(history) => {
                    let changed = self.timeline.hydrate(history);
                    self.marker.note(self.timeline.unread_ids(), Instant::now());
                    if changed {
                        self.emit_timeline().await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "History fetch failed");
                }
            },
        }
    }

    // -----------------------------------------------------------------------
    // Spawned work
    // -----------------------------------------------------------------------

    fn spawn_history_fetch(&self) {
        let rest = self.rest.clone();
        let room = self.params.room.clone();
        let limit = self.params.config.history_page;
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = rest.fetch_history(&room, limit).await;
            let _ = internal.send(InternalEvent::HistoryLoaded { result }).await;
        });
    }

    fn spawn_rest_submit(&self, temp_id: TempId, submit: SubmitPayload) {
        debug!(temp_id = %temp_id, "Channel down, submitting over REST");
        let rest = self.rest.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = rest.submit_message(&submit).await;
            let _ = internal
                .send(InternalEvent::RestSubmitDone { temp_id, result })
                .await;
        });
    }

    fn spawn_rest_upload(&self, temp_id: TempId, path: PathBuf, kind: MessageKind) {
        debug!(temp_id = %temp_id, "Channel down, uploading media over REST");
        let rest = self.rest.clone();
        let internal = self.internal_tx.clone();
        let mut submit = SubmitPayload {
            client_temp_id: temp_id.clone(),
            room: self.params.room.clone(),
            sender: self.params.user_id.clone(),
            sender_name: self.params.username.clone(),
            content: String::new(),
            kind,
            timestamp: chrono::Utc::now(),
            attachment: None,
            reply_to: None,
        };
        tokio::spawn(async move {
            let result: Result<MessagePayload, NetError> = async {
                let url = rest.upload_media(&path).await?;
                let file_name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("attachment")
                    .to_string();
                let file_size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                submit.attachment = Some(Attachment {
                    file_url: url,
                    file_name,
                    file_size,
                    duration: None,
                });
                rest.submit_message(&submit).await
            }
            .await;
            let _ = internal
                .send(InternalEvent::RestSubmitDone { temp_id, result })
                .await;
        });
    }

    fn spawn_chunk_stream(&self, temp_id: TempId, path: PathBuf, kind: MessageKind) {
        let channel = self.channel.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = banter_media::send_file(&channel, &temp_id.0, &path, kind).await;
            let _ = internal
                .send(InternalEvent::ChunkSendDone { temp_id, result })
                .await;
        });
    }

    fn spawn_reassembly(&self, completed: CompletedTransfer) {
        let cache = self.cache.clone();
        let internal = self.internal_tx.clone();
        tokio::spawn(async move {
            let message_id = completed.message_id.clone();
            let result: Result<PathBuf, MediaError> = async {
                let bytes = banter_media::reassemble(&completed).await?;
                cache
                    .store(
                        completed.kind,
                        &completed.message_id,
                        &completed.file_name,
                        &bytes,
                    )
                    .await
            }
            .await;
            let _ = internal
                .send(InternalEvent::ReassemblyDone { message_id, result })
                .await;
        });
    }

    // -----------------------------------------------------------------------
    // Read marker
    // -----------------------------------------------------------------------

    async fn flush_read_marker(&mut self) {
        let Some(ids) = self.marker.flush_due(Instant::now()) else {
            return;
        };
        debug!(count = ids.len(), "Flushing batched mark-read");

        let event = ClientEvent::MarkRead {
            room: self.params.room.clone(),
            user_id: self.params.user_id.clone(),
            message_ids: ids.clone(),
        };
        match self.channel.send(event).await {
            Ok(()) => {}
            Err(NetError::TransportUnavailable) => {
                let rest = self.rest.clone();
                let room = self.params.room.clone();
                let user = self.params.user_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = rest.mark_read(&room, &user, &ids).await {
                        warn!(error = %e, "Mark-read fallback failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "Mark-read emit failed"),
        }
    }

    // -----------------------------------------------------------------------
    // Shared plumbing
    // -----------------------------------------------------------------------

    async fn roll_back_send(&mut self, temp_id: &TempId, reason: String) {
        warn!(temp_id = %temp_id, reason = %reason, "Send failed, rolling back");
        self.timeline.remove_failed(temp_id);
        self.emit_timeline().await;
        self.emit(SessionEvent::SendFailed {
            temp_id: temp_id.clone(),
            reason,
        })
        .await;
    }

    async fn teardown(&mut self) {
        let stop = ClientEvent::StopTyping {
            room: self.params.room.clone(),
            user_id: self.params.user_id.clone(),
        };
        let _ = self.channel.send(stop).await;
        self.channel.disconnect().await;
        self.transfers.abandon_all();
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event).await;
    }

    async fn emit_timeline(&self) {
        self.emit(SessionEvent::TimelineUpdated {
            messages: self.timeline.messages().to_vec(),
        })
        .await;
    }

    async fn emit_presence(&self) {
        self.emit(SessionEvent::PresenceChanged {
            online: self.presence.online_users(),
            typing: self.presence.typing_users(),
        })
        .await;
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
