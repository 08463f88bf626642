//! Wire protocol spoken over the event channel.
//!
//! Every frame is a JSON envelope `{"event": <name>, "data": <payload>}`,
//! modeled as adjacently-tagged serde enums. The REST fallback reuses the
//! same payload structs.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::model::{
    Attachment, DeleteScope, MessageKind, MessageStatus, Moderation, ReadReceipt, ReplySnapshot,
};
use crate::types::{ConversationKey, MessageId, TempId, UserId};

/// Authoritative message copy, as broadcast to every participant (including
/// the sender) and as returned by the REST history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub room: ConversationKey,
    pub sender: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    #[serde(default)]
    pub total_recipients: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(default)]
    pub edited: bool,
}

/// A client submission, sent over the channel or POSTed to the REST
/// fallback. The server echoes `client_temp_id` back in the acknowledgment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    pub client_temp_id: TempId,
    pub room: ConversationKey,
    pub sender: UserId,
    #[serde(default)]
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
}

/// Acknowledgment correlating a prior submission with its authoritative id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AckPayload {
    pub message_id: MessageId,
    pub client_temp_id: TempId,
}

/// One row of a batched read-receipt event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEntry {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Deletion notice: a single id, a bulk list, or a cleared-conversation flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeletePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub message_ids: Vec<MessageId>,
    #[serde(default)]
    pub cleared: bool,
    pub scope: DeleteScope,
}

/// Announces an inbound chunked media transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferStartPayload {
    /// Id of the owning message: the temp id on the sending side, the
    /// authoritative id on the receiving side.
    pub message_id: String,
    pub file_name: String,
    pub kind: MessageKind,
    pub total_chunks: u32,
    pub file_size: u64,
}

/// One base64 slice of a media transfer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunkPayload {
    pub message_id: String,
    pub chunk_index: u32,
    pub payload: String,
    #[serde(default)]
    pub is_last_chunk: bool,
}

/// Events pushed by the server over the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Full online roster; replaces any previously known set wholesale.
    OnlineUsers { users: Vec<UserId> },
    UserJoined { user_id: UserId },
    UserLeft { user_id: UserId },
    Typing { user_id: UserId, username: String },
    StopTyping { user_id: UserId },

    NewMessage(MessagePayload),
    MessageAck(AckPayload),
    MessageRejected { client_temp_id: TempId, reason: String },
    MessageEdited { message_id: MessageId, content: String },
    MessageDeleted(DeletePayload),
    ReactionUpdated {
        message_id: MessageId,
        reactions: BTreeMap<String, BTreeSet<UserId>>,
    },
    ModerationUpdated { message_id: MessageId, moderation: Moderation },
    ReadReceiptBatch { receipts: Vec<ReceiptEntry> },
    MessageStatus { message_id: MessageId, status: MessageStatus },

    TransferStart(TransferStartPayload),
    TransferChunk(TransferChunkPayload),
}

/// Events emitted by the client over the event channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinRoom { room: ConversationKey, user_id: UserId },
    LeaveRoom { room: ConversationKey, user_id: UserId },
    SubmitMessage(SubmitPayload),
    StartTyping {
        room: ConversationKey,
        user_id: UserId,
        username: String,
    },
    StopTyping { room: ConversationKey, user_id: UserId },
    MarkRead {
        room: ConversationKey,
        user_id: UserId,
        message_ids: Vec<MessageId>,
    },
    TransferStart(TransferStartPayload),
    TransferChunk(TransferChunkPayload),
}

impl ServerEvent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl ClientEvent {
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}
