//! Message domain model held in the in-memory timeline.
//!
//! Every struct derives `Serialize`/`Deserialize` so snapshots can be handed
//! directly to a UI layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::MessagePayload;
use crate::types::{ConversationKey, MessageId, TempId, UserId};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    File,
}

impl MessageKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, Self::Text)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

/// Delivery state of a message. Ordered: a message only ever moves forward
/// through these states (a failed send is removed, never demoted).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

/// Server-side moderation verdict attached to a message after the fact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Moderation {
    Clean,
    Flagged,
    Blocked,
}

/// How far a deletion reaches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeleteScope {
    Me,
    Everyone,
}

// ---------------------------------------------------------------------------
// Attachment
// ---------------------------------------------------------------------------

/// Media attached to a message.
///
/// `file_url` starts out transient (a `file://` preview URI, or empty) and is
/// replaced exactly once by a resolved URI — either the server's canonical
/// URL or a local cache path after chunk reassembly. A resolved URL never
/// regresses to a transient one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Attachment {
    /// Whether `file_url` is still a transient (pre-transfer) URI.
    pub fn is_transient(&self) -> bool {
        self.file_url.is_empty() || self.file_url.starts_with("file://")
    }

    /// Adopt a resolved URI, unless one is already in place.
    pub fn resolve(&mut self, url: impl Into<String>) {
        if self.is_transient() {
            self.file_url = url.into();
        }
    }
}

// ---------------------------------------------------------------------------
// Receipts, replies, identity
// ---------------------------------------------------------------------------

/// One participant's read receipt for a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

/// Denormalized snapshot of the message being replied to. A copy, not a
/// live reference: the original may be deleted later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplySnapshot {
    pub id: MessageId,
    pub username: String,
    pub content: String,
    pub kind: MessageKind,
}

/// A message is addressed either by its server-assigned id or, while a send
/// is still pending, by the client-generated temp id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MessageIdentity {
    Confirmed(MessageId),
    Pending(TempId),
}

impl MessageIdentity {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }

    pub fn as_confirmed(&self) -> Option<&MessageId> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }

    pub fn as_pending(&self) -> Option<&TempId> {
        match self {
            Self::Confirmed(_) => None,
            Self::Pending(t) => Some(t),
        }
    }
}

impl std::fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "{id}"),
            Self::Pending(t) => write!(f, "~{t}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageIdentity,
    pub conversation: ConversationKey,
    pub sender: UserId,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    /// Participant count excluding the sender. Zero while unknown (local
    /// optimistic entries stay at zero until the server copy arrives).
    #[serde(default)]
    pub total_recipients: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplySnapshot>,
    #[serde(default)]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(default)]
    pub edited: bool,
    pub moderation: Moderation,
}

impl Message {
    /// Build the optimistic local entry inserted at submission time.
    pub fn outgoing(
        temp_id: TempId,
        conversation: ConversationKey,
        sender: UserId,
        sender_name: String,
        content: String,
        kind: MessageKind,
        attachment: Option<Attachment>,
        reply_to: Option<ReplySnapshot>,
    ) -> Self {
        Self {
            id: MessageIdentity::Pending(temp_id),
            conversation,
            sender,
            sender_name,
            content,
            kind,
            timestamp: Utc::now(),
            attachment,
            status: MessageStatus::Sending,
            read_by: Vec::new(),
            total_recipients: 0,
            reply_to,
            reactions: BTreeMap::new(),
            edited: false,
            moderation: Moderation::Clean,
        }
    }

    /// Build a confirmed entry from a server broadcast or REST history row.
    pub fn from_payload(p: MessagePayload) -> Self {
        Self {
            id: MessageIdentity::Confirmed(p.id),
            conversation: p.room,
            sender: p.sender,
            sender_name: p.sender_name,
            content: p.content,
            kind: p.kind,
            timestamp: p.timestamp,
            attachment: p.attachment,
            status: p.status,
            read_by: p.read_by,
            total_recipients: p.total_recipients,
            reply_to: p.reply_to,
            reactions: p.reactions,
            edited: p.edited,
            moderation: Moderation::Clean,
        }
    }

    /// Derived aggregate: how many recipients have read this message.
    pub fn read_count(&self) -> u32 {
        self.read_by.len() as u32
    }

    /// Move the status forward; backward transitions are ignored.
    pub fn bump_status(&mut self, to: MessageStatus) {
        if to > self.status {
            self.status = to;
        }
    }
}
