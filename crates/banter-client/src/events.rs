//! Events the session emits toward the UI layer.

use serde::Serialize;

use banter_shared::model::Message;
use banter_shared::types::{TempId, UserId};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEvent {
    /// The timeline changed; a full snapshot for rendering.
    TimelineUpdated { messages: Vec<Message> },

    /// Online or typing state changed.
    PresenceChanged {
        online: Vec<UserId>,
        typing: Vec<(UserId, String)>,
    },

    /// The event channel came up or went down.
    ConnectionChanged { connected: bool },

    /// A send failed and its optimistic entry was rolled back. Transient
    /// notice, not a permanent error bubble.
    SendFailed { temp_id: TempId, reason: String },

    /// The server declined the content (policy violation). Distinct from a
    /// generic failure.
    SubmissionBlocked { temp_id: TempId, reason: String },
}
