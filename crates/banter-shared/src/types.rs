use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

// Server-assigned account identifier (opaque string, no ':' allowed).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated provisional identifier for a message awaiting server
/// acknowledgment. Exists only until reconciliation replaces it with the
/// authoritative [`MessageId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TempId(pub String);

impl TempId {
    /// Allocate a fresh temp id. UUIDv4, unique even under rapid sends.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which conversation a message belongs to: a community room or a direct
/// pair. Direct pairs are stored in canonical (sorted) order so that either
/// argument order produces the same key.
///
/// On the wire the key travels as its room string (`community:<id>` or
/// `direct:<a>:<b>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ConversationKey {
    Community(String),
    Direct { a: UserId, b: UserId },
}

impl ConversationKey {
    pub fn community(id: impl Into<String>) -> Self {
        Self::Community(id.into())
    }

    /// Build a direct-conversation key from two participants, in any order.
    pub fn direct(x: UserId, y: UserId) -> Self {
        if x <= y {
            Self::Direct { a: x, b: y }
        } else {
            Self::Direct { a: y, b: x }
        }
    }

    /// The room/topic string used for channel subscription and REST paths.
    pub fn room_name(&self) -> String {
        match self {
            Self::Community(id) => format!("community:{id}"),
            Self::Direct { a, b } => format!("direct:{a}:{b}"),
        }
    }

    pub fn parse_room(s: &str) -> Result<Self, ProtocolError> {
        if let Some(id) = s.strip_prefix("community:") {
            if id.is_empty() {
                return Err(ProtocolError::BadRoom(s.to_string()));
            }
            return Ok(Self::Community(id.to_string()));
        }
        if let Some(pair) = s.strip_prefix("direct:") {
            let mut parts = pair.splitn(2, ':');
            match (parts.next(), parts.next()) {
                (Some(a), Some(b)) if !a.is_empty() && !b.is_empty() => {
                    return Ok(Self::direct(
                        UserId(a.to_string()),
                        UserId(b.to_string()),
                    ));
                }
                _ => return Err(ProtocolError::BadRoom(s.to_string())),
            }
        }
        Err(ProtocolError::BadRoom(s.to_string()))
    }
}

impl From<ConversationKey> for String {
    fn from(key: ConversationKey) -> Self {
        key.room_name()
    }
}

impl TryFrom<String> for ConversationKey {
    type Error = ProtocolError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse_room(&s)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.room_name())
    }
}
