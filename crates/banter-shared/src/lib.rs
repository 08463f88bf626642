//! # banter-shared
//!
//! Types shared by every crate in the workspace: identifiers, the message
//! domain model, the wire protocol spoken over the event channel, protocol
//! constants, and the shared error types.

pub mod constants;
pub mod model;
pub mod protocol;
pub mod types;

mod error;

pub use error::ProtocolError;
pub use model::*;
pub use types::{ConversationKey, MessageId, TempId, UserId};
