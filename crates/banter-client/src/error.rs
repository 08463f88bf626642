use thiserror::Error;

/// Errors surfaced through the session handle.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The session task has terminated; commands can no longer be accepted.
    #[error("Conversation session is closed")]
    SessionClosed,

    #[error("Transport error: {0}")]
    Net(#[from] banter_net::NetError),

    #[error("Media error: {0}")]
    Media(#[from] banter_media::MediaError),
}
