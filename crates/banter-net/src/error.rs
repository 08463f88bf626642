use thiserror::Error;

/// Errors produced by the transport layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// The event channel is not connected. Callers fall back to REST.
    #[error("Event channel unavailable")]
    TransportUnavailable,

    /// The channel task has terminated and can no longer accept commands.
    #[error("Event channel task is gone")]
    ChannelClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Wire encoding error: {0}")]
    Protocol(#[from] banter_shared::ProtocolError),

    /// The server declined the submission (e.g. policy violation).
    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
