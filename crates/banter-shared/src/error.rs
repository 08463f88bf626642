use thiserror::Error;

/// Errors produced while encoding or decoding wire payloads.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unrecognized room key: {0}")]
    BadRoom(String),
}
