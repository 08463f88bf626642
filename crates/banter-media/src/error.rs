use thiserror::Error;

/// Errors produced by the media layer.
#[derive(Error, Debug)]
pub enum MediaError {
    /// The file exceeds the attachment size limit.
    #[error("File too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    /// The channel dropped mid-stream. No partial file counts as delivered.
    #[error("Chunk transfer interrupted after {sent}/{total} chunks")]
    TransferInterrupted { sent: u32, total: u32 },

    /// Decoding the reassembled payload failed. Non-fatal: the owning
    /// message stays in `sending` and the condition is logged.
    #[error("Reassembly failed: {0}")]
    Reassembly(#[from] base64::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not determine a media cache directory")]
    NoCacheDir,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MediaError>;
