/// Chunk size for media transfer, in bytes of base64 text (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Delay between consecutive chunk emissions, to avoid saturating the channel.
pub const INTER_CHUNK_DELAY_MS: u64 = 30;

/// Debounce window for batched mark-read requests.
pub const READ_DEBOUNCE_MS: u64 = 500;

/// Interval between connection-state polls while waiting for the channel.
pub const RECONNECT_POLL_INTERVAL_MS: u64 = 500;

/// Bounded number of connection-state polls before giving up.
pub const RECONNECT_POLL_ATTEMPTS: u32 = 10;

/// Maximum attachment size in bytes (50 MiB).
pub const MAX_ATTACHMENT_SIZE: usize = 50 * 1024 * 1024;

/// Slot count for a receive buffer allocated without a start event.
/// Covers any transfer up to `MAX_ATTACHMENT_SIZE` at `CHUNK_SIZE`.
pub const FALLBACK_TOTAL_CHUNKS: u32 = 2048;

/// Depth of the command/notification mpsc channels.
pub const CHANNEL_BUFFER: usize = 256;

/// Default event-channel endpoint.
pub const DEFAULT_WS_URL: &str = "ws://127.0.0.1:8080/ws";

/// Default REST fallback endpoint.
pub const DEFAULT_HTTP_URL: &str = "http://127.0.0.1:8080";
