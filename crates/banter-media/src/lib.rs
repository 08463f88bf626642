//! # banter-media
//!
//! Chunked media transfer: splits binary payloads into fixed-size base64
//! chunks for the event channel, reassembles indexed chunks on the receive
//! side, and caches completed media on disk keyed by message id.

pub mod cache;
pub mod codec;
pub mod transfer;

mod error;

pub use cache::MediaCache;
pub use codec::{reassemble, send_file, TransferSummary};
pub use error::MediaError;
pub use transfer::{CompletedTransfer, PendingTransfer, TransferTable};
