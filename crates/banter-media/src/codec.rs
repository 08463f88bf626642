//! Send-path splitter and receive-path reassembly.
//!
//! Chunking exists because the channel imposes a practical frame-size
//! ceiling: the payload is base64-encoded first, then the encoded text is
//! sliced into `CHUNK_SIZE` pieces, so `total_chunks` is computed over the
//! encoded length.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info};

use banter_net::EventChannel;
use banter_shared::constants::{CHUNK_SIZE, INTER_CHUNK_DELAY_MS, MAX_ATTACHMENT_SIZE};
use banter_shared::model::MessageKind;
use banter_shared::protocol::{ClientEvent, TransferChunkPayload, TransferStartPayload};

use crate::error::{MediaError, Result};
use crate::transfer::CompletedTransfer;

/// What a completed send looked like.
#[derive(Debug, Clone)]
pub struct TransferSummary {
    pub file_name: String,
    pub file_size: u64,
    pub total_chunks: u32,
}

/// Slice base64 text into fixed-size chunks. Base64 is ASCII, so byte
/// slicing never splits a code point.
pub fn split_encoded(encoded: &str, chunk_size: usize) -> Vec<String> {
    encoded
        .as_bytes()
        .chunks(chunk_size)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect()
}

/// Stream a local file over the event channel as a start event followed by
/// indexed chunks, in strictly increasing order, with a small inter-chunk
/// delay so the channel is not saturated.
///
/// Fails with [`MediaError::TransferInterrupted`] if the channel drops
/// mid-stream; no partial file is considered delivered.
pub async fn send_file(
    channel: &EventChannel,
    message_id: &str,
    path: &Path,
    kind: MessageKind,
) -> Result<TransferSummary> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();

    let data = tokio::fs::read(path).await?;
    if data.len() > MAX_ATTACHMENT_SIZE {
        return Err(MediaError::TooLarge {
            size: data.len(),
            max: MAX_ATTACHMENT_SIZE,
        });
    }
    let file_size = data.len() as u64;

    let encoded = BASE64.encode(&data);
    let mut chunks = split_encoded(&encoded, CHUNK_SIZE);
    if chunks.is_empty() {
        chunks.push(String::new());
    }
    let total_chunks = chunks.len() as u32;

    let start = ClientEvent::TransferStart(TransferStartPayload {
        message_id: message_id.to_string(),
        file_name: file_name.clone(),
        kind,
        total_chunks,
        file_size,
    });
    channel.send(start).await.map_err(|_| MediaError::TransferInterrupted {
        sent: 0,
        total: total_chunks,
    })?;

    for (index, payload) in chunks.into_iter().enumerate() {
        let chunk = ClientEvent::TransferChunk(TransferChunkPayload {
            message_id: message_id.to_string(),
            chunk_index: index as u32,
            payload,
            is_last_chunk: index as u32 + 1 == total_chunks,
        });
        channel.send(chunk).await.map_err(|_| MediaError::TransferInterrupted {
            sent: index as u32,
            total: total_chunks,
        })?;

        tokio::time::sleep(Duration::from_millis(INTER_CHUNK_DELAY_MS)).await;
    }

    info!(
        msg_id = %message_id,
        file = %file_name,
        chunks = total_chunks,
        size = file_size,
        "Chunk stream sent"
    );

    Ok(TransferSummary {
        file_name,
        file_size,
        total_chunks,
    })
}

/// Decode a completed transfer back into the original bytes.
///
/// Concatenates chunk strings in index order, skipping any empty slot
/// defensively, yielding between chunks so a large reassembly never hogs
/// the event loop.
pub async fn reassemble(completed: &CompletedTransfer) -> Result<Vec<u8>> {
    let mut encoded = String::new();
    for slot in completed.slots.iter().take(completed.total_chunks as usize) {
        if let Some(chunk) = slot {
            encoded.push_str(chunk);
        } else {
            debug!(msg_id = %completed.message_id, "Missing chunk slot during reassembly");
        }
        tokio::task::yield_now().await;
    }

    Ok(BASE64.decode(encoded.as_bytes())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferTable;
    use banter_shared::protocol::TransferChunkPayload;

    fn chunk(id: &str, index: u32, payload: &str, last: bool) -> TransferChunkPayload {
        TransferChunkPayload {
            message_id: id.to_string(),
            chunk_index: index,
            payload: payload.to_string(),
            is_last_chunk: last,
        }
    }

    #[test]
    fn test_split_encoded_sizes() {
        let encoded = "a".repeat(10_000);
        let chunks = split_encoded(&encoded, 4096);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[2].len(), 10_000 - 2 * 4096);
    }

    #[tokio::test]
    async fn test_split_then_join_is_identity() {
        let original: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let encoded = BASE64.encode(&original);
        let chunks = split_encoded(&encoded, 4096);
        let total = chunks.len() as u32;

        let mut table = TransferTable::new();
        for (i, payload) in chunks.iter().enumerate() {
            let done = table.store_chunk(&chunk(
                "m-1",
                i as u32,
                payload,
                i as u32 + 1 == total,
            ));
            if i as u32 + 1 == total {
                let completed = done.expect("last chunk completes the transfer");
                let bytes = reassemble(&completed).await.unwrap();
                assert_eq!(bytes, original);
                return;
            }
            assert!(done.is_none());
        }
        panic!("transfer never completed");
    }

    #[tokio::test]
    async fn test_out_of_order_chunks_reassemble() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(500);
        let encoded = BASE64.encode(&original);
        let chunks = split_encoded(&encoded, 1024);
        let total = chunks.len() as u32;
        assert!(total >= 10, "need enough chunks to permute");

        // Arrival order 0, 2, 1, 3..n-1, with the last chunk genuinely last.
        let mut order: Vec<u32> = (0..total).collect();
        order.swap(1, 2);

        let mut table = TransferTable::new();
        let mut completed = None;
        for &i in &order {
            let done = table.store_chunk(&chunk(
                "m-2",
                i,
                &chunks[i as usize],
                i + 1 == total,
            ));
            if let Some(c) = done {
                completed = Some(c);
            }
        }

        let completed = completed.expect("all chunks present");
        let bytes = reassemble(&completed).await.unwrap();
        assert_eq!(bytes, original);
    }

    #[tokio::test]
    async fn test_reassembly_with_corrupt_base64_fails_cleanly() {
        let mut table = TransferTable::new();
        let done = table.store_chunk(&chunk("m-3", 0, "!!!not base64!!!", true));
        let completed = done.expect("single-chunk transfer completes");
        assert!(reassemble(&completed).await.is_err());
    }
}
