//! Receive-side transfer tracking.
//!
//! Chunks may arrive out of order, so each transfer keeps a sparse indexed
//! buffer: storing is by `chunk_index`, never by arrival order. A transfer
//! completes when the last-chunk marker has been seen *and* every expected
//! chunk is present.

use std::collections::HashMap;

use tracing::{debug, warn};

use banter_shared::constants::FALLBACK_TOTAL_CHUNKS;
use banter_shared::model::MessageKind;
use banter_shared::protocol::{TransferChunkPayload, TransferStartPayload};

/// An in-flight inbound transfer.
#[derive(Debug)]
pub struct PendingTransfer {
    pub message_id: String,
    pub file_name: String,
    pub kind: MessageKind,
    /// Expected chunk count; zero while unknown (start event missed).
    pub total_chunks: u32,
    pub file_size: u64,
    slots: Vec<Option<String>>,
    received: u32,
    saw_last: bool,
}

impl PendingTransfer {
    fn from_start(start: &TransferStartPayload) -> Self {
        Self {
            message_id: start.message_id.clone(),
            file_name: start.file_name.clone(),
            kind: start.kind,
            total_chunks: start.total_chunks,
            file_size: start.file_size,
            slots: vec![None; start.total_chunks as usize],
            received: 0,
            saw_last: false,
        }
    }

    /// Defensive construction when a chunk arrives before (or without) its
    /// start event: an oversized placeholder buffer, metadata unknown.
    fn placeholder(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            file_name: format!("{message_id}.bin"),
            kind: MessageKind::File,
            total_chunks: 0,
            file_size: 0,
            slots: vec![None; FALLBACK_TOTAL_CHUNKS as usize],
            received: 0,
            saw_last: false,
        }
    }

    /// Adopt metadata from a start event that arrived late.
    fn merge_start(&mut self, start: &TransferStartPayload) {
        self.file_name = start.file_name.clone();
        self.kind = start.kind;
        self.file_size = start.file_size;
        if self.total_chunks == 0 {
            self.total_chunks = start.total_chunks;
        }
        if self.slots.len() < start.total_chunks as usize {
            self.slots.resize(start.total_chunks as usize, None);
        }
    }

    /// Store one chunk at its index. Re-delivered chunks are not counted
    /// twice.
    fn store(&mut self, chunk: &TransferChunkPayload) {
        let index = chunk.chunk_index as usize;
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }

        if self.slots[index].is_none() {
            self.slots[index] = Some(chunk.payload.clone());
            self.received += 1;
        } else {
            debug!(
                msg_id = %self.message_id,
                index,
                "Duplicate chunk ignored"
            );
        }

        if chunk.is_last_chunk {
            self.saw_last = true;
            if self.total_chunks == 0 {
                self.total_chunks = chunk.chunk_index + 1;
            }
        }
    }

    pub fn received(&self) -> u32 {
        self.received
    }

    fn is_complete(&self) -> bool {
        self.saw_last && self.total_chunks > 0 && self.received >= self.total_chunks
    }

    fn into_completed(self) -> CompletedTransfer {
        CompletedTransfer {
            message_id: self.message_id,
            file_name: self.file_name,
            kind: self.kind,
            total_chunks: self.total_chunks,
            slots: self.slots,
        }
    }
}

/// All chunks of one transfer, ready for decoding.
#[derive(Debug)]
pub struct CompletedTransfer {
    pub message_id: String,
    pub file_name: String,
    pub kind: MessageKind,
    pub total_chunks: u32,
    pub(crate) slots: Vec<Option<String>>,
}

/// Tracks every in-flight inbound transfer, keyed by message id.
#[derive(Debug, Default)]
pub struct TransferTable {
    transfers: HashMap<String, PendingTransfer>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a start event. Returns a completed transfer in the unusual
    /// case where every chunk arrived before the start did.
    pub fn begin(&mut self, start: &TransferStartPayload) -> Option<CompletedTransfer> {
        match self.transfers.get_mut(&start.message_id) {
            Some(existing) => {
                existing.merge_start(start);
                debug!(msg_id = %start.message_id, "Start event merged into placeholder");
            }
            None => {
                self.transfers
                    .insert(start.message_id.clone(), PendingTransfer::from_start(start));
                debug!(
                    msg_id = %start.message_id,
                    chunks = start.total_chunks,
                    "Inbound transfer started"
                );
            }
        }
        self.take_if_complete(&start.message_id)
    }

    /// Handle a chunk event, creating a placeholder transfer if the start
    /// event was missed. Returns the completed transfer once all chunks are
    /// present and the last-chunk marker has been seen.
    pub fn store_chunk(&mut self, chunk: &TransferChunkPayload) -> Option<CompletedTransfer> {
        let transfer = self
            .transfers
            .entry(chunk.message_id.clone())
            .or_insert_with(|| {
                warn!(
                    msg_id = %chunk.message_id,
                    "Chunk without start event, allocating placeholder"
                );
                PendingTransfer::placeholder(&chunk.message_id)
            });

        transfer.store(chunk);
        self.take_if_complete(&chunk.message_id)
    }

    /// Drop every in-flight transfer (conversation teardown). Abandoned,
    /// not resumed.
    pub fn abandon_all(&mut self) {
        if !self.transfers.is_empty() {
            debug!(count = self.transfers.len(), "Abandoning in-flight transfers");
            self.transfers.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    fn take_if_complete(&mut self, message_id: &str) -> Option<CompletedTransfer> {
        if self.transfers.get(message_id)?.is_complete() {
            let transfer = self.transfers.remove(message_id)?;
            Some(transfer.into_completed())
        } else {
            None
        }
    }
}
