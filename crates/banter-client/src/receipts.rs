//! Delivery/read aggregation.
//!
//! `derive_tick` turns raw status + receipt counts into the rendered glyph,
//! evaluated in priority order (first match wins). `ReadMarker` debounces
//! outgoing mark-read requests so a burst of incoming messages produces one
//! batched request instead of one per message.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::Instant;

use banter_shared::model::MessageStatus;
use banter_shared::types::MessageId;

/// Rendered delivery indicator for an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still sending.
    Clock,
    /// Sent, no delivery confirmation yet.
    SingleMuted,
    /// Delivered, or partially read.
    DoubleMuted,
    /// Read by every recipient.
    DoubleAccent,
}

/// Priority-ordered derivation, first match wins:
/// 1. server-reported `read`
/// 2. every recipient has read it
/// 3. `delivered`, or partially read
/// 4. `sent`, or no reads yet with a known recipient count
/// 5. still `sending`
pub fn derive_tick(status: MessageStatus, read_count: u32, total_recipients: u32) -> Tick {
    if status == MessageStatus::Read {
        return Tick::DoubleAccent;
    }
    if total_recipients > 0 && read_count >= total_recipients {
        return Tick::DoubleAccent;
    }
    if status == MessageStatus::Delivered || (read_count > 0 && read_count < total_recipients) {
        return Tick::DoubleMuted;
    }
    if status == MessageStatus::Sent || (read_count == 0 && total_recipients > 0) {
        return Tick::SingleMuted;
    }
    Tick::Clock
}

/// Status implied by receipt counts alone. `None` when the counts say
/// nothing new.
pub fn status_from_receipts(read_count: u32, total_recipients: u32) -> Option<MessageStatus> {
    if total_recipients == 0 {
        None
    } else if read_count >= total_recipients {
        Some(MessageStatus::Read)
    } else if read_count > 0 {
        Some(MessageStatus::Delivered)
    } else {
        None
    }
}

/// Debounced batch collector for outgoing mark-read requests.
///
/// Each noted message pushes the flush deadline out by the debounce window;
/// once the timeline goes quiet the whole set is flushed in one request.
#[derive(Debug)]
pub struct ReadMarker {
    pending: BTreeSet<MessageId>,
    deadline: Option<Instant>,
    debounce: Duration,
}

impl ReadMarker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            pending: BTreeSet::new(),
            deadline: None,
            debounce,
        }
    }

    /// Queue ids for marking. No-op (and no deadline bump) when every id is
    /// already queued.
    pub fn note<I>(&mut self, ids: I, now: Instant)
    where
        I: IntoIterator<Item = MessageId>,
    {
        let mut added = false;
        for id in ids {
            added |= self.pending.insert(id);
        }
        if added {
            self.deadline = Some(now + self.debounce);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the batch once the debounce window has elapsed.
    pub fn flush_due(&mut self, now: Instant) -> Option<Vec<MessageId>> {
        match self.deadline {
            Some(deadline) if deadline <= now && !self.pending.is_empty() => {
                self.deadline = None;
                Some(std::mem::take(&mut self.pending).into_iter().collect())
            }
            _ => None,
        }
    }
}
