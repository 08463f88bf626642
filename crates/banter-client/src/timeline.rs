//! The in-memory ordered timeline for one conversation.
//!
//! Owns the optimistic-write / broadcast-merge / status-aggregation logic.
//! All methods are pure state transitions on `&mut self` so the
//! reconciliation algorithm is unit-testable without a live transport.
//!
//! Reconciliation invariant: for any interleaving of (temp insert,
//! broadcast, acknowledgment) referencing the same logical send, exactly one
//! entry survives. Deduplication therefore compares both the authoritative
//! id and any previously-seen temp id — matching on id alone after a rewrite
//! is not enough, because the same send can be referenced by either value
//! depending on arrival order.

use std::collections::HashMap;

use tracing::debug;

use banter_shared::model::{
    Message, MessageIdentity, MessageStatus, Moderation, ReadReceipt,
};
use banter_shared::protocol::{DeletePayload, MessagePayload, ReceiptEntry};
use banter_shared::types::{ConversationKey, MessageId, TempId, UserId};

use crate::receipts::status_from_receipts;

pub struct Timeline {
    room: ConversationKey,
    local_user: UserId,
    /// Entries in ascending timestamp order.
    entries: Vec<Message>,
    /// Authoritative id -> the temp id it superseded. Kept for the lifetime
    /// of the conversation so late or re-delivered events match either id.
    aliases: HashMap<MessageId, TempId>,
}

impl Timeline {
    pub fn new(room: ConversationKey, local_user: UserId) -> Self {
        Self {
            room,
            local_user,
            entries: Vec::new(),
            aliases: HashMap::new(),
        }
    }

    pub fn room(&self) -> &ConversationKey {
        &self.room
    }

    pub fn messages(&self) -> &[Message] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Confirmed messages from peers that the local user has not read yet.
    pub fn unread_ids(&self) -> Vec<MessageId> {
        self.entries
            .iter()
            .filter(|m| m.sender != self.local_user)
            .filter(|m| !m.read_by.iter().any(|r| r.user_id == self.local_user))
            .filter_map(|m| m.id.as_confirmed().cloned())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Optimistic writes
    // -----------------------------------------------------------------------

    /// Insert the optimistic local entry for a send in flight.
    pub fn insert_local(&mut self, message: Message) {
        debug!(id = %message.id, "Optimistic entry inserted");
        self.insert_ordered(message);
    }

    /// Roll back a failed send. The entry is removed, not retained as a
    /// visible failure placeholder.
    pub fn remove_failed(&mut self, temp_id: &TempId) -> bool {
        if let Some(i) = self.position_pending(temp_id) {
            self.entries.remove(i);
            debug!(temp_id = %temp_id, "Failed send rolled back");
            true
        } else {
            false
        }
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Merge an authoritative broadcast copy into the timeline. Idempotent:
    /// replaying the same broadcast cannot create a second entry or
    /// double-count a reaction.
    pub fn apply_broadcast(&mut self, payload: MessagePayload) -> bool {
        // Already confirmed under this id: merge in place.
        if let Some(i) = self.position_confirmed(&payload.id) {
            return self.merge_confirmed(i, payload);
        }

        // A previous ack taught us which temp entry this id supersedes.
        if let Some(temp) = self.aliases.get(&payload.id).cloned() {
            if let Some(i) = self.position_pending(&temp) {
                return self.confirm_pending(i, payload);
            }
        }

        // Our own attachment echo can precede the ack: match the
        // locally-previewed upload job by file name and kind.
        if payload.sender == self.local_user && payload.attachment.is_some() {
            if let Some(i) = self.position_matching_upload(&payload) {
                return self.confirm_pending(i, payload);
            }
        }

        // Unknown message (a peer's, or our own broadcast beating the ack):
        // insert directly as a confirmed entry.
        self.insert_ordered(Message::from_payload(payload));
        true
    }

    /// Correlate an acknowledgment with its pending send.
    pub fn apply_ack(&mut self, message_id: MessageId, temp_id: TempId) -> bool {
        self.aliases.insert(message_id.clone(), temp_id.clone());

        let confirmed = self.position_confirmed(&message_id);
        let pending = self.position_pending(&temp_id);

        match (confirmed, pending) {
            // Broadcast won the race and the temp entry is still live: fold
            // any client-only preview into the confirmed entry, drop the
            // temp one. Exactly one entry remains.
            (Some(_), Some(p)) => {
                let temp_entry = self.entries.remove(p);
                let c = self
                    .position_confirmed(&message_id)
                    .expect("confirmed entry survives removal of the temp one");
                let entry = &mut self.entries[c];
                if let (Some(att), Some(temp_att)) =
                    (entry.attachment.as_mut(), temp_entry.attachment.as_ref())
                {
                    if att.is_transient() && !temp_att.file_url.is_empty() {
                        att.file_url = temp_att.file_url.clone();
                    }
                }
                entry.bump_status(MessageStatus::Sent);
                debug!(msg_id = %message_id, temp_id = %temp_id, "Ack merged into earlier broadcast");
                true
            }

            // Ack first: rewrite the temp entry's id in place.
            (None, Some(p)) => {
                let entry = &mut self.entries[p];
                entry.id = MessageIdentity::Confirmed(message_id.clone());
                entry.bump_status(MessageStatus::Sent);
                debug!(msg_id = %message_id, temp_id = %temp_id, "Temp id rewritten");
                true
            }

            // Already reconciled (re-delivered ack): nothing to do.
            (Some(_), None) | (None, None) => false,
        }
    }

    // -----------------------------------------------------------------------
    // Server-driven updates
    // -----------------------------------------------------------------------

    pub fn apply_status(&mut self, message_id: &MessageId, status: MessageStatus) -> bool {
        if let Some(i) = self.position_by_server_id(message_id) {
            let before = self.entries[i].status;
            self.entries[i].bump_status(status);
            self.entries[i].status != before
        } else {
            false
        }
    }

    /// Fold a batch of read receipts in, deduplicating by (message, user),
    /// and re-derive each touched message's status.
    pub fn apply_receipts(&mut self, receipts: &[ReceiptEntry]) -> bool {
        let mut changed = false;
        for receipt in receipts {
            let Some(i) = self.position_by_server_id(&receipt.message_id) else {
                continue;
            };
            let entry = &mut self.entries[i];
            if receipt.user_id == entry.sender {
                continue;
            }
            if entry.read_by.iter().any(|r| r.user_id == receipt.user_id) {
                continue;
            }

            entry.read_by.push(ReadReceipt {
                user_id: receipt.user_id.clone(),
                read_at: receipt.read_at,
            });
            if let Some(status) =
                status_from_receipts(entry.read_count(), entry.total_recipients)
            {
                entry.bump_status(status);
            }
            changed = true;
        }
        changed
    }

    pub fn apply_edit(&mut self, message_id: &MessageId, content: String) -> bool {
        if let Some(i) = self.position_by_server_id(message_id) {
            let entry = &mut self.entries[i];
            entry.content = content;
            entry.edited = true;
            true
        } else {
            false
        }
    }

    /// Remove deleted messages: a single id, a bulk list, or the whole
    /// conversation when `cleared` is set. Scope only matters server-side;
    /// this client removes the entries either way.
    pub fn apply_delete(&mut self, payload: &DeletePayload) -> bool {
        if payload.cleared {
            let had = !self.entries.is_empty();
            self.entries.clear();
            return had;
        }

        let mut changed = false;
        let single = payload.message_id.iter();
        for id in single.chain(payload.message_ids.iter()) {
            if let Some(i) = self.position_by_server_id(id) {
                self.entries.remove(i);
                changed = true;
            }
        }
        changed
    }

    /// Replace a message's reaction map wholesale. The payload is the
    /// authoritative full map, so re-delivery is idempotent.
    pub fn apply_reactions(
        &mut self,
        message_id: &MessageId,
        reactions: std::collections::BTreeMap<String, std::collections::BTreeSet<UserId>>,
    ) -> bool {
        if let Some(i) = self.position_by_server_id(message_id) {
            if self.entries[i].reactions != reactions {
                self.entries[i].reactions = reactions;
                return true;
            }
        }
        false
    }

    pub fn apply_moderation(&mut self, message_id: &MessageId, moderation: Moderation) -> bool {
        if let Some(i) = self.position_by_server_id(message_id) {
            self.entries[i].moderation = moderation;
            true
        } else {
            false
        }
    }

    /// Point an attachment at its resolved URI (server canonical URL or a
    /// local cache path). A resolved URI never regresses to a transient one.
    pub fn resolve_attachment(&mut self, message_id: &str, url: &str) -> bool {
        let id = MessageId(message_id.to_string());
        let Some(i) = self.position_by_server_id(&id) else {
            return false;
        };
        let entry = &mut self.entries[i];
        let Some(att) = entry.attachment.as_mut() else {
            return false;
        };
        if !att.is_transient() {
            return false;
        }
        att.file_url = url.to_string();
        entry.bump_status(MessageStatus::Sent);
        true
    }

    /// Merge REST history into the live timeline without duplicating
    /// entries already present.
    pub fn hydrate(&mut self, history: Vec<MessagePayload>) -> bool {
        let mut changed = false;
        for payload in history {
            if self.apply_broadcast(payload) {
                changed = true;
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn position_confirmed(&self, id: &MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| m.id.as_confirmed() == Some(id))
    }

    fn position_pending(&self, temp_id: &TempId) -> Option<usize> {
        self.entries
            .iter()
            .position(|m| m.id.as_pending() == Some(temp_id))
    }

    /// Find an entry by its server id, following the temp alias if the ack
    /// has not been folded in yet.
    fn position_by_server_id(&self, id: &MessageId) -> Option<usize> {
        self.position_confirmed(id).or_else(|| {
            self.aliases
                .get(id)
                .and_then(|temp| self.position_pending(temp))
        })
    }

    fn position_matching_upload(&self, payload: &MessagePayload) -> Option<usize> {
        let file_name = payload.attachment.as_ref().map(|a| a.file_name.as_str());
        self.entries.iter().position(|m| {
            !m.id.is_confirmed()
                && m.sender == self.local_user
                && m.kind == payload.kind
                && m.attachment.as_ref().map(|a| a.file_name.as_str()) == file_name
        })
    }

    fn insert_ordered(&mut self, message: Message) {
        let pos = self
            .entries
            .iter()
            .rposition(|m| m.timestamp <= message.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        self.entries.insert(pos, message);
    }

    /// Idempotent merge of a broadcast into an already-confirmed entry.
    fn merge_confirmed(&mut self, i: usize, payload: MessagePayload) -> bool {
        let before = self.entries[i].clone();
        let entry = &mut self.entries[i];

        entry.bump_status(payload.status);
        entry.content = payload.content;
        entry.edited = entry.edited || payload.edited;
        if payload.total_recipients > 0 {
            entry.total_recipients = payload.total_recipients;
        }
        if !payload.reactions.is_empty() {
            entry.reactions = payload.reactions;
        }
        for receipt in payload.read_by {
            if receipt.user_id != entry.sender
                && !entry.read_by.iter().any(|r| r.user_id == receipt.user_id)
            {
                entry.read_by.push(receipt);
            }
        }
        if let (Some(att), Some(server_att)) =
            (entry.attachment.as_mut(), payload.attachment.as_ref())
        {
            if att.is_transient() && !server_att.is_transient() {
                att.file_url = server_att.file_url.clone();
            }
        }
        if let Some(status) = status_from_receipts(entry.read_count(), entry.total_recipients)
        {
            entry.bump_status(status);
        }

        *entry != before
    }

    /// Replace a pending entry with the server-confirmed copy, preserving
    /// client-only preview fields the server copy lacks.
    fn confirm_pending(&mut self, i: usize, payload: MessagePayload) -> bool {
        let temp_entry = self.entries.remove(i);
        if let Some(temp_id) = temp_entry.id.as_pending() {
            self.aliases.insert(payload.id.clone(), temp_id.clone());
        }

        let mut merged = Message::from_payload(payload);
        merged.bump_status(MessageStatus::Sent);
        if merged.status < temp_entry.status {
            merged.status = temp_entry.status;
        }
        if let (Some(att), Some(temp_att)) =
            (merged.attachment.as_mut(), temp_entry.attachment.as_ref())
        {
            if att.is_transient() && !temp_att.file_url.is_empty() {
                att.file_url = temp_att.file_url.clone();
            }
        }

        debug!(id = %merged.id, "Pending entry confirmed");
        self.insert_ordered(merged);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_shared::model::{Attachment, MessageKind};
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn room() -> ConversationKey {
        ConversationKey::community("lobby")
    }

    fn me() -> UserId {
        UserId("alice".into())
    }

    fn timeline() -> Timeline {
        Timeline::new(room(), me())
    }

    fn local_text(temp: &TempId, content: &str) -> Message {
        Message::outgoing(
            temp.clone(),
            room(),
            me(),
            "Alice".into(),
            content.into(),
            MessageKind::Text,
            None,
            None,
        )
    }

    fn broadcast(id: &str, sender: &str, content: &str) -> MessagePayload {
        MessagePayload {
            id: MessageId(id.into()),
            room: room(),
            sender: UserId(sender.into()),
            sender_name: sender.into(),
            content: content.into(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            attachment: None,
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            total_recipients: 3,
            reply_to: None,
            reactions: BTreeMap::new(),
            edited: false,
        }
    }

    fn receipt(msg: &str, user: &str) -> ReceiptEntry {
        ReceiptEntry {
            message_id: MessageId(msg.into()),
            user_id: UserId(user.into()),
            read_at: Utc::now(),
        }
    }

    #[test]
    fn test_broadcast_before_ack_leaves_one_entry() {
        let mut tl = timeline();
        let temp = TempId::generate();

        tl.insert_local(local_text(&temp, "hello"));
        assert_eq!(tl.len(), 1);

        // Broadcast for M1 arrives before the ack: inserted as confirmed.
        tl.apply_broadcast(broadcast("M1", "alice", "hello"));
        assert_eq!(tl.len(), 2);

        // Late ack collapses the pair.
        tl.apply_ack(MessageId("M1".into()), temp);
        assert_eq!(tl.len(), 1);

        let entry = &tl.messages()[0];
        assert_eq!(entry.id.as_confirmed(), Some(&MessageId("M1".into())));
        assert_eq!(entry.content, "hello");
        assert_eq!(entry.status, MessageStatus::Sent);
    }

    #[test]
    fn test_ack_before_broadcast_leaves_one_entry() {
        let mut tl = timeline();
        let temp = TempId::generate();

        tl.insert_local(local_text(&temp, "hello"));
        tl.apply_ack(MessageId("M1".into()), temp);
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.messages()[0].status, MessageStatus::Sent);

        tl.apply_broadcast(broadcast("M1", "alice", "hello"));
        assert_eq!(tl.len(), 1);
        assert_eq!(
            tl.messages()[0].id.as_confirmed(),
            Some(&MessageId("M1".into()))
        );
    }

    #[test]
    fn test_replayed_broadcast_is_idempotent() {
        let mut tl = timeline();
        let mut payload = broadcast("M1", "bob", "yo");
        let mut reactions = BTreeMap::new();
        reactions.insert(
            "🔥".to_string(),
            BTreeSet::from([UserId("carol".into())]),
        );
        payload.reactions = reactions;

        assert!(tl.apply_broadcast(payload.clone()));
        assert!(!tl.apply_broadcast(payload));
        assert_eq!(tl.len(), 1);
        assert_eq!(tl.messages()[0].reactions["🔥"].len(), 1);
    }

    #[test]
    fn test_replayed_ack_is_idempotent() {
        let mut tl = timeline();
        let temp = TempId::generate();
        tl.insert_local(local_text(&temp, "hi"));

        assert!(tl.apply_ack(MessageId("M1".into()), temp.clone()));
        assert!(!tl.apply_ack(MessageId("M1".into()), temp));
        assert_eq!(tl.len(), 1);
    }

    #[test]
    fn test_status_never_moves_backward() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "bob", "yo"));

        assert!(tl.apply_status(&MessageId("M1".into()), MessageStatus::Delivered));
        assert!(!tl.apply_status(&MessageId("M1".into()), MessageStatus::Sent));
        assert_eq!(tl.messages()[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn test_status_event_matches_pending_entry_through_alias() {
        let mut tl = timeline();
        let temp = TempId::generate();
        tl.insert_local(local_text(&temp, "hi"));
        tl.apply_ack(MessageId("M1".into()), temp);

        // A later event references the server id; the alias map routes it.
        assert!(tl.apply_status(&MessageId("M1".into()), MessageStatus::Read));
        assert_eq!(tl.messages()[0].status, MessageStatus::Read);
    }

    #[test]
    fn test_group_read_progression() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "alice", "news"));
        assert_eq!(tl.messages()[0].total_recipients, 3);
        assert_eq!(tl.messages()[0].status, MessageStatus::Sent);

        tl.apply_receipts(&[receipt("M1", "bob")]);
        assert_eq!(tl.messages()[0].status, MessageStatus::Delivered);

        tl.apply_receipts(&[receipt("M1", "carol"), receipt("M1", "dave")]);
        assert_eq!(tl.messages()[0].status, MessageStatus::Read);
        assert_eq!(tl.messages()[0].read_count(), 3);
    }

    #[test]
    fn test_duplicate_receipts_do_not_double_count() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "alice", "news"));

        tl.apply_receipts(&[receipt("M1", "bob")]);
        tl.apply_receipts(&[receipt("M1", "bob")]);
        assert_eq!(tl.messages()[0].read_count(), 1);
        assert_eq!(tl.messages()[0].status, MessageStatus::Delivered);
    }

    #[test]
    fn test_sender_receipt_is_ignored() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "alice", "news"));
        tl.apply_receipts(&[receipt("M1", "alice")]);
        assert_eq!(tl.messages()[0].read_count(), 0);
    }

    #[test]
    fn test_failed_send_is_removed() {
        let mut tl = timeline();
        let temp = TempId::generate();
        tl.insert_local(local_text(&temp, "oops"));

        assert!(tl.remove_failed(&temp));
        assert!(tl.is_empty());
        assert!(!tl.remove_failed(&temp));
    }

    #[test]
    fn test_attachment_echo_matches_upload_job_before_ack() {
        let mut tl = timeline();
        let temp = TempId::generate();

        let mut local = local_text(&temp, "");
        local.kind = MessageKind::Image;
        local.attachment = Some(Attachment {
            file_url: "file:///tmp/cat.jpg".into(),
            file_name: "cat.jpg".into(),
            file_size: 2048,
            duration: None,
        });
        tl.insert_local(local);

        let mut payload = broadcast("M9", "alice", "");
        payload.kind = MessageKind::Image;
        payload.attachment = Some(Attachment {
            file_url: String::new(),
            file_name: "cat.jpg".into(),
            file_size: 2048,
            duration: None,
        });

        tl.apply_broadcast(payload);
        assert_eq!(tl.len(), 1);

        let entry = &tl.messages()[0];
        assert_eq!(entry.id.as_confirmed(), Some(&MessageId("M9".into())));
        // The local preview survives until a resolved URL replaces it.
        assert_eq!(
            entry.attachment.as_ref().unwrap().file_url,
            "file:///tmp/cat.jpg"
        );

        assert!(tl.resolve_attachment("M9", "/cache/image_M9.jpg"));
        assert_eq!(
            tl.messages()[0].attachment.as_ref().unwrap().file_url,
            "/cache/image_M9.jpg"
        );

        // A resolved URL never regresses.
        assert!(!tl.resolve_attachment("M9", "file:///tmp/other.jpg"));
        assert_eq!(
            tl.messages()[0].attachment.as_ref().unwrap().file_url,
            "/cache/image_M9.jpg"
        );
    }

    #[test]
    fn test_delete_single_bulk_and_cleared() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "bob", "one"));
        tl.apply_broadcast(broadcast("M2", "bob", "two"));
        tl.apply_broadcast(broadcast("M3", "bob", "three"));

        assert!(tl.apply_delete(&DeletePayload {
            message_id: Some(MessageId("M2".into())),
            message_ids: Vec::new(),
            cleared: false,
            scope: banter_shared::model::DeleteScope::Everyone,
        }));
        assert_eq!(tl.len(), 2);

        assert!(tl.apply_delete(&DeletePayload {
            message_id: None,
            message_ids: vec![MessageId("M1".into()), MessageId("M3".into())],
            cleared: false,
            scope: banter_shared::model::DeleteScope::Me,
        }));
        assert!(tl.is_empty());

        tl.apply_broadcast(broadcast("M4", "bob", "four"));
        assert!(tl.apply_delete(&DeletePayload {
            message_id: None,
            message_ids: Vec::new(),
            cleared: true,
            scope: banter_shared::model::DeleteScope::Me,
        }));
        assert!(tl.is_empty());
    }

    #[test]
    fn test_edit_and_moderation() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "bob", "original"));

        assert!(tl.apply_edit(&MessageId("M1".into()), "edited".into()));
        assert_eq!(tl.messages()[0].content, "edited");
        assert!(tl.messages()[0].edited);

        assert!(tl.apply_moderation(&MessageId("M1".into()), Moderation::Blocked));
        assert_eq!(tl.messages()[0].moderation, Moderation::Blocked);
    }

    #[test]
    fn test_reaction_replacement_is_idempotent() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "bob", "yo"));

        let mut reactions = BTreeMap::new();
        reactions.insert(
            "👍".to_string(),
            BTreeSet::from([UserId("carol".into()), UserId("dave".into())]),
        );

        assert!(tl.apply_reactions(&MessageId("M1".into()), reactions.clone()));
        assert!(!tl.apply_reactions(&MessageId("M1".into()), reactions));
        assert_eq!(tl.messages()[0].reactions["👍"].len(), 2);
    }

    #[test]
    fn test_hydrate_skips_live_entries() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M2", "bob", "live"));

        let history = vec![
            broadcast("M1", "bob", "old"),
            broadcast("M2", "bob", "live"),
        ];
        tl.hydrate(history);

        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn test_unread_ids_exclude_own_and_already_read() {
        let mut tl = timeline();
        tl.apply_broadcast(broadcast("M1", "bob", "unread"));
        tl.apply_broadcast(broadcast("M2", "alice", "mine"));

        let mut read = broadcast("M3", "bob", "read");
        read.read_by.push(ReadReceipt {
            user_id: me(),
            read_at: Utc::now(),
        });
        tl.apply_broadcast(read);

        assert_eq!(tl.unread_ids(), vec![MessageId("M1".into())]);
    }

    #[test]
    fn test_entries_stay_timestamp_ordered() {
        let mut tl = timeline();
        let mut late = broadcast("M2", "bob", "late");
        let mut early = broadcast("M1", "bob", "early");
        early.timestamp = late.timestamp - chrono::Duration::seconds(10);

        tl.apply_broadcast(late);
        tl.apply_broadcast(early);

        assert_eq!(tl.messages()[0].content, "early");
        assert_eq!(tl.messages()[1].content, "late");
    }
}
