//! Presence and typing tracking for one conversation.
//!
//! The online set is replaced wholesale by roster events and mutated
//! incrementally by join/leave events. Typing is a map keyed by user id so
//! several participants can type at once; the local user's own typing is
//! never reflected back.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use banter_shared::types::UserId;

#[derive(Debug)]
pub struct PresenceTracker {
    local_user: UserId,
    online: HashSet<UserId>,
    typing: HashMap<UserId, String>,
}

impl PresenceTracker {
    pub fn new(local_user: UserId) -> Self {
        Self {
            local_user,
            online: HashSet::new(),
            typing: HashMap::new(),
        }
    }

    /// Replace the online set with the latest full roster.
    pub fn replace_roster(&mut self, users: Vec<UserId>) {
        debug!(count = users.len(), "Online roster replaced");
        self.online = users.into_iter().collect();
        // Anyone no longer online cannot still be typing.
        self.typing.retain(|user, _| self.online.contains(user));
    }

    pub fn on_joined(&mut self, user: UserId) -> bool {
        self.online.insert(user)
    }

    pub fn on_left(&mut self, user: &UserId) -> bool {
        self.typing.remove(user);
        self.online.remove(user)
    }

    /// Record a typing indicator. The local user's own events are ignored.
    pub fn set_typing(&mut self, user: UserId, display_name: String) -> bool {
        if user == self.local_user {
            return false;
        }
        self.typing.insert(user, display_name).is_none()
    }

    pub fn clear_typing(&mut self, user: &UserId) -> bool {
        self.typing.remove(user).is_some()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }

    /// Sorted snapshot of online users.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.online.iter().cloned().collect();
        users.sort();
        users
    }

    /// Sorted snapshot of (user, display name) currently typing.
    pub fn typing_users(&self) -> Vec<(UserId, String)> {
        let mut users: Vec<(UserId, String)> = self
            .typing
            .iter()
            .map(|(u, n)| (u.clone(), n.clone()))
            .collect();
        users.sort();
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(UserId("alice".into()))
    }

    #[test]
    fn test_roster_replaces_wholesale() {
        let mut t = tracker();
        t.on_joined(UserId("bob".into()));
        t.on_joined(UserId("carol".into()));

        t.replace_roster(vec![UserId("dave".into())]);
        assert_eq!(t.online_count(), 1);
        assert!(t.is_online(&UserId("dave".into())));
        assert!(!t.is_online(&UserId("bob".into())));
    }

    #[test]
    fn test_join_and_leave() {
        let mut t = tracker();
        assert!(t.on_joined(UserId("bob".into())));
        assert!(!t.on_joined(UserId("bob".into())));
        assert_eq!(t.online_count(), 1);

        assert!(t.on_left(&UserId("bob".into())));
        assert!(!t.on_left(&UserId("bob".into())));
        assert_eq!(t.online_count(), 0);
    }

    #[test]
    fn test_own_typing_is_ignored() {
        let mut t = tracker();
        assert!(!t.set_typing(UserId("alice".into()), "Alice".into()));
        assert!(t.typing_users().is_empty());

        assert!(t.set_typing(UserId("bob".into()), "Bob".into()));
        assert_eq!(t.typing_users(), vec![(UserId("bob".into()), "Bob".into())]);
    }

    #[test]
    fn test_multiple_simultaneous_typists() {
        let mut t = tracker();
        t.set_typing(UserId("bob".into()), "Bob".into());
        t.set_typing(UserId("carol".into()), "Carol".into());
        assert_eq!(t.typing_users().len(), 2);

        t.clear_typing(&UserId("bob".into()));
        assert_eq!(t.typing_users(), vec![(UserId("carol".into()), "Carol".into())]);
    }

    #[test]
    fn test_leaving_clears_typing() {
        let mut t = tracker();
        t.on_joined(UserId("bob".into()));
        t.set_typing(UserId("bob".into()), "Bob".into());

        t.on_left(&UserId("bob".into()));
        assert!(t.typing_users().is_empty());
    }

    #[test]
    fn test_roster_replacement_clears_stale_typists() {
        let mut t = tracker();
        t.on_joined(UserId("bob".into()));
        t.set_typing(UserId("bob".into()), "Bob".into());

        t.replace_roster(vec![UserId("carol".into())]);
        assert!(t.typing_users().is_empty());
    }
}
