//! Presence tracking for the Beacon hub.
//!
//! The roster counts live connections per user and derives online/offline
//! transitions from the 0→1 and 1→0 edges. It is owned by the hub and
//! mutated only inside the hub's command processing, under the same lock as
//! the routing table, so a user's transitions can never race against their
//! own concurrent connects/disconnects.

use beacon_protocol::UserId;
use std::collections::HashMap;
use tracing::debug;

/// Per-user live-connection counts.
#[derive(Debug, Default)]
pub struct Roster {
    counts: HashMap<UserId, usize>,
}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one more live connection for a user.
    ///
    /// Returns `true` if the user just came online (count went 0→1).
    pub fn join(&mut self, user_id: UserId) -> bool {
        let count = self.counts.entry(user_id).or_insert(0);
        *count += 1;
        if *count == 1 {
            debug!(user = user_id, "presence: user online");
            true
        } else {
            false
        }
    }

    /// Record one fewer live connection for a user.
    ///
    /// Returns `true` if the user just went offline (count went 1→0).
    /// Leaving a user with no recorded connections is a no-op.
    pub fn leave(&mut self, user_id: UserId) -> bool {
        match self.counts.get_mut(&user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&user_id);
                debug!(user = user_id, "presence: user offline");
                true
            }
            None => false,
        }
    }

    /// Number of live connections for a user.
    #[must_use]
    pub fn connections(&self, user_id: UserId) -> usize {
        self.counts.get(&user_id).copied().unwrap_or(0)
    }

    /// Whether a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.counts.contains_key(&user_id)
    }

    /// Point-in-time list of online user ids, sorted for determinism.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.counts.keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// Number of online users.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.counts.len()
    }

    /// Check if nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_transitions() {
        let mut roster = Roster::new();

        assert!(roster.join(1)); // 0 -> 1: online
        assert!(!roster.join(1)); // second tab, no transition
        assert_eq!(roster.connections(1), 2);
        assert!(roster.is_online(1));

        assert!(!roster.leave(1)); // 2 -> 1, still online
        assert!(roster.leave(1)); // 1 -> 0: offline
        assert!(!roster.is_online(1));
        assert_eq!(roster.connections(1), 0);
    }

    #[test]
    fn test_roster_leave_unknown_user() {
        let mut roster = Roster::new();
        assert!(!roster.leave(42));
        assert!(roster.is_empty());
    }

    #[test]
    fn test_roster_online_users_sorted() {
        let mut roster = Roster::new();
        roster.join(3);
        roster.join(1);
        roster.join(2);
        roster.join(2);

        assert_eq!(roster.online_users(), vec![1, 2, 3]);
        assert_eq!(roster.online_count(), 3);
    }
}
