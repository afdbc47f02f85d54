//! In-memory reference store behind the hub's persistence callbacks.
//!
//! The real application persists chat state in a relational database; that
//! layer is outside this repository. This store stands in for it in the
//! server binary and the integration tests: it assigns message ids,
//! enforces the delivery/seen rules the callbacks promise, and records
//! last-seen times. Like the hub, it is ephemeral.

use beacon_core::{CallbackError, DeliveryReceipt, HubCallbacks, PersistedMessage, SeenReceipt};
use beacon_protocol::{MessageId, UserId};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct StoredMessage {
    from: UserId,
    to: UserId,
    delivered_at: Option<String>,
    seen_at: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: MessageId,
    // BTreeMap keeps conversation scans in id order.
    messages: BTreeMap<MessageId, StoredMessage>,
    last_seen: HashMap<UserId, String>,
}

/// An in-memory message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a message, assigning its id and timestamp.
    pub fn persist_message(&self, from: UserId, to: UserId) -> PersistedMessage {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        inner.next_id += 1;
        let id = inner.next_id;
        let sent_at = Utc::now().to_rfc3339();
        inner.messages.insert(
            id,
            StoredMessage {
                from,
                to,
                delivered_at: None,
                seen_at: None,
            },
        );
        PersistedMessage { id, sent_at }
    }

    /// Mark a message delivered to its recipient.
    ///
    /// # Errors
    ///
    /// Fails when the message does not exist, the caller is not its
    /// recipient, or it was already acknowledged — so repeated acks from
    /// the client produce no duplicate events.
    pub fn mark_delivered(
        &self,
        receiver: UserId,
        message_id: MessageId,
    ) -> Result<DeliveryReceipt, CallbackError> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(CallbackError::NotFound)?;
        if message.to != receiver {
            return Err(CallbackError::Conflict("receiver mismatch".into()));
        }
        if message.delivered_at.is_some() {
            return Err(CallbackError::Conflict("already delivered".into()));
        }
        let delivered_at = Utc::now().to_rfc3339();
        message.delivered_at = Some(delivered_at.clone());
        Ok(DeliveryReceipt {
            sender_id: message.from,
            delivered_at,
        })
    }

    /// Mark every unseen message from `other` to `viewer` seen.
    ///
    /// Returns `None` when nothing was pending, otherwise the highest
    /// marked id.
    pub fn mark_seen(&self, viewer: UserId, other: UserId) -> Option<SeenReceipt> {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let seen_at = Utc::now().to_rfc3339();
        let mut seen_up_to_id = None;
        for (id, message) in inner.messages.iter_mut() {
            if message.from == other && message.to == viewer && message.seen_at.is_none() {
                message.seen_at = Some(seen_at.clone());
                seen_up_to_id = Some(*id);
            }
        }
        seen_up_to_id.map(|seen_up_to_id| SeenReceipt {
            seen_up_to_id,
            seen_at,
        })
    }

    /// Record a user's last-seen time on their offline transition.
    pub fn record_offline(&self, user_id: UserId) -> String {
        let mut inner = self.inner.lock().expect("store lock poisoned");
        let last_seen = Utc::now().to_rfc3339();
        inner.last_seen.insert(user_id, last_seen.clone());
        last_seen
    }

    /// A user's recorded last-seen time, if they have ever gone offline.
    #[must_use]
    pub fn last_seen(&self, user_id: UserId) -> Option<String> {
        let inner = self.inner.lock().expect("store lock poisoned");
        inner.last_seen.get(&user_id).cloned()
    }

    /// Wire this store into a full set of hub callbacks.
    #[must_use]
    pub fn callbacks(self: &Arc<Self>) -> HubCallbacks {
        let persist = Arc::clone(self);
        let deliver = Arc::clone(self);
        let see = Arc::clone(self);
        let offline = Arc::clone(self);

        HubCallbacks::new()
            .on_message(move |from, to, _content| {
                let store = Arc::clone(&persist);
                async move { Ok(store.persist_message(from, to)) }
            })
            .on_delivered(move |receiver, message_id| {
                let store = Arc::clone(&deliver);
                async move { store.mark_delivered(receiver, message_id) }
            })
            .on_seen(move |viewer, other| {
                let store = Arc::clone(&see);
                async move { Ok(store.mark_seen(viewer, other)) }
            })
            .on_offline(move |user_id| {
                let store = Arc::clone(&offline);
                async move { Ok(store.record_offline(user_id)) }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let first = store.persist_message(1, 2);
        let second = store.persist_message(1, 2);
        assert_eq!(second.id, first.id + 1);
    }

    #[test]
    fn test_mark_delivered_rules() {
        let store = MemoryStore::new();
        let msg = store.persist_message(1, 2);

        // Wrong receiver.
        assert!(matches!(
            store.mark_delivered(3, msg.id),
            Err(CallbackError::Conflict(_))
        ));
        // Unknown message.
        assert!(matches!(
            store.mark_delivered(2, 999),
            Err(CallbackError::NotFound)
        ));

        let receipt = store.mark_delivered(2, msg.id).unwrap();
        assert_eq!(receipt.sender_id, 1);

        // Second ack is rejected.
        assert!(matches!(
            store.mark_delivered(2, msg.id),
            Err(CallbackError::Conflict(_))
        ));
    }

    #[test]
    fn test_mark_seen_covers_pending_range() {
        let store = MemoryStore::new();
        let first = store.persist_message(1, 2);
        let second = store.persist_message(1, 2);
        store.persist_message(2, 1); // opposite direction, untouched

        let receipt = store.mark_seen(2, 1).unwrap();
        assert_eq!(receipt.seen_up_to_id, second.id);
        assert!(first.id < receipt.seen_up_to_id);

        // Nothing pending anymore.
        assert!(store.mark_seen(2, 1).is_none());
        // The opposite direction still is.
        assert!(store.mark_seen(1, 2).is_some());
    }

    #[test]
    fn test_record_offline_keeps_last_seen() {
        let store = MemoryStore::new();
        assert!(store.last_seen(1).is_none());
        let stamp = store.record_offline(1);
        assert_eq!(store.last_seen(1), Some(stamp));
    }
}
