//! Connection handles for the Beacon hub.
//!
//! A connection is one live transport session (one browser tab) tied to one
//! authenticated user. The hub never touches the transport itself; it only
//! holds a [`ConnectionHandle`] wrapping the connection's bounded outbound
//! queue.

use beacon_protocol::{ServerEvent, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A process-unique connection identifier.
pub type ConnectionId = u64;

/// Default capacity of a connection's outbound event queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate the next connection id.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Outcome of a non-blocking enqueue onto a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Event accepted onto the queue.
    Sent,
    /// Queue is at capacity; the client is presumed dead.
    Full,
    /// Queue receiver is gone; the write pump already exited.
    Closed,
}

/// The hub's handle to one live connection.
///
/// The sender side of the outbound queue lives only inside the hub's routing
/// table; removing the handle on unregister drops the last sender, closing
/// the queue and terminating the connection's write pump.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user_id: UserId,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its write pump will drain.
    #[must_use]
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                id: next_connection_id(),
                user_id,
                outbound: tx,
            },
            rx,
        )
    }

    /// This connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The authenticated user this connection belongs to.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Attempt a non-blocking enqueue of an event.
    ///
    /// Never blocks; a full queue is reported, not waited on.
    pub fn try_send(&self, event: Arc<ServerEvent>) -> EnqueueOutcome {
        match self.outbound.try_send(event) {
            Ok(()) => EnqueueOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_unique() {
        let a = next_connection_id();
        let b = next_connection_id();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_try_send_outcomes() {
        let (handle, mut rx) = ConnectionHandle::new(7, 1);
        assert_eq!(handle.user_id(), 7);

        let ev = Arc::new(ServerEvent::typing(1, 7, true));
        assert_eq!(handle.try_send(ev.clone()), EnqueueOutcome::Sent);
        assert_eq!(handle.try_send(ev.clone()), EnqueueOutcome::Full);

        assert!(rx.recv().await.is_some());
        drop(rx);
        assert_eq!(handle.try_send(ev), EnqueueOutcome::Closed);
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_queue() {
        let (handle, mut rx) = ConnectionHandle::new(1, 4);
        drop(handle);
        assert!(rx.recv().await.is_none());
    }
}
