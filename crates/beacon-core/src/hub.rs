//! The event router at the center of Beacon.
//!
//! The hub is a single-owner actor: exactly one task owns the routing table
//! and presence roster and processes register/unregister/route commands
//! strictly in submission order from an inbound queue. The hot mutation path
//! therefore needs no general-purpose lock; a short-held `RwLock` exists
//! only because [`Hub::send_to_user`] and [`Hub::broadcast_all`] may read
//! the table from arbitrary tasks.
//!
//! Backpressure policy: a full outbound queue is a presumed-dead client.
//! `send_to_user` evicts such connections by submitting an asynchronous
//! unregister command (never re-entering hub state inline); broadcast
//! passes skip them silently and trigger no eviction.

use crate::callbacks::HubCallbacks;
use crate::connection::{ConnectionHandle, ConnectionId, EnqueueOutcome, DEFAULT_SEND_QUEUE_CAPACITY};
use crate::presence::Roster;
use crate::session::Session;
use beacon_protocol::{ServerEvent, UserId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound event queue.
    pub send_queue_capacity: usize,
    /// Minimum interval between forwarded typing signals per connection.
    pub typing_min_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            typing_min_interval: Duration::from_millis(200),
        }
    }
}

/// Commands processed one at a time by the hub task.
enum Command {
    Register(ConnectionHandle),
    Unregister {
        connection_id: ConnectionId,
        user_id: UserId,
    },
    Route(ServerEvent),
    Quiesce(oneshot::Sender<()>),
}

/// Routing state, exclusively mutated by the hub task.
#[derive(Default)]
struct RoutingTable {
    /// Live connections grouped by user. Invariant: a connection appears in
    /// exactly one set, and a user's entry is removed when its set empties.
    connections: HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    /// Invariant: the roster count for a user equals their set's size.
    roster: Roster,
}

struct HubInner {
    table: RwLock<RoutingTable>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    callbacks: HubCallbacks,
    config: HubConfig,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Number of online users.
    pub online_users: usize,
    /// Number of live connections.
    pub connections: usize,
}

/// Cheaply cloneable handle to the hub actor.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    /// Spawn the hub task and return a handle to it.
    ///
    /// The task runs for as long as any `Hub` handle is alive.
    #[must_use]
    pub fn spawn(config: HubConfig, callbacks: HubCallbacks) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(HubInner {
            table: RwLock::new(RoutingTable::default()),
            cmd_tx,
            callbacks,
            config,
        });
        tokio::spawn(run(Arc::clone(&inner), cmd_rx));
        Self { inner }
    }

    /// The configuration this hub was spawned with.
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub(crate) fn callbacks(&self) -> &HubCallbacks {
        &self.inner.callbacks
    }

    /// Register a new connection for an authenticated user.
    ///
    /// Returns the connection's protocol [`Session`] and the receiver its
    /// write pump drains. The hub sends a presence snapshot to the new
    /// connection and, if this is the user's first connection, broadcasts
    /// an online transition to everyone else.
    #[must_use]
    pub fn attach(&self, user_id: UserId) -> (Session, mpsc::Receiver<Arc<ServerEvent>>) {
        let (handle, rx) = ConnectionHandle::new(user_id, self.inner.config.send_queue_capacity);
        let session = Session::new(self.clone(), handle.id(), user_id);
        self.submit(Command::Register(handle));
        (session, rx)
    }

    /// Submit an unregister command for a connection.
    ///
    /// Idempotent: unregistering a connection that is already gone is a
    /// no-op.
    pub fn unregister(&self, connection_id: ConnectionId, user_id: UserId) {
        self.submit(Command::Unregister {
            connection_id,
            user_id,
        });
    }

    /// Submit an event for routing.
    ///
    /// Chat messages go to every live connection of both parties (once when
    /// self-addressed); delivered/seen acknowledgments go back to the
    /// original sender only; typing goes to the named recipient; presence
    /// events are broadcast.
    pub fn route(&self, event: ServerEvent) {
        self.submit(Command::Route(event));
    }

    /// Enqueue an event onto every live connection of one user.
    ///
    /// Returns the number of connections that accepted it. Connections
    /// whose queue is full or closed are evicted asynchronously.
    pub fn send_to_user(&self, user_id: UserId, event: Arc<ServerEvent>) -> usize {
        send_to_user(&self.inner, user_id, event)
    }

    /// Enqueue an event onto every registered connection, best effort.
    ///
    /// Saturated connections are skipped silently; a broadcast pass never
    /// evicts.
    pub fn broadcast_all(&self, event: Arc<ServerEvent>) -> usize {
        broadcast(&self.inner, None, event)
    }

    /// Whether a user currently has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.read_table().roster.is_online(user_id)
    }

    /// Point-in-time list of online user ids.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        self.read_table().roster.online_users()
    }

    /// Hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let table = self.read_table();
        HubStats {
            online_users: table.roster.online_count(),
            connections: table.connections.values().map(HashMap::len).sum(),
        }
    }

    /// Wait until every command submitted before this call has been
    /// processed. Routing state observed afterwards is quiescent with
    /// respect to those commands.
    pub async fn quiesce(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Quiesce(tx));
        // Only fails if the hub task is gone, which cannot outlive `self`.
        let _ = rx.await;
    }

    fn submit(&self, command: Command) {
        // The receiver lives in the hub task, which holds an Arc to inner;
        // it cannot be gone while this handle exists.
        let _ = self.inner.cmd_tx.send(command);
    }

    fn read_table(&self) -> std::sync::RwLockReadGuard<'_, RoutingTable> {
        self.inner.table.read().expect("routing table lock poisoned")
    }
}

/// The hub task: processes commands strictly in submission order, forever.
async fn run(inner: Arc<HubInner>, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
    debug!("hub task started");
    while let Some(command) = cmd_rx.recv().await {
        match command {
            Command::Register(handle) => register(&inner, handle),
            Command::Unregister {
                connection_id,
                user_id,
            } => unregister(&inner, connection_id, user_id).await,
            Command::Route(event) => route(&inner, event),
            Command::Quiesce(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("hub task stopped");
}

fn register(inner: &HubInner, handle: ConnectionHandle) {
    let user_id = handle.user_id();
    let connection_id = handle.id();
    let private = handle.clone();

    let (went_online, snapshot) = {
        let mut table = inner.table.write().expect("routing table lock poisoned");
        let went_online = table.roster.join(user_id);
        table
            .connections
            .entry(user_id)
            .or_default()
            .insert(connection_id, handle);
        (went_online, table.roster.online_users())
    };

    debug!(connection = connection_id, user = user_id, "connection registered");

    // Side effects happen outside the write lock.
    let _ = private.try_send(Arc::new(ServerEvent::presence_snapshot(snapshot)));
    if went_online {
        broadcast(
            inner,
            Some(connection_id),
            Arc::new(ServerEvent::presence(user_id, true, None)),
        );
    }
}

async fn unregister(inner: &HubInner, connection_id: ConnectionId, user_id: UserId) {
    let went_offline = {
        let mut table = inner.table.write().expect("routing table lock poisoned");
        let removed = match table.connections.get_mut(&user_id) {
            Some(set) => {
                // Dropping the handle here drops the last sender, closing
                // the outbound queue and terminating the write pump.
                let removed = set.remove(&connection_id).is_some();
                if set.is_empty() {
                    table.connections.remove(&user_id);
                }
                removed
            }
            None => false,
        };
        removed && table.roster.leave(user_id)
    };

    debug!(connection = connection_id, user = user_id, "connection unregistered");

    if went_offline {
        let last_seen = match &inner.callbacks.offline {
            Some(callback) => match callback(user_id).await {
                Ok(timestamp) => Some(timestamp),
                Err(error) => {
                    warn!(user = user_id, %error, "offline callback failed");
                    None
                }
            },
            None => None,
        };
        broadcast(
            inner,
            None,
            Arc::new(ServerEvent::presence(user_id, false, last_seen)),
        );
    }
}

fn route(inner: &HubInner, event: ServerEvent) {
    let event = Arc::new(event);
    match &*event {
        ServerEvent::Message {
            from_user_id,
            to_user_id,
            ..
        } => {
            let (from, to) = (*from_user_id, *to_user_id);
            send_to_user(inner, from, Arc::clone(&event));
            if to != from {
                send_to_user(inner, to, event);
            }
        }
        ServerEvent::Delivered { from_user_id, .. } | ServerEvent::Seen { from_user_id, .. } => {
            send_to_user(inner, *from_user_id, event);
        }
        ServerEvent::Typing { to_user_id, .. } => {
            send_to_user(inner, *to_user_id, event);
        }
        ServerEvent::Presence { .. } | ServerEvent::PresenceSnapshot { .. } => {
            broadcast(inner, None, event);
        }
    }
}

fn send_to_user(inner: &HubInner, user_id: UserId, event: Arc<ServerEvent>) -> usize {
    let mut sent = 0;
    let mut dead: Vec<ConnectionId> = Vec::new();
    {
        let table = inner.table.read().expect("routing table lock poisoned");
        let Some(set) = table.connections.get(&user_id) else {
            return 0;
        };
        for handle in set.values() {
            match handle.try_send(Arc::clone(&event)) {
                EnqueueOutcome::Sent => sent += 1,
                EnqueueOutcome::Full | EnqueueOutcome::Closed => dead.push(handle.id()),
            }
        }
    }
    // Evict outside the lock, through the command queue.
    for connection_id in dead {
        warn!(
            connection = connection_id,
            user = user_id,
            "outbound queue saturated, evicting connection"
        );
        let _ = inner.cmd_tx.send(Command::Unregister {
            connection_id,
            user_id,
        });
    }
    sent
}

fn broadcast(inner: &HubInner, skip: Option<ConnectionId>, event: Arc<ServerEvent>) -> usize {
    let table = inner.table.read().expect("routing table lock poisoned");
    let mut sent = 0;
    for set in table.connections.values() {
        for handle in set.values() {
            if skip == Some(handle.id()) {
                continue;
            }
            match handle.try_send(Arc::clone(&event)) {
                EnqueueOutcome::Sent => sent += 1,
                EnqueueOutcome::Full | EnqueueOutcome::Closed => {
                    trace!(connection = handle.id(), "broadcast skipped saturated connection");
                }
            }
        }
    }
    sent
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hub() -> Hub {
        Hub::spawn(HubConfig::default(), HubCallbacks::new())
    }

    #[tokio::test]
    async fn test_register_sends_snapshot_privately() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        hub.quiesce().await;

        match rx1.recv().await.unwrap().as_ref() {
            ServerEvent::PresenceSnapshot { online_user_ids } => {
                assert_eq!(online_user_ids, &vec![1]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_first_connection_broadcasts_online_to_others_only() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        hub.quiesce().await;
        let _ = rx1.recv().await.unwrap(); // own snapshot

        let (_s2, mut rx2) = hub.attach(2);
        hub.quiesce().await;

        // User 1 sees user 2 come online.
        match rx1.recv().await.unwrap().as_ref() {
            ServerEvent::Presence { user_id, online, .. } => {
                assert_eq!(*user_id, 2);
                assert!(*online);
            }
            other => panic!("expected presence, got {other:?}"),
        }

        // User 2 gets only its snapshot, not its own online broadcast.
        match rx2.recv().await.unwrap().as_ref() {
            ServerEvent::PresenceSnapshot { online_user_ids } => {
                assert_eq!(online_user_ids, &vec![1, 2]);
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_tab_causes_no_online_broadcast() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        hub.quiesce().await;
        let _ = rx1.recv().await.unwrap(); // snapshot

        let (_s1b, mut rx1b) = hub.attach(1);
        hub.quiesce().await;

        // Second tab gets its snapshot; first tab sees nothing new.
        assert!(matches!(
            rx1b.recv().await.unwrap().as_ref(),
            ServerEvent::PresenceSnapshot { .. }
        ));
        assert!(rx1.try_recv().is_err());
        assert_eq!(hub.stats(), HubStats { online_users: 1, connections: 2 });
    }

    #[tokio::test]
    async fn test_counter_matches_connection_sets() {
        let hub = test_hub();
        let (s1, _rx1) = hub.attach(1);
        let (s1b, _rx1b) = hub.attach(1);
        let (s2, _rx2) = hub.attach(2);
        hub.quiesce().await;

        let stats = hub.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.online_users, 2);

        drop(s1b);
        hub.quiesce().await;
        assert!(hub.is_online(1));

        drop(s1);
        drop(s2);
        hub.quiesce().await;
        assert_eq!(hub.stats(), HubStats { online_users: 0, connections: 0 });
    }

    #[tokio::test]
    async fn test_message_routed_to_both_parties_once_each() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        let (_s2, mut rx2) = hub.attach(2);
        hub.quiesce().await;
        let _ = rx1.recv().await.unwrap(); // snapshot
        let _ = rx1.recv().await.unwrap(); // user 2 online
        let _ = rx2.recv().await.unwrap(); // snapshot

        hub.route(ServerEvent::Message {
            id: 10,
            from_user_id: 1,
            to_user_id: 2,
            content: "hi".into(),
            sent_at: "2026-01-01T00:00:00Z".into(),
            seen: false,
            temp_id: None,
        });
        hub.quiesce().await;

        assert!(matches!(
            rx1.recv().await.unwrap().as_ref(),
            ServerEvent::Message { id: 10, .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap().as_ref(),
            ServerEvent::Message { id: 10, .. }
        ));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_self_addressed_message_delivered_once() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        hub.quiesce().await;
        let _ = rx1.recv().await.unwrap(); // snapshot

        hub.route(ServerEvent::Message {
            id: 11,
            from_user_id: 1,
            to_user_id: 1,
            content: "note to self".into(),
            sent_at: "2026-01-01T00:00:00Z".into(),
            seen: false,
            temp_id: None,
        });
        hub.quiesce().await;

        assert!(matches!(
            rx1.recv().await.unwrap().as_ref(),
            ServerEvent::Message { id: 11, .. }
        ));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_acks_routed_to_sender_only() {
        let hub = test_hub();
        let (_s1, mut rx1) = hub.attach(1);
        let (_s2, mut rx2) = hub.attach(2);
        hub.quiesce().await;
        while rx1.try_recv().is_ok() {}
        while rx2.try_recv().is_ok() {}

        hub.route(ServerEvent::Delivered {
            message_id: 5,
            from_user_id: 1,
            to_user_id: 2,
            delivered_at: "2026-01-01T00:00:00Z".into(),
        });
        hub.quiesce().await;

        assert!(matches!(
            rx1.recv().await.unwrap().as_ref(),
            ServerEvent::Delivered { message_id: 5, .. }
        ));
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_saturated_connection_is_evicted() {
        let hub = Hub::spawn(
            HubConfig {
                send_queue_capacity: 2,
                ..HubConfig::default()
            },
            HubCallbacks::new(),
        );
        let (_s1, mut rx1) = hub.attach(1);
        let (_s2, _rx2_undrained) = hub.attach(2);
        hub.quiesce().await;
        while rx1.try_recv().is_ok() {}

        // User 2's queue holds its snapshot already; fill the rest and
        // overflow without draining.
        for _ in 0..3 {
            hub.send_to_user(2, Arc::new(ServerEvent::typing(1, 2, true)));
        }
        hub.quiesce().await;

        assert!(!hub.is_online(2));
        assert_eq!(hub.stats().connections, 1);

        // User 1 saw the offline transition; no panic anywhere.
        let mut saw_offline = false;
        while let Ok(event) = rx1.try_recv() {
            if let ServerEvent::Presence { user_id: 2, online: false, .. } = event.as_ref() {
                saw_offline = true;
            }
        }
        assert!(saw_offline);
    }

    #[tokio::test]
    async fn test_broadcast_skips_saturated_without_eviction() {
        let hub = Hub::spawn(
            HubConfig {
                send_queue_capacity: 1,
                ..HubConfig::default()
            },
            HubCallbacks::new(),
        );
        let (_s1, _rx1_undrained) = hub.attach(1);
        hub.quiesce().await;

        // Queue already holds the snapshot; broadcast finds it full.
        let sent = hub.broadcast_all(Arc::new(ServerEvent::presence(9, true, None)));
        hub.quiesce().await;

        assert_eq!(sent, 0);
        assert!(hub.is_online(1)); // skipped, not evicted
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = test_hub();
        let (s1, _rx1) = hub.attach(1);
        let (connection_id, user_id) = (s1.connection_id(), s1.user_id());
        hub.quiesce().await;

        hub.unregister(connection_id, user_id);
        hub.unregister(connection_id, user_id);
        hub.quiesce().await;

        assert!(!hub.is_online(1));
        assert_eq!(hub.stats().connections, 0);
    }

    #[tokio::test]
    async fn test_queued_events_drain_after_unregister() {
        let hub = test_hub();
        let (s1, mut rx1) = hub.attach(1);
        hub.quiesce().await;

        hub.send_to_user(1, Arc::new(ServerEvent::typing(2, 1, true)));
        drop(s1);
        hub.quiesce().await;

        // Unregistering closes the queue but does not discard it: events
        // enqueued beforehand still come out in order, then end of stream.
        assert!(matches!(
            rx1.recv().await.unwrap().as_ref(),
            ServerEvent::PresenceSnapshot { .. }
        ));
        assert!(matches!(
            rx1.recv().await.unwrap().as_ref(),
            ServerEvent::Typing { .. }
        ));
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_offline_callback_invoked_once_with_last_seen() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let hub = Hub::spawn(
            HubConfig::default(),
            HubCallbacks::new().on_offline(move |_user| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok("2026-02-02T10:00:00Z".into())
                }
            }),
        );

        let (_s1, mut rx1) = hub.attach(1);
        let (s2, _rx2) = hub.attach(2);
        let (s2b, _rx2b) = hub.attach(2);
        hub.quiesce().await;
        while rx1.try_recv().is_ok() {}

        drop(s2b); // still online, no callback
        drop(s2); // last connection: offline
        hub.quiesce().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match rx1.recv().await.unwrap().as_ref() {
            ServerEvent::Presence {
                user_id: 2,
                online: false,
                last_seen,
            } => assert_eq!(last_seen.as_deref(), Some("2026-02-02T10:00:00Z")),
            other => panic!("expected offline presence, got {other:?}"),
        }
    }
}
