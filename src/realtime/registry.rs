// In-memory connection registry.
//
// Three maps: connection id → connection (which carries its user), user →
// connection ids, topic → subscriber connection ids. All process-local; a
// multi-node deployment would replace this with a broker-backed registry.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Per-connection outbound buffer capacity
pub const OUTBOUND_BUFFER: usize = 32;

/// Outcome of a non-blocking enqueue onto a connection's writer channel
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueResult {
    Sent,
    /// Buffer full; the frame was dropped. Carries the consecutive-overflow
    /// streak so the router can decide to close a persistently slow consumer.
    Overflow(u32),
    /// Writer gone; the connection is stale
    Closed,
}

/// One live realtime connection for one authenticated user on one device
pub struct Connection {
    pub id: Uuid,
    pub user_id: Uuid,
    sender: mpsc::Sender<Arc<str>>,
    shutdown: watch::Sender<bool>,
    overflow_streak: AtomicU32,
    /// Last inbound activity, epoch millis; the writer's ping loop uses this
    /// to detect dead peers
    last_activity_ms: AtomicI64,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    /// Create a connection plus the writer-task side of its channel and
    /// shutdown signal
    pub fn new(user_id: Uuid) -> (Arc<Self>, mpsc::Receiver<Arc<str>>, watch::Receiver<bool>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            sender: tx,
            shutdown: shutdown_tx,
            overflow_streak: AtomicU32::new(0),
            last_activity_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
        });

        (connection, rx, shutdown_rx)
    }

    /// Non-blocking enqueue; a slow consumer drops frames instead of
    /// stalling the router
    pub fn enqueue(&self, payload: Arc<str>) -> EnqueueResult {
        match self.sender.try_send(payload) {
            Ok(()) => {
                self.overflow_streak.store(0, Ordering::Relaxed);
                EnqueueResult::Sent
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                let streak = self.overflow_streak.fetch_add(1, Ordering::Relaxed) + 1;
                EnqueueResult::Overflow(streak)
            },
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueResult::Closed,
        }
    }

    /// Ask the connection's reader and writer tasks to stop
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }
}

/// Presence transition observed by an add/remove, used for
/// user_presence_changed fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// The user's connection count crossed 0↔1
    Changed,
    /// Other devices remain (or already existed)
    Unchanged,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    /// connection id → connection (reverse index; the connection carries its user)
    connections: Arc<DashMap<Uuid, Arc<Connection>>>,
    /// user id → connection ids
    user_connections: Arc<DashMap<Uuid, Vec<Uuid>>>,
    /// topic → subscriber connection ids
    topic_subscribers: Arc<DashMap<String, Vec<Uuid>>>,
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.connections.len())
            .field("user_count", &self.user_connections.len())
            .field("topic_count", &self.topic_subscribers.len())
            .finish()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns Changed when this was the user's first.
    pub fn add_connection(&self, connection: Arc<Connection>) -> PresenceTransition {
        let conn_id = connection.id;
        let user_id = connection.user_id;

        self.connections.insert(conn_id, connection);

        let mut entry = self.user_connections.entry(user_id).or_default();
        let was_empty = entry.is_empty();
        if !entry.contains(&conn_id) {
            entry.push(conn_id);
        }

        if was_empty {
            PresenceTransition::Changed
        } else {
            PresenceTransition::Unchanged
        }
    }

    /// Remove a connection from all maps. Idempotent. Returns the user and
    /// whether this was their last connection (1→0 transition).
    pub fn remove_connection(&self, conn_id: Uuid) -> Option<(Uuid, PresenceTransition)> {
        let (_, connection) = self.connections.remove(&conn_id)?;
        let user_id = connection.user_id;

        let mut went_offline = false;
        if let Some(mut entry) = self.user_connections.get_mut(&user_id) {
            entry.retain(|id| id != &conn_id);
            went_offline = entry.is_empty();
        }
        if went_offline {
            self.user_connections
                .remove_if(&user_id, |_, conns| conns.is_empty());
        }

        for mut topic in self.topic_subscribers.iter_mut() {
            topic.value_mut().retain(|id| id != &conn_id);
        }
        self.topic_subscribers.retain(|_, subs| !subs.is_empty());

        let transition = if went_offline {
            PresenceTransition::Changed
        } else {
            PresenceTransition::Unchanged
        };
        Some((user_id, transition))
    }

    /// Subscribe a connection to a topic (no-op when already subscribed)
    pub fn subscribe(&self, conn_id: Uuid, topic: String) {
        if !self.connections.contains_key(&conn_id) {
            return;
        }
        let mut subs = self.topic_subscribers.entry(topic).or_default();
        if !subs.contains(&conn_id) {
            subs.push(conn_id);
        }
    }

    /// Unsubscribe a connection from a topic
    pub fn unsubscribe(&self, conn_id: Uuid, topic: &str) {
        if let Some(mut subs) = self.topic_subscribers.get_mut(topic) {
            subs.retain(|id| id != &conn_id);
        }
        self.topic_subscribers
            .remove_if(topic, |_, subs| subs.is_empty());
    }

    pub fn get_connection(&self, conn_id: Uuid) -> Option<Arc<Connection>> {
        self.connections.get(&conn_id).map(|c| Arc::clone(&c))
    }

    /// All live connections of one user
    pub fn connections_of(&self, user_id: Uuid) -> Vec<Arc<Connection>> {
        self.user_connections
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id).map(|c| Arc::clone(&c)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All connections subscribed to a topic
    pub fn subscribers_of(&self, topic: &str) -> Vec<Arc<Connection>> {
        self.topic_subscribers
            .get(topic)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id).map(|c| Arc::clone(&c)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every live connection
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|c| Arc::clone(&c)).collect()
    }

    pub fn is_user_online(&self, user_id: Uuid) -> bool {
        self.user_connections
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn topic_count(&self) -> usize {
        self.topic_subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(
        registry: &ConnectionRegistry,
        user_id: Uuid,
    ) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>, PresenceTransition) {
        let (conn, rx, _shutdown) = Connection::new(user_id);
        let transition = registry.add_connection(Arc::clone(&conn));
        (conn, rx, transition)
    }

    #[test]
    fn test_presence_transitions_across_devices() {
        let registry = ConnectionRegistry::new();
        let alice = Uuid::new_v4();

        let (laptop, _rx1, first) = connected(&registry, alice);
        assert_eq!(first, PresenceTransition::Changed);
        assert!(registry.is_user_online(alice));

        let (phone, _rx2, second) = connected(&registry, alice);
        assert_eq!(second, PresenceTransition::Unchanged);

        // Closing one device leaves the user online
        let (_, transition) = registry.remove_connection(laptop.id).unwrap();
        assert_eq!(transition, PresenceTransition::Unchanged);
        assert!(registry.is_user_online(alice));

        // Closing the last device is the 1→0 transition
        let (user, transition) = registry.remove_connection(phone.id).unwrap();
        assert_eq!(user, alice);
        assert_eq!(transition, PresenceTransition::Changed);
        assert!(!registry.is_user_online(alice));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx, _) = connected(&registry, Uuid::new_v4());

        assert!(registry.remove_connection(conn.id).is_some());
        assert!(registry.remove_connection(conn.id).is_none());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_subscribe_unsubscribe_round_trip() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx, _) = connected(&registry, Uuid::new_v4());
        let topic = "post:11111111-2222-3333-4444-555555555555";

        registry.subscribe(conn.id, topic.to_string());
        // Double subscribe stays a single entry
        registry.subscribe(conn.id, topic.to_string());
        assert_eq!(registry.subscribers_of(topic).len(), 1);

        registry.unsubscribe(conn.id, topic);
        assert!(registry.subscribers_of(topic).is_empty());
        // Topic map is back to its original state
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_teardown_clears_subscriptions() {
        let registry = ConnectionRegistry::new();
        let (conn, _rx, _) = connected(&registry, Uuid::new_v4());

        registry.subscribe(conn.id, "post:a".to_string());
        registry.subscribe(conn.id, "post:b".to_string());
        registry.remove_connection(conn.id);

        assert!(registry.subscribers_of("post:a").is_empty());
        assert!(registry.subscribers_of("post:b").is_empty());
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_subscribe_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.subscribe(Uuid::new_v4(), "post:a".to_string());
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn test_enqueue_overflow_and_reset() {
        let (conn, mut rx, _shutdown) = Connection::new(Uuid::new_v4());
        let payload: Arc<str> = Arc::from("{\"type\":\"pong\"}");

        for _ in 0..OUTBOUND_BUFFER {
            assert_eq!(conn.enqueue(Arc::clone(&payload)), EnqueueResult::Sent);
        }

        assert_eq!(conn.enqueue(Arc::clone(&payload)), EnqueueResult::Overflow(1));
        assert_eq!(conn.enqueue(Arc::clone(&payload)), EnqueueResult::Overflow(2));

        // Draining resets the streak on the next successful send
        assert!(rx.try_recv().is_ok());
        assert_eq!(conn.enqueue(Arc::clone(&payload)), EnqueueResult::Sent);
        assert_eq!(conn.enqueue(Arc::clone(&payload)), EnqueueResult::Overflow(1));
    }

    #[test]
    fn test_enqueue_after_writer_gone() {
        let (conn, rx, _shutdown) = Connection::new(Uuid::new_v4());
        drop(rx);
        assert_eq!(
            conn.enqueue(Arc::from("{\"type\":\"pong\"}")),
            EnqueueResult::Closed
        );
    }
}
