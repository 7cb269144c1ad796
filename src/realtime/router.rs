// Event router: fans domain events out to live connections.
//
// Domain callers enqueue and return immediately; a dedicated task drains the
// intake channel, serializes each event once, and delivers with non-blocking
// sends. Delivery failure never reaches the domain call path.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::realtime::frames::ServerFrame;
use crate::realtime::registry::{Connection, ConnectionRegistry, EnqueueResult};
use crate::services::session::SessionNotifier;

/// Consecutive overflows before a slow consumer is closed
pub const MAX_OVERFLOW_STREAK: u32 = 8;

/// Delivery target for one event
#[derive(Debug, Clone)]
pub enum Target {
    /// Every connection of one user
    User(Uuid),
    /// Union of each listed user's connections
    UserSet(Vec<Uuid>),
    /// Connections subscribed to a topic
    Topic(String),
    /// Every live connection
    Broadcast,
}

struct OutboundEvent {
    target: Target,
    frame: ServerFrame,
}

/// Cloneable handle onto the router's intake channel
#[derive(Clone)]
pub struct EventRouter {
    tx: mpsc::UnboundedSender<OutboundEvent>,
    registry: ConnectionRegistry,
}

impl EventRouter {
    /// Start the router's drain task and return a handle
    pub fn spawn(registry: ConnectionRegistry) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

        let drain_registry = registry.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                deliver(&drain_registry, &event.target, &event.frame);
            }
            debug!("Event router intake closed, drain task exiting");
        });

        Self { tx, registry }
    }

    /// Enqueue an event for delivery. Infallible from the caller's view:
    /// the domain action already happened whether or not anyone is listening.
    pub fn publish(&self, target: Target, frame: ServerFrame) {
        if self.tx.send(OutboundEvent { target, frame }).is_err() {
            error!("Event router drain task is gone; dropping event");
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }
}

impl SessionNotifier for EventRouter {
    fn auth_revoked(&self, user_id: Uuid, message: &str) {
        self.publish(
            Target::User(user_id),
            ServerFrame::AuthRevoked {
                message: message.to_string(),
            },
        );
    }
}

/// Resolve a target to its current connection set
fn connections_for(registry: &ConnectionRegistry, target: &Target) -> Vec<Arc<Connection>> {
    match target {
        Target::User(user_id) => registry.connections_of(*user_id),
        Target::UserSet(user_ids) => {
            let mut seen = HashSet::new();
            let mut connections = Vec::new();
            for user_id in user_ids {
                for conn in registry.connections_of(*user_id) {
                    if seen.insert(conn.id) {
                        connections.push(conn);
                    }
                }
            }
            connections
        },
        Target::Topic(topic) => registry.subscribers_of(topic),
        Target::Broadcast => registry.all_connections(),
    }
}

/// Serialize once and fan out. Overflowing consumers drop the frame; a
/// persistent overflow streak or a closed writer gets the connection removed.
pub fn deliver(registry: &ConnectionRegistry, target: &Target, frame: &ServerFrame) {
    let payload: Arc<str> = match serde_json::to_string(frame) {
        Ok(json) => Arc::from(json),
        Err(e) => {
            error!("Failed to serialize realtime frame: {}", e);
            return;
        },
    };

    let mut stale: Vec<Uuid> = Vec::new();

    for conn in connections_for(registry, target) {
        match conn.enqueue(Arc::clone(&payload)) {
            EnqueueResult::Sent => {},
            EnqueueResult::Overflow(streak) => {
                debug!(
                    connection_id = %conn.id,
                    user_id = %conn.user_id,
                    streak,
                    "Dropped frame for slow consumer"
                );
                if streak >= MAX_OVERFLOW_STREAK {
                    warn!(
                        connection_id = %conn.id,
                        user_id = %conn.user_id,
                        "Closing persistently slow connection"
                    );
                    conn.close();
                    stale.push(conn.id);
                }
            },
            EnqueueResult::Closed => stale.push(conn.id),
        }
    }

    for conn_id in stale {
        registry.remove_connection(conn_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::registry::OUTBOUND_BUFFER;

    fn frame() -> ServerFrame {
        ServerFrame::Pong
    }

    #[test]
    fn test_user_target_hits_all_devices() {
        let registry = ConnectionRegistry::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (laptop, mut laptop_rx, _s1) = Connection::new(alice);
        let (phone, mut phone_rx, _s2) = Connection::new(alice);
        let (bob_conn, mut bob_rx, _s3) = Connection::new(bob);
        registry.add_connection(Arc::clone(&laptop));
        registry.add_connection(Arc::clone(&phone));
        registry.add_connection(Arc::clone(&bob_conn));

        deliver(&registry, &Target::User(alice), &frame());

        assert!(laptop_rx.try_recv().is_ok());
        assert!(phone_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn test_user_set_deduplicates() {
        let registry = ConnectionRegistry::new();
        let alice = Uuid::new_v4();
        let (conn, mut rx, _s) = Connection::new(alice);
        registry.add_connection(Arc::clone(&conn));

        deliver(
            &registry,
            &Target::UserSet(vec![alice, alice]),
            &frame(),
        );

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_topic_target() {
        let registry = ConnectionRegistry::new();
        let (subscriber, mut sub_rx, _s1) = Connection::new(Uuid::new_v4());
        let (bystander, mut other_rx, _s2) = Connection::new(Uuid::new_v4());
        registry.add_connection(Arc::clone(&subscriber));
        registry.add_connection(Arc::clone(&bystander));
        registry.subscribe(subscriber.id, "post:x".to_string());

        deliver(&registry, &Target::Topic("post:x".to_string()), &frame());

        assert!(sub_rx.try_recv().is_ok());
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let (a, mut a_rx, _s1) = Connection::new(Uuid::new_v4());
        let (b, mut b_rx, _s2) = Connection::new(Uuid::new_v4());
        registry.add_connection(Arc::clone(&a));
        registry.add_connection(Arc::clone(&b));

        deliver(&registry, &Target::Broadcast, &frame());

        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[test]
    fn test_stale_connection_removed() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (conn, rx, _s) = Connection::new(user);
        registry.add_connection(Arc::clone(&conn));
        drop(rx);

        deliver(&registry, &Target::User(user), &frame());

        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_user_online(user));
    }

    #[test]
    fn test_slow_consumer_closed_after_streak() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (conn, _rx, mut shutdown) = Connection::new(user);
        registry.add_connection(Arc::clone(&conn));

        // Fill the buffer, then overflow repeatedly
        for _ in 0..OUTBOUND_BUFFER {
            conn.enqueue(Arc::from("x"));
        }
        for _ in 0..MAX_OVERFLOW_STREAK {
            deliver(&registry, &Target::User(user), &frame());
        }

        assert_eq!(registry.connection_count(), 0);
        assert!(*shutdown.borrow_and_update());
    }

    #[test]
    fn test_delivery_failure_is_silent_for_caller() {
        // Empty registry: no targets at all, still no error surfaces
        let registry = ConnectionRegistry::new();
        deliver(&registry, &Target::Broadcast, &frame());
        deliver(&registry, &Target::User(Uuid::new_v4()), &frame());
        deliver(&registry, &Target::Topic("post:none".to_string()), &frame());
    }
}
