use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use corner_types::events::ServerEvent;

/// A live connection's send half. A dropped receiver is pruned on the
/// next delivery attempt.
struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

/// Handed to the connection task at registration: the handle id used to
/// unregister, a sender for direct replies on this connection only, and
/// the stream of events fanned out to it.
pub struct Registration {
    pub conn_id: Uuid,
    pub reply: mpsc::UnboundedSender<ServerEvent>,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
}

/// Tracks every live connection per user id. One user may hold any
/// number of concurrent connections (devices, tabs).
///
/// Delivery is fire-and-forget: at most once per live connection, zero
/// when the user is offline. Durability is the message store's job, not
/// this component's. The map is sharded (dashmap), so register,
/// unregister and deliver on disjoint users never serialize on each
/// other.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<DashMap<i64, Vec<ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Register a new connection for a user.
    pub fn register(&self, user_id: i64) -> Registration {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .entry(user_id)
            .or_default()
            .push(ConnectionHandle { id: conn_id, tx: tx.clone() });
        Registration {
            conn_id,
            reply: tx,
            events: rx,
        }
    }

    /// Remove a connection. The user's entry is dropped once its last
    /// connection goes away, to bound memory.
    pub fn unregister(&self, user_id: i64, conn_id: Uuid) {
        if let Some(mut conns) = self.inner.get_mut(&user_id) {
            conns.retain(|c| c.id != conn_id);
        }
        self.inner.remove_if(&user_id, |_, conns| conns.is_empty());
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.inner.get(&user_id).is_some_and(|c| !c.is_empty())
    }

    /// Push an event to every live connection of a user. A closed
    /// connection is pruned and the remaining handles still receive the
    /// event; the caller never sees a failure.
    pub fn deliver(&self, user_id: i64, event: &ServerEvent) {
        if let Some(mut conns) = self.inner.get_mut(&user_id) {
            conns.retain(|c| c.tx.send(event.clone()).is_ok());
        }
        self.inner.remove_if(&user_id, |_, conns| conns.is_empty());
    }

    /// Total live connections across all users.
    pub fn connection_count(&self) -> usize {
        self.inner.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> ServerEvent {
        ServerEvent::Typing {
            conversation_id: 1,
            user_id: 2,
        }
    }

    #[test]
    fn delivers_to_every_live_connection_once() {
        let registry = Registry::new();
        let mut first = registry.register(7);
        let mut second = registry.register(7);

        registry.deliver(7, &ping());

        assert!(first.events.try_recv().is_ok());
        assert!(second.events.try_recv().is_ok());
        // At most once per connection.
        assert!(first.events.try_recv().is_err());
        assert!(second.events.try_recv().is_err());
    }

    #[test]
    fn offline_delivery_is_a_noop() {
        let registry = Registry::new();
        assert!(!registry.is_online(42));
        registry.deliver(42, &ping());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn dead_connections_are_pruned_without_error() {
        let registry = Registry::new();
        let dead = registry.register(7);
        let mut live = registry.register(7);
        drop(dead.events);

        registry.deliver(7, &ping());

        assert!(live.events.try_recv().is_ok());
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.is_online(7));
    }

    #[test]
    fn unregister_drops_empty_user_entries() {
        let registry = Registry::new();
        let reg = registry.register(7);
        assert!(registry.is_online(7));

        registry.unregister(7, reg.conn_id);
        assert!(!registry.is_online(7));
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn unregister_leaves_other_connections_of_the_user() {
        let registry = Registry::new();
        let first = registry.register(7);
        let mut second = registry.register(7);

        registry.unregister(7, first.conn_id);
        registry.deliver(7, &ping());

        assert!(second.events.try_recv().is_ok());
        assert!(registry.is_online(7));
    }
}
