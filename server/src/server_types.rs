use std::collections::HashMap;
use std::sync::Arc;

use protocol::{Connection, ConnectionId};
use tokio::sync::Mutex;

use crate::registry::Registry;

// server type definitions

// current client registry data, the single lock every protocol transition runs under
pub type SharedRegistry = Arc<Mutex<Registry>>;

// sender name on every server originated message
pub const SERVER_NAME: &str = "SERVER";

pub fn shared_registry() -> SharedRegistry {
    Arc::new(Mutex::new(Registry::new()))
}

/// Every accepted connection, named or not, from accept until its
/// `Disconnected` event has been handled. Used to close them all on shutdown.
#[derive(Clone, Default)]
pub struct LiveConnections {
    inner: Arc<parking_lot::Mutex<HashMap<ConnectionId, Connection>>>,
}

impl LiveConnections {
    pub fn new() -> Self {
        LiveConnections::default()
    }

    // A connection already closed may have had its Disconnected handled
    // before this call, so it is not tracked. Returns false in that case.
    pub fn track(&self, connection: Connection) -> bool {
        let mut live = self.inner.lock();
        if connection.is_closed() {
            return false;
        }

        live.insert(connection.id(), connection);
        true
    }

    pub fn untrack(&self, id: ConnectionId) {
        self.inner.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    // returns how many connections were closed
    pub fn close_all(&self) -> usize {
        let connections: Vec<Connection> = self.inner.lock().drain().map(|(_, c)| c).collect();
        for connection in &connections {
            connection.disconnect();
        }
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use protocol::event_channel;

    fn connection() -> Connection {
        let (local, _remote) = tokio::io::duplex(1024);
        let (events_tx, _events_rx) = event_channel();
        Connection::spawn(local, "test", events_tx)
    }

    #[tokio::test]
    async fn tracks_until_untracked() {
        let live = LiveConnections::new();
        let (a, b) = (connection(), connection());

        assert!(live.track(a.clone()));
        assert!(live.track(b));
        assert_eq!(live.len(), 2);

        live.untrack(a.id());
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn closed_connection_is_not_tracked() {
        let live = LiveConnections::new();
        let a = connection();
        a.disconnect();

        assert!(!live.track(a));
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn close_all_disconnects_everything() {
        let live = LiveConnections::new();
        let (a, b) = (connection(), connection());
        live.track(a.clone());
        live.track(b.clone());

        assert_eq!(live.close_all(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert!(live.is_empty());
    }
}
