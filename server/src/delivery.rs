use protocol::{Connection, ConnectionId, Message};
use tracing::{debug, warn};

use crate::registry::Registry;

// handles msg delivery back to clients, a failed send to one
// connection never stops delivery to the rest
pub struct Delivery;

impl Delivery {
    pub fn send(connection: &Connection, msg: Message) -> bool {
        match connection.send(msg) {
            Ok(()) => true,
            Err(err) => {
                warn!(connection = %connection, error = %err, "unable to deliver message");
                false
            }
        }
    }

    // returns the number of connections the message was queued for
    pub fn broadcast(registry: &Registry, msg: &Message) -> usize {
        Delivery::broadcast_except(registry, msg, None)
    }

    pub fn broadcast_except(registry: &Registry, msg: &Message, except: Option<ConnectionId>) -> usize {
        debug!(?msg, recipients = registry.len(), "broadcast");

        registry
            .iter()
            .filter(|entry| Some(entry.connection.id()) != except)
            .filter(|entry| Delivery::send(&entry.connection, msg.clone()))
            .count()
    }
}
