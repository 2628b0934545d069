//! Registration / broadcast / disconnect state machine.
//!
//! A connection is `Unregistered` from `Ready` until a NAME message is
//! accepted, `Registered` while it has a registry entry and `Closed` after
//! its `Disconnected` event. Every transition runs under the registry lock,
//! so paired broadcasts (join notice + listing, listing + leave notice) are
//! never split by another registry change.

use protocol::{Connection, ConnectionEvent, Message, MessageType, ProtocolError};
use tracing::{debug, info, warn};

use crate::delivery::Delivery;
use crate::server_types::{SharedRegistry, SERVER_NAME};

const USER_JOINED: &str = "{} joined the chat";
const USER_LEFT: &str = "{} left the chat";
const NAME_IN_USE: &str = "Name {} is already in use";
const NAME_EMPTY: &str = "Name must not be empty";

// Handles lifecycle events from every client connection
#[derive(Clone)]
pub struct ClientHandler {
    registry: SharedRegistry,
    echo_to_sender: bool,
}

impl ClientHandler {
    pub fn new(registry: SharedRegistry, echo_to_sender: bool) -> Self {
        ClientHandler {
            registry,
            echo_to_sender,
        }
    }

    pub async fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Ready(connection) => self.on_ready(&connection),
            ConnectionEvent::Received(connection, msg) => self.on_message(&connection, msg).await,
            ConnectionEvent::Exception(connection, err) => self.on_exception(&connection, &err),
            ConnectionEvent::Disconnected(connection) => self.on_disconnected(&connection).await,
        }
    }

    fn on_ready(&self, connection: &Connection) {
        info!(connection = %connection, "connection ready");
    }

    async fn on_message(&self, connection: &Connection, msg: Message) {
        debug!(connection = %connection, ?msg, "server received");

        match msg.kind() {
            MessageType::Name => self.register(connection, msg.sender()).await,
            MessageType::Text => self.relay_text(connection, msg).await,
            MessageType::Disconnect => self.process_disconnect_request(connection).await,
            MessageType::Unrecognized => {
                info!(connection = %connection, text = msg.body(), "got unrecognized message");
            }
            MessageType::Notification | MessageType::Users => {
                warn!(connection = %connection, kind = ?msg.kind(), "ignoring server-only message type from client");
            }
        }
    }

    fn on_exception(&self, connection: &Connection, err: &ProtocolError) {
        // cleanup happens on the Disconnected event that always follows
        warn!(connection = %connection, error = %err, "connection exception");
    }

    // Register client: the first claimant of a name wins, later claimants
    // are told why and dropped
    async fn register(&self, connection: &Connection, name: &str) {
        let mut registry = self.registry.lock().await;

        if registry.contains(connection.id()) {
            warn!(connection = %connection, name, "already registered, ignoring NAME");
            return;
        }

        // insert doubles as the uniqueness check
        let rejection = if name.trim().is_empty() {
            Some(NAME_EMPTY.to_owned())
        } else if !registry.insert(connection.clone(), name.to_owned()) {
            Some(NAME_IN_USE.replace("{}", name))
        } else {
            None
        };

        if let Some(reason) = rejection {
            info!(connection = %connection, name, "rejecting registration: {}", reason);

            Delivery::send(connection, Message::notification(SERVER_NAME, reason));
            connection.disconnect();
            return;
        }

        connection.set_name(name);
        info!(connection = %connection, users = ?registry.names(), "registered");

        Delivery::broadcast(&registry, &Message::notification(SERVER_NAME, USER_JOINED.replace("{}", name)));
        Delivery::broadcast(&registry, &Message::users(SERVER_NAME, registry.users_listing()));
    }

    // sender supplied name and time are relayed untouched
    async fn relay_text(&self, connection: &Connection, msg: Message) {
        let registry = self.registry.lock().await;

        if !registry.contains(connection.id()) {
            debug!(connection = %connection, "ignoring TEXT from unregistered connection");
            return;
        }

        let except = (!self.echo_to_sender).then(|| connection.id());
        Delivery::broadcast_except(&registry, &msg, except);
    }

    async fn process_disconnect_request(&self, connection: &Connection) {
        let registered = self.registry.lock().await.contains(connection.id());

        if registered {
            info!(connection = %connection, "client asked to disconnect");
            // registry cleanup follows on the Disconnected event
            connection.disconnect();
        } else {
            debug!(connection = %connection, "ignoring DISCONNECT from unregistered connection");
        }
    }

    // process client disconnection event
    async fn on_disconnected(&self, connection: &Connection) {
        let mut registry = self.registry.lock().await;

        let Some(entry) = registry.remove(connection.id()) else {
            debug!(connection = %connection, "unregistered connection closed");
            return;
        };

        info!(connection = %connection, "User {} has left", entry.name);

        Delivery::broadcast(&registry, &Message::users(SERVER_NAME, registry.users_listing()));
        Delivery::broadcast(&registry, &Message::notification(SERVER_NAME, USER_LEFT.replace("{}", &entry.name)));
    }
}
