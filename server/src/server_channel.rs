use protocol::{ConnectionEvent, EventReceiver};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::client_handler::ClientHandler;
use crate::server_types::LiveConnections;

pub struct ChannelReceiver;

impl ChannelReceiver {
    // Events from all connections funnel through this one task, so protocol
    // transitions are applied one at a time in arrival order
    pub fn spawn_receive(mut events_rx: EventReceiver, handler: ClientHandler, live: LiveConnections) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                debug!(connection = %event.connection(), "event received");

                if let ConnectionEvent::Disconnected(connection) = &event {
                    live.untrack(connection.id());
                }
                handler.handle(event).await;
            }

            info!("No more event senders");
        })
    }
}
