use protocol::{Connection, EventSender};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server_types::LiveConnections;

pub struct ServerListener;

impl ServerListener {
    // Accept indefinitely, a failed accept is logged and the loop keeps listening
    pub fn spawn_accept(listener: TcpListener, events_tx: EventSender, live: LiveConnections) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((tcp_socket, addr)) => {
                        info!("Server received new client connection {:?}", &addr);
                        let connection = Connection::spawn(tcp_socket, addr.to_string(), events_tx.clone());
                        if !live.track(connection) {
                            debug!(%addr, "connection closed before it was tracked");
                        }
                    }
                    Err(err) => warn!(error = %err, "failed to accept connection"),
                }
            }
        })
    }
}
