use std::future::Future;
use std::net::SocketAddr;

use protocol::event_channel;
use tokio::net::TcpListener;
use tracing::info;

use crate::client_handler::ClientHandler;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server_channel::ChannelReceiver;
use crate::server_listener::ServerListener;
use crate::server_types::{shared_registry, LiveConnections, SharedRegistry};

pub struct Server {
    listener: TcpListener,
    registry: SharedRegistry,
    live: LiveConnections,
    echo_to_sender: bool,
}

impl Server {
    /// Bind the configured address. Failure here is the one fatal condition.
    pub async fn bind(config: &ServerConfig) -> Result<Server, ServerError> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Server::from_listener(listener, config.echo_to_sender))
    }

    pub fn from_listener(listener: TcpListener, echo_to_sender: bool) -> Server {
        Server {
            listener,
            registry: shared_registry(),
            live: LiveConnections::new(),
            echo_to_sender,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn connections(&self) -> LiveConnections {
        self.live.clone()
    }

    /// Run until the process is stopped.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            registry,
            live,
            echo_to_sender,
        } = self;

        info!("SERVER RUNNING on {}", listener.local_addr()?);

        let (events_tx, events_rx) = event_channel();
        let handler = ClientHandler::new(registry.clone(), echo_to_sender);

        let receiver = ChannelReceiver::spawn_receive(events_rx, handler, live.clone());
        let accept = ServerListener::spawn_accept(listener, events_tx, live.clone());

        shutdown.await;

        info!("server shutting down");
        accept.abort();
        receiver.abort();

        // nobody is left to notify, close every connection without a broadcast
        let named = registry.lock().await.drain().count();
        let closed = live.close_all();
        info!(named, closed, "closed connections on shutdown");

        Ok(())
    }
}
