use std::io;

use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("peer fell {0} messages behind")]
    Backlog(usize),
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("connection {0} dropped, outgoing queue is full")]
    Backlogged(ConnectionId),

    #[error("unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}
