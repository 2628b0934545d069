//! Chat relay server: accepts connections, registers unique display names
//! and fans every message out to the registered clients.

pub mod client_handler;
pub mod config;
pub mod delivery;
pub mod error;
pub mod registry;
pub mod server;
pub mod server_channel;
pub mod server_listener;
pub mod server_types;

pub use crate::config::ServerConfig;
pub use crate::error::{ConfigError, ServerError};
pub use crate::server::Server;
