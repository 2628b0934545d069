use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("port is not configured")]
    MissingPort,

    #[error("wrong port value (current value: {0}), expected 0 < port < 65535")]
    InvalidPort(i64),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("unable to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
