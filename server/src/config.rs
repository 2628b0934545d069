//! Server settings loaded from a properties file (`PORT=5000`) with
//! `RELAY_`-prefixed environment overrides, e.g. `RELAY_PORT=5001`.

use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "server.properties";
pub const DEFAULT_HOST: &str = "0.0.0.0";

const ENV_PREFIX: &str = "RELAY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Whether a TEXT message is also delivered back to its sender.
    pub echo_to_sender: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(alias = "PORT")]
    port: Option<i64>,
    #[serde(alias = "HOST")]
    host: Option<String>,
    #[serde(alias = "ECHO_TO_SENDER")]
    echo_to_sender: Option<bool>,
}

impl ServerConfig {
    pub fn new(port: i64) -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: DEFAULT_HOST.to_owned(),
            port: check_port(port)?,
            echo_to_sender: false,
        })
    }

    /// Read `path` if it exists, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let settings = Config::builder()
            .add_source(File::new(&path.to_string_lossy(), FileFormat::Ini).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let raw: RawConfig = settings.try_deserialize()?;
        let port = raw.port.ok_or(ConfigError::MissingPort)?;

        let config = ServerConfig {
            host: raw.host.unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            port: check_port(port)?,
            echo_to_sender: raw.echo_to_sender.unwrap_or(false),
        };

        info!("Config loaded from {} : {:?}", path.display(), config);
        Ok(config)
    }

    pub fn with_port(mut self, port: i64) -> Result<Self, ConfigError> {
        self.port = check_port(port)?;
        Ok(self)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// valid range is 0 < port < 65535
pub fn check_port(value: i64) -> Result<u16, ConfigError> {
    if value > 0 && value < 65535 {
        u16::try_from(value).map_err(|_| ConfigError::InvalidPort(value))
    } else {
        Err(ConfigError::InvalidPort(value))
    }
}
