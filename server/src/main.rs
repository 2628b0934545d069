use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use server::config::DEFAULT_CONFIG_FILE;
use server::{ConfigError, Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-delimited JSON chat relay", long_about = None)]
struct Args {
    /// Properties file holding at least `PORT=<port>`.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured port.
    #[arg(long)]
    port: Option<i64>,

    /// Deliver TEXT messages back to their sender as well.
    #[arg(long)]
    echo: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .compact() // use abbreviated log format
        .with_env_filter(filter)
        .with_thread_ids(true)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    // a port given on the command line wins over the file and environment
    let config = match (ServerConfig::load(&args.config), args.port) {
        (Ok(config), Some(port)) => config.with_port(port),
        (Ok(config), None) => Ok(config),
        (Err(ConfigError::MissingPort), Some(port)) => ServerConfig::new(port),
        (Err(err), _) => Err(err),
    };
    let mut config = config.inspect_err(|err| error!("Not valid one or more parameters: {}", err))?;
    config.echo_to_sender |= args.echo;

    info!("Server starting.. {:?}", config.bind_addr());

    let server = Server::bind(&config)
        .await
        .inspect_err(|err| error!("Unable to bind to server address: {}", err))?;

    server
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await?;

    Ok(())
}
