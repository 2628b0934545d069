use anyhow::Result;
use clap::Parser;
use tokio::select;
use tokio_stream::StreamExt; // provides combinator methods like next on top of FramedRead
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

use client::client::{Client, Update};
use client::input_handler::{Input, InputHandler, GREETINGS, LINES_MAX_LEN};

#[derive(Parser, Debug)]
#[command(author, version, about = "Terminal client for the chat relay", long_about = None)]
struct Args {
    /// Address of the relay server.
    #[arg(long, default_value = "127.0.0.1:5000")]
    server: String,

    /// Display name to register with.
    #[arg(long)]
    name: String,
}

fn init_tracing() {
    // keep the terminal for chat output unless RUST_LOG asks for more
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().compact().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let (mut client, mut events) = Client::connect(&args.server, &args.name).await?;

    println!("{GREETINGS}");

    let mut fr = FramedRead::new(tokio::io::stdin(), LinesCodec::new_with_max_length(LINES_MAX_LEN));
    let mut stdin_open = true;

    loop {
        select! {
            event = events.recv() => match event.map(|e| client.on_event(e)) {
                Some(Update::Print(line)) => println!("{line}"),
                Some(Update::Nothing) => {}
                Some(Update::Closed) | None => {
                    println!("Connection closed.");
                    break;
                }
            },
            value = fr.next(), if stdin_open => {
                let line = match value {
                    Some(Ok(line)) => Some(line),
                    Some(Err(err)) => {
                        warn!(error = %err, "unable to read command line input");
                        None
                    }
                    None => None,
                };

                match InputHandler::parse_input(line) {
                    Input::Message(text) => {
                        if let Err(err) = client.send_line(&text) {
                            warn!(error = %err, "unable to send message");
                        }
                    }
                    Input::Users => println!("Users online:\n{}", client.users()),
                    Input::Quit => {
                        // the Disconnected event ends the loop
                        client.quit();
                        stdin_open = false;
                    }
                    Input::Noop => {}
                }
            }
        }
    }

    Ok(())
}
