use protocol::{Connection, ConnectionError, ConnectionEvent, EventReceiver, Message, MessageType};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("chat name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// What the terminal should do after a connection event.
#[derive(Debug, PartialEq, Eq)]
pub enum Update {
    Print(String),
    Nothing,
    Closed,
}

pub struct Client {
    connection: Connection,
    name: String,
    users: String,
}

impl Client {
    // Connect to the relay and send the NAME registration right away
    pub async fn connect(server: &str, name: &str) -> Result<(Client, EventReceiver), ClientError> {
        if name.trim().is_empty() {
            return Err(ClientError::EmptyName);
        }

        info!("Client starting, connecting to server {:?}", server);

        let (events_tx, events_rx) = protocol::event_channel();
        let connection = Connection::connect(server, events_tx).await?;

        let client = Client::new(connection, name);
        client.register()?;

        Ok((client, events_rx))
    }

    pub fn new(connection: Connection, name: &str) -> Self {
        Client {
            connection,
            name: name.to_owned(),
            users: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // last USERS listing pushed by the server
    pub fn users(&self) -> &str {
        &self.users
    }

    pub fn register(&self) -> Result<(), ClientError> {
        debug!(name = %self.name, "send name message");
        self.connection.send(Message::name(&self.name))?;
        Ok(())
    }

    pub fn send_line(&self, line: &str) -> Result<(), ClientError> {
        self.connection.send(Message::text(&self.name, line))?;
        Ok(())
    }

    pub fn quit(&self) {
        info!("Session terminated by user...");
        if let Err(err) = self.connection.send(Message::disconnect(&self.name)) {
            debug!(error = %err, "connection already closed");
        }
        self.connection.disconnect();
    }

    pub fn on_event(&mut self, event: ConnectionEvent) -> Update {
        match event {
            ConnectionEvent::Ready(_) => Update::Print("Connection ready.".to_owned()),
            ConnectionEvent::Received(_, msg) => {
                if msg.kind() == MessageType::Users {
                    self.users = msg.body().to_owned();
                }
                Client::render(&msg).map_or(Update::Nothing, Update::Print)
            }
            ConnectionEvent::Exception(_, err) => {
                warn!(error = %err, "connection exception");
                Update::Print("Connection exception.".to_owned())
            }
            ConnectionEvent::Disconnected(_) => Update::Closed,
        }
    }

    // terminal form of a server message, None for anything not meant for display
    pub fn render(msg: &Message) -> Option<String> {
        match msg.kind() {
            MessageType::Text => Some(format!("[{}] {}: {}", msg.time(), msg.sender(), msg.body())),
            MessageType::Notification => Some(format!("*** [{}] {}", msg.time(), msg.body())),
            MessageType::Users => Some(format!("Users online:\n{}", msg.body())),
            _ => {
                info!("receive unrecognized {:?}", msg);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use protocol::event_channel;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};
    use tokio::time::timeout;

    async fn next(lines: &mut Lines<BufReader<DuplexStream>>) -> Option<Message> {
        let line = timeout(Duration::from_secs(2), lines.next_line()).await.unwrap().unwrap();
        line.map(|l| Message::decode(&l))
    }

    #[test]
    fn renders_server_messages() {
        let text = Message::new(MessageType::Text, "bob", "hi", "10:11:12");
        assert_eq!(Client::render(&text).unwrap(), "[10:11:12] bob: hi");

        let note = Message::new(MessageType::Notification, "SERVER", "bob joined the chat", "10:11:12");
        assert_eq!(Client::render(&note).unwrap(), "*** [10:11:12] bob joined the chat");

        let users = Message::new(MessageType::Users, "SERVER", "> alice\n> bob", "");
        assert_eq!(Client::render(&users).unwrap(), "Users online:\n> alice\n> bob");

        assert!(Client::render(&Message::unrecognized("junk")).is_none());
    }

    #[tokio::test]
    async fn registers_then_sends_text_and_disconnect() {
        let (local, remote) = tokio::io::duplex(4096);
        let (events_tx, _events_rx) = event_channel();
        let client = Client::new(Connection::spawn(local, "test", events_tx), "alice");
        let mut lines = BufReader::new(remote).lines();

        client.register().unwrap();
        client.send_line("hello").unwrap();
        client.quit();

        let name = next(&mut lines).await.unwrap();
        assert_eq!(name.kind(), MessageType::Name);
        assert_eq!(name.sender(), "alice");

        let text = next(&mut lines).await.unwrap();
        assert_eq!(text.kind(), MessageType::Text);
        assert_eq!(text.body(), "hello");
        assert_eq!(text.time().len(), 8);

        assert_eq!(next(&mut lines).await.unwrap().kind(), MessageType::Disconnect);
        assert!(next(&mut lines).await.is_none());
    }

    #[tokio::test]
    async fn tracks_latest_users_listing() {
        let (local, _remote) = tokio::io::duplex(4096);
        let (events_tx, _events_rx) = event_channel();
        let connection = Connection::spawn(local, "test", events_tx);
        let mut client = Client::new(connection.clone(), "alice");

        let users = Message::new(MessageType::Users, "SERVER", "> alice", "");
        let update = client.on_event(ConnectionEvent::Received(connection.clone(), users));

        assert!(matches!(update, Update::Print(_)));
        assert_eq!(client.users(), "> alice");
        assert_eq!(client.on_event(ConnectionEvent::Disconnected(connection)), Update::Closed);
    }

    #[tokio::test]
    async fn empty_name_is_refused_before_connecting() {
        let result = Client::connect("127.0.0.1:1", " ").await;
        assert!(matches!(result, Err(ClientError::EmptyName)));
    }
}
