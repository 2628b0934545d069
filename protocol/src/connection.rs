//! Duplex message channel over a single byte stream.
//!
//! A [`Connection`] owns its socket through two background tasks: a receive
//! loop that decodes lines into [`Message`]s and a writer that drains the
//! outgoing queue one frame at a time. Everything the owner needs to know
//! about the connection arrives as a [`ConnectionEvent`] on the event channel
//! handed to [`Connection::spawn`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use parking_lot::{Mutex, RwLock};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::select;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, ProtocolError};
use crate::{Message, MessageCodec, MessageType};

pub type ConnectionId = u64;
pub type EventSender = UnboundedSender<ConnectionEvent>;
pub type EventReceiver = UnboundedReceiver<ConnectionEvent>;

// how long queued frames may take to drain once a connection is closing
const CLOSE_LINGER: Duration = Duration::from_secs(3);

// frames waiting for the writer, a peer that falls further behind is dropped
pub const OUTGOING_CAPACITY: usize = 1024;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a connection as seen by its owner.
///
/// Per connection the order is always `Ready`, any number of `Received` and
/// `Exception`, then exactly one `Disconnected`.
#[derive(Debug)]
pub enum ConnectionEvent {
    Ready(Connection),
    Received(Connection, Message),
    Exception(Connection, ProtocolError),
    Disconnected(Connection),
}

impl ConnectionEvent {
    pub fn connection(&self) -> &Connection {
        match self {
            ConnectionEvent::Ready(c)
            | ConnectionEvent::Received(c, _)
            | ConnectionEvent::Exception(c, _)
            | ConnectionEvent::Disconnected(c) => c,
        }
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Cheap, cloneable handle; clones refer to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    peer: String,
    name: RwLock<Option<String>>,
    outgoing: Sender<Message>,
    events: EventSender,
    closed: AtomicBool,
    shutdown: CancellationToken,
    // first write side fault, reported by the receive loop before Disconnected
    fault: Mutex<Option<ProtocolError>>,
}

impl Connection {
    /// Dial `addr` and wrap the resulting stream (client side).
    pub async fn connect<A>(addr: A, events: EventSender) -> Result<Connection, ConnectionError>
    where
        A: ToSocketAddrs + fmt::Display,
    {
        let label = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ConnectionError::Connect { addr: label.clone(), source })?;

        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or(label);
        info!(%peer, "connected");

        Ok(Connection::spawn(stream, peer, events))
    }

    /// Bind to an already open stream and start its receive and write tasks.
    pub fn spawn<S>(stream: S, peer: impl Into<String>, events: EventSender) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = io::split(stream);
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_CAPACITY);

        let connection = Connection {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                peer: peer.into(),
                name: RwLock::new(None),
                outgoing,
                events,
                closed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                fault: Mutex::new(None),
            }),
        };

        let fr = FramedRead::new(read_half, MessageCodec::new());
        let fw = FramedWrite::new(write_half, MessageCodec::new());

        let writer = tokio::spawn(connection.clone().write_loop(fw, outgoing_rx));
        tokio::spawn(connection.clone().receive_loop(fr, writer));

        connection
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn peer(&self) -> &str {
        &self.inner.peer
    }

    pub fn name(&self) -> Option<String> {
        self.inner.name.read().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.write() = Some(name.into());
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue `message` for delivery. Frames from concurrent callers are
    /// written whole and in queue order by the connection's writer task.
    ///
    /// A peer with [`OUTGOING_CAPACITY`] frames still unwritten is
    /// disconnected rather than buffered further.
    pub fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed(self.id()));
        }

        debug!(connection = %self, ?message, "queue message");
        match self.inner.outgoing.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(connection = %self, capacity = OUTGOING_CAPACITY, "outgoing queue full, dropping peer");
                self.fail(ProtocolError::Backlog(OUTGOING_CAPACITY));
                Err(ConnectionError::Backlogged(self.id()))
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Closed(self.id())),
        }
    }

    /// Stop the receive loop and close the socket. Idempotent, never blocks,
    /// so it is safe to call from inside an event handler.
    pub fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(connection = %self, "disconnect");
        self.inner.shutdown.cancel();
    }

    // keep the first fault for the receive loop to report, then close
    fn fail(&self, err: ProtocolError) {
        self.inner.fault.lock().get_or_insert(err);
        self.disconnect();
    }

    fn emit(&self, event: ConnectionEvent) {
        if self.inner.events.send(event).is_err() {
            debug!(connection = %self, "event receiver dropped");
        }
    }

    // Read one line at a time until the stream ends, fails or the
    // connection is shut down. Only this task emits events, so Disconnected
    // is always the final one.
    async fn receive_loop<R>(self, mut fr: FramedRead<R, MessageCodec>, writer: JoinHandle<()>)
    where
        R: AsyncRead + Unpin,
    {
        self.emit(ConnectionEvent::Ready(self.clone()));

        loop {
            select! {
                biased;
                _ = self.inner.shutdown.cancelled() => {
                    debug!(connection = %self, "receive loop cancelled");
                    break;
                }
                value = fr.next() => {
                    match value {
                        Some(Ok(message)) => {
                            if message.kind() == MessageType::Unrecognized {
                                warn!(connection = %self, line = message.body(), "unrecognized message");
                            } else {
                                debug!(connection = %self, ?message, "received");
                            }
                            self.emit(ConnectionEvent::Received(self.clone(), message));
                        }
                        Some(Err(err)) => {
                            warn!(connection = %self, error = %err, "read failed");
                            self.emit(ConnectionEvent::Exception(self.clone(), err));
                            break;
                        }
                        None => {
                            info!(connection = %self, "remote closed the connection");
                            break;
                        }
                    }
                }
            }
        }

        // the writer is bounded by CLOSE_LINGER once shutdown is cancelled
        self.disconnect();
        if let Err(err) = writer.await {
            warn!(connection = %self, error = %err, "writer task failed");
        }
        drop(fr);

        let fault = self.inner.fault.lock().take();
        if let Some(err) = fault {
            self.emit(ConnectionEvent::Exception(self.clone(), err));
        }
        self.emit(ConnectionEvent::Disconnected(self.clone()));
    }

    // Single writer per connection: encode, write and flush one message at a
    // time. Once shutdown starts, everything including a write already in
    // flight gets CLOSE_LINGER to finish before the write half is dropped.
    async fn write_loop<W>(self, mut fw: FramedWrite<W, MessageCodec>, mut outgoing: Receiver<Message>)
    where
        W: AsyncWrite + Unpin,
    {
        let shutdown = self.inner.shutdown.clone();
        let linger = async {
            shutdown.cancelled().await;
            tokio::time::sleep(CLOSE_LINGER).await;
        };

        select! {
            result = self.write_frames(&mut fw, &mut outgoing) => match result {
                Ok(()) => debug!(connection = %self, "writer closed"),
                Err(err) => {
                    warn!(connection = %self, error = %err, "write failed");
                    self.fail(err);
                }
            },
            _ = linger => {
                warn!(connection = %self, "peer did not drain before close, dropping queued messages");
            }
        }
    }

    async fn write_frames<W>(
        &self,
        fw: &mut FramedWrite<W, MessageCodec>,
        outgoing: &mut Receiver<Message>,
    ) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            select! {
                biased;
                Some(message) = outgoing.recv() => fw.send(message).await?,
                _ = self.inner.shutdown.cancelled() => break,
            }
        }

        // deliver whatever was queued before the close, then shut the write side
        while let Ok(message) = outgoing.try_recv() {
            fw.feed(message).await?;
        }
        fw.close().await
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "#{} {} ({})", self.id(), name, self.peer()),
            None => write!(f, "#{} ({})", self.id(), self.peer()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("peer", &self.peer())
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}
