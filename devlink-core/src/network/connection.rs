//! A managed TCP connection carrying framed devlink messages.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::codec::LinkCodec;
use crate::message::Message;

/// Interval between keep-alive heartbeats.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Cloneable handle for pushing messages onto a connection's writer.
pub type MessageSender = mpsc::Sender<Message>;

/// A devlink connection to a single peer.
///
/// Owns background reader and writer tasks bridged by bounded
/// channels, plus a heartbeat task emitting the zero-sequence
/// keep-alive. All three stop when the handle (or the socket's far
/// end) goes away.
#[derive(Debug)]
pub struct Connection {
    // Channel to send messages to the background writer task
    tx: mpsc::Sender<Message>,
    // Channel to receive messages from the background reader task
    rx: mpsc::Receiver<Message>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, LinkCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel(100);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(100);

        // Writer task: User -> Network
        tokio::spawn(async move {
            while let Some(message) = network_rx.recv().await {
                if let Err(e) = net_writer.send(message).await {
                    warn!("network write error: {e}");
                    break;
                }
            }
            trace!("writer task stopped");
        });

        // Reader task: Network -> User
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(message) => {
                        if network_tx.send(message).await.is_err() {
                            // user_rx was dropped, stop reading
                            break;
                        }
                    }
                    Err(e) => {
                        // Codec errors poison the stream.
                        warn!("network read error: {e}");
                        break;
                    }
                }
            }
            trace!("reader task stopped");
        });

        // Keep-alive
        let heartbeat_tx = user_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                if heartbeat_tx.send(Message::heartbeat()).await.is_err() {
                    // Connection handle was dropped, stop heartbeat
                    break;
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Queue a message for the writer task.
    pub async fn send(&self, message: Message) -> Result<(), mpsc::error::SendError<Message>> {
        self.tx.send(message).await
    }

    /// Receive the next inbound message; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Cloneable sender usable from other tasks.
    pub fn sender(&self) -> MessageSender {
        self.tx.clone()
    }

    /// Dial a peer and wrap the stream.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, std::io::Error> {
        debug!("connecting to {endpoint}");
        let stream = TcpStream::connect(endpoint.to_socket_string()).await?;
        Ok(Self::new(stream))
    }
}

// ── Endpoint ─────────────────────────────────────────────────────

/// A host/port pair identifying one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn to_socket_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
