//! Ordered, bidirectional event channel between one robot and the server.
//!
//! A [`Connection`] is an inbound stream of [`ServerEvent`]s plus a cloneable [`ClientSink`] for
//! outbound [`ClientEvent`]s. The connection lives as long as its inbound receiver: dropping it
//! closes the connection, which the server sees as a disconnect.
//!
//! Two flavours are provided: [`in_memory`] pairs a connection with a [`ServerEndpoint`] in the
//! same process, [`connect_tcp`] exchanges one JSON event per line over TCP (see
//! [`crate::protocol::encode`]).

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace};

use crate::error::HarnessError;
use crate::protocol::{decode, encode, ClientEvent, ServerEvent};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide identifier of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    fn next() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a connection.
#[derive(Debug, Clone)]
pub struct ClientSink {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientSink {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, event: ClientEvent) -> Result<(), HarnessError> {
        trace!(connection = %self.id, "> {event:?}");
        self.tx.send(event).map_err(|_| HarnessError::Disconnected)
    }
}

/// One robot's connection to the server.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub sink: ClientSink,
    pub inbound: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Connection {
    fn from_parts(
        id: ConnectionId,
        tx: mpsc::UnboundedSender<ClientEvent>,
        inbound: mpsc::UnboundedReceiver<ServerEvent>,
    ) -> Connection {
        Connection {
            id,
            sink: ClientSink { id, tx },
            inbound,
        }
    }

    pub async fn recv(&mut self) -> Option<ServerEvent> {
        let event = self.inbound.recv().await;
        trace!(connection = %self.id, "< {event:?}");
        event
    }
}

/// Server side of an [`in_memory`] connection.
#[derive(Debug)]
pub struct ServerEndpoint {
    pub id: ConnectionId,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
    to_client: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerEndpoint {
    /// Next event from the client, `None` once the client stopped sending.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    /// Sends an event to the client. Returns false if the client is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.to_client.send(event).is_ok()
    }

    /// Resolves once the client dropped its connection.
    pub async fn closed(&self) {
        self.to_client.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.to_client.is_closed()
    }

    /// A handle to push events to the client from elsewhere.
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerEvent> {
        self.to_client.clone()
    }
}

/// Creates a connection whose other end stays in this process.
pub fn in_memory() -> (Connection, ServerEndpoint) {
    let id = ConnectionId::next();
    let (client_tx, from_client) = mpsc::unbounded_channel();
    let (to_client, inbound) = mpsc::unbounded_channel();
    (
        Connection::from_parts(id, client_tx, inbound),
        ServerEndpoint {
            id,
            from_client,
            to_client,
        },
    )
}

/// Connects to a server exchanging JSON lines.
///
/// A background task moves events between the socket and the returned connection. It stops, and
/// closes the socket, when the server hangs up, when a line cannot be decoded, or when the
/// connection's inbound receiver is dropped.
#[instrument]
pub async fn connect_tcp(addr: &str) -> anyhow::Result<Connection> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("could not connect to {addr}"))?;
    stream
        .set_nodelay(true)
        .context("setting TCP_NODELAY")?;
    let id = ConnectionId::next();
    info!(connection = %id, "connected to {addr}");

    let (client_tx, mut outbound) = mpsc::unbounded_channel::<ClientEvent>();
    let (inbound_tx, inbound) = mpsc::unbounded_channel::<ServerEvent>();

    tokio::spawn(async move {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match decode::<ServerEvent>(&line) {
                        Ok(event) => {
                            if inbound_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(connection = %id, "undecodable line '{line}': {e}");
                            break;
                        }
                    },
                    Ok(None) => {
                        debug!(connection = %id, "server closed the connection");
                        break;
                    }
                    Err(e) => {
                        error!(connection = %id, "read error: {e}");
                        break;
                    }
                },
                event = outbound.recv() => {
                    let Some(event) = event else { break };
                    let mut line = match encode(&event) {
                        Ok(line) => line,
                        Err(e) => {
                            error!(connection = %id, "could not encode {}: {e}", event.name());
                            break;
                        }
                    };
                    line.push('\n');
                    if let Err(e) = write_half.write_all(line.as_bytes()).await {
                        error!(connection = %id, "write error: {e}");
                        break;
                    }
                }
                _ = inbound_tx.closed() => break,
            }
        }
        let _ = write_half.shutdown().await;
        info!(connection = %id, "disconnected");
    });

    Ok(Connection::from_parts(id, client_tx, inbound))
}
