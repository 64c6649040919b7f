//! Connection adapter: one admitted subscriber socket.
//!
//! A subscriber is split into two independent loops:
//!
//! - [`run_write_loop`] drains the connection's [`OutboundQueue`] and writes
//!   each frame to the socket in order. It stops on the first write error, or
//!   once the queue is closed and empty, and closes the socket either way.
//! - [`run_read_loop`] discards everything the peer sends. It only exists to
//!   notice that the peer went away (close frame or read error).
//!
//! Both loops are generic over `futures` sinks and streams of WebSocket
//! messages, so they run on a split axum [`WebSocket`](axum::extract::ws::WebSocket)
//! in production and on in-memory channels in tests.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::queue::OutboundQueue;
use crate::tokens::Token;

/// Identity of a connection inside its hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The hub's view of one subscriber: identity, token and outbound queue.
///
/// The socket itself never reaches the hub; it stays with the adapter loops.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    token: Option<Token>,
    queue: Arc<OutboundQueue>,
}

impl Connection {
    /// Creates a connection with a fresh id and an empty queue.
    #[must_use]
    pub fn new(token: Option<Token>, queue_capacity: usize) -> Self {
        Self {
            id: ConnectionId::new(),
            token,
            queue: Arc::new(OutboundQueue::new(queue_capacity)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }

    pub fn queue(&self) -> &Arc<OutboundQueue> {
        &self.queue
    }

    /// Closes the outbound queue, letting the writer drain and exit.
    ///
    /// Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        self.queue.close()
    }
}

/// Writes queued frames to `sink` until the queue closes or a write fails.
pub async fn run_write_loop<K>(id: ConnectionId, queue: Arc<OutboundQueue>, sink: K)
where
    K: Sink<Message>,
    K::Error: fmt::Display,
{
    let mut sink = pin!(sink);

    while let Some(frame) = queue.pop().await {
        let bytes = frame.len();
        if let Err(err) = sink.send(frame.into_message()).await {
            warn!(connection = %id, error = %err, "Could not write frame to websocket");
            break;
        }
        trace!(connection = %id, bytes, "Frame written");
    }

    if let Err(err) = sink.close().await {
        trace!(connection = %id, error = %err, "Socket already closed");
    }
    debug!(connection = %id, "Write loop finished");
}

/// Reads and discards inbound messages until the peer closes or errs.
pub async fn run_read_loop<S, E>(id: ConnectionId, stream: S)
where
    S: Stream<Item = Result<Message, E>>,
    E: fmt::Display,
{
    let mut stream = pin!(stream);

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) => {
                debug!(connection = %id, "Peer sent close frame");
                break;
            }
            Ok(_) => {
                trace!(connection = %id, "Ignoring inbound message from subscriber");
            }
            Err(err) => {
                warn!(connection = %id, error = %err, "Error reading websocket, closing now");
                break;
            }
        }
    }
    debug!(connection = %id, "Read loop finished");
}
