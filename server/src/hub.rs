//! Per-stream broadcast hub.
//!
//! A hub is an actor: a single tokio task owns the set of live connections and
//! processes one event at a time from an unbounded mailbox. Every other part
//! of the server talks to it through a cloneable [`Hub`] handle, so the
//! connection set needs no lock.
//!
//! # Events
//!
//! - register / unregister a connection
//! - unregister every connection holding a token
//! - broadcast a frame (the reserved close frame shuts the hub down)
//! - report [`HubStats`]
//!
//! # Overflow policy
//!
//! Broadcasting never waits on a subscriber. If a connection's outbound queue
//! is full, the hub drains it and enqueues only the current frame. The slow
//! subscriber observes a gap followed by the newest frame; it is neither
//! evicted nor allowed to stall the broadcaster.
//!
//! # Example
//!
//! ```rust
//! use wspub_server::hub::Hub;
//! use wspub_server::types::Frame;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let hub = Hub::spawn("s1", 8);
//! hub.broadcast(Frame::binary(vec![0xDE, 0xAD]));
//!
//! hub.request_shutdown();
//! hub.terminated().await;
//! assert!(hub.is_terminated());
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, Stream, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::connection::{run_read_loop, run_write_loop, Connection, ConnectionId};
use crate::queue::PushError;
use crate::tokens::Token;
use crate::types::{Frame, FrameKind};

/// Lifecycle of a hub's control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Running,
    ShuttingDown,
    Terminated,
}

/// Snapshot of a hub's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connections currently registered.
    pub connections: usize,
    /// Non-close frames broadcast since the hub started.
    pub frames_broadcast: u64,
    /// Times a full queue was drained and replaced by the newest frame.
    pub overflow_recoveries: u64,
}

enum HubEvent {
    Register(Connection),
    Unregister(ConnectionId),
    UnregisterToken(Token),
    Broadcast(Frame),
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    stream: Arc<str>,
    events: mpsc::UnboundedSender<HubEvent>,
    queue_capacity: usize,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("stream", &self.stream)
            .field("queue_capacity", &self.queue_capacity)
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

impl Hub {
    /// Starts a hub's control loop on the current tokio runtime.
    ///
    /// `queue_capacity` is the outbound queue size for every connection this
    /// hub admits through [`handle_connection`](Self::handle_connection).
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, or if `queue_capacity` is 0.
    #[must_use]
    pub fn spawn(stream: impl Into<String>, queue_capacity: usize) -> Self {
        assert!(queue_capacity > 0, "outbound queue capacity must be at least 1");

        let stream: Arc<str> = Arc::from(stream.into());
        let (events, mailbox) = mpsc::unbounded_channel();
        let actor = HubActor {
            stream: Arc::clone(&stream),
            mailbox,
            connections: HashMap::new(),
            state: HubState::Running,
            stats: HubStats::default(),
        };
        tokio::spawn(actor.run());

        Self {
            stream,
            events,
            queue_capacity,
        }
    }

    /// Stream id this hub serves.
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Returns `true` if both handles drive the same control loop.
    pub fn same_hub(&self, other: &Hub) -> bool {
        self.events.same_channel(&other.events)
    }

    /// Returns `true` once the control loop has exited and cleared its
    /// connections.
    pub fn is_terminated(&self) -> bool {
        self.events.is_closed()
    }

    /// Waits until the control loop has terminated.
    pub async fn terminated(&self) {
        self.events.closed().await;
    }

    fn send(&self, event: HubEvent) -> bool {
        if self.events.send(event).is_err() {
            debug!(stream = %self.stream, "Hub already terminated, dropping event");
            return false;
        }
        true
    }

    /// Adds `connection` to the hub.
    ///
    /// Returns `false` if the hub has terminated; the caller then owns the
    /// connection and must close it.
    pub fn register(&self, connection: Connection) -> bool {
        self.send(HubEvent::Register(connection))
    }

    /// Removes a connection and closes its queue. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        self.send(HubEvent::Unregister(id));
    }

    /// Disconnects every subscriber currently holding `token`.
    pub fn revoke_token(&self, token: Token) {
        self.send(HubEvent::UnregisterToken(token));
    }

    /// Publishes `frame` to every current subscriber. Never waits.
    ///
    /// Broadcasting [`Frame::close`] shuts the hub down.
    pub fn broadcast(&self, frame: Frame) {
        self.send(HubEvent::Broadcast(frame));
    }

    /// Publishes a frame built from a discriminator and payload.
    pub fn publish(&self, kind: FrameKind, payload: impl Into<Bytes>) {
        self.broadcast(Frame::new(kind, payload));
    }

    /// Asks the hub to shut down, closing every connection.
    pub fn request_shutdown(&self) {
        self.broadcast(Frame::close());
    }

    /// Returns the hub's counters, or `None` if it has terminated.
    ///
    /// The reply is produced after every event sent before this call has been
    /// processed.
    pub async fn stats(&self) -> Option<HubStats> {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubEvent::Stats(reply)) {
            return None;
        }
        rx.await.ok()
    }

    /// Serves a subscriber WebSocket until it terminates.
    ///
    /// The socket is owned by this call for its whole duration; it returns once
    /// the peer disconnected, a write failed, the token was revoked, or the
    /// hub shut down.
    pub async fn handle_connection(&self, token: Token, socket: WebSocket) {
        let (sink, stream) = socket.split();
        self.serve_connection(Some(token), sink, stream).await;
    }

    /// Transport-agnostic body of [`handle_connection`](Self::handle_connection).
    pub async fn serve_connection<K, S, E>(&self, token: Option<Token>, sink: K, stream: S)
    where
        K: Sink<Message> + Send + 'static,
        K::Error: fmt::Display,
        S: Stream<Item = Result<Message, E>>,
        E: fmt::Display,
    {
        let connection = Connection::new(token, self.queue_capacity);
        let id = connection.id();
        let queue = Arc::clone(connection.queue());

        if self.register(connection.clone()) {
            info!(stream = %self.stream, connection = %id, "Subscriber connected");
        } else {
            debug!(stream = %self.stream, connection = %id, "Hub terminated, closing subscriber");
            connection.close();
        }

        let mut writer = tokio::spawn(run_write_loop(id, queue, sink));

        let writer_done = tokio::select! {
            () = run_read_loop(id, stream) => false,
            result = &mut writer => {
                if let Err(err) = result {
                    warn!(connection = %id, error = %err, "Write loop task failed");
                }
                true
            }
        };

        self.unregister(id);
        // The hub may be gone already; make sure the writer can finish.
        if self.is_terminated() {
            connection.close();
        }

        if !writer_done {
            if let Err(err) = writer.await {
                warn!(connection = %id, error = %err, "Write loop task failed");
            }
        }
        info!(stream = %self.stream, connection = %id, "Subscriber disconnected");
    }
}

struct HubActor {
    stream: Arc<str>,
    mailbox: mpsc::UnboundedReceiver<HubEvent>,
    connections: HashMap<ConnectionId, Connection>,
    state: HubState,
    stats: HubStats,
}

impl HubActor {
    async fn run(mut self) {
        info!(stream = %self.stream, "Hub started");

        while let Some(event) = self.mailbox.recv().await {
            if self.handle(event).is_break() {
                break;
            }
        }

        self.shutdown();
    }

    fn handle(&mut self, event: HubEvent) -> ControlFlow<()> {
        debug_assert_eq!(self.state, HubState::Running, "events are only handled while running");
        match event {
            HubEvent::Register(connection) => {
                debug!(stream = %self.stream, connection = %connection.id(), "Connection registered");
                self.connections.insert(connection.id(), connection);
            }
            HubEvent::Unregister(id) => {
                if let Some(connection) = self.connections.remove(&id) {
                    connection.close();
                    debug!(stream = %self.stream, connection = %id, "Connection unregistered");
                }
            }
            HubEvent::UnregisterToken(token) => {
                let revoked: Vec<ConnectionId> = self
                    .connections
                    .values()
                    .filter(|connection| connection.token() == Some(token))
                    .map(Connection::id)
                    .collect();
                for id in &revoked {
                    if let Some(connection) = self.connections.remove(id) {
                        connection.close();
                    }
                }
                info!(stream = %self.stream, %token, disconnected = revoked.len(), "Token revoked");
            }
            HubEvent::Broadcast(frame) if frame.is_close() => {
                return ControlFlow::Break(());
            }
            HubEvent::Broadcast(frame) => self.broadcast(frame),
            HubEvent::Stats(reply) => {
                let _ = reply.send(HubStats {
                    connections: self.connections.len(),
                    ..self.stats
                });
            }
        }
        ControlFlow::Continue(())
    }

    fn broadcast(&mut self, frame: Frame) {
        trace!(
            stream = %self.stream,
            kind = ?frame.kind(),
            bytes = frame.len(),
            receivers = self.connections.len(),
            "Broadcasting frame"
        );
        self.stats.frames_broadcast += 1;

        for connection in self.connections.values() {
            match connection.queue().try_push(frame.clone()) {
                Ok(()) => {}
                Err(PushError::Full(frame)) => match connection.queue().replace_all(frame) {
                    Ok(dropped) => {
                        self.stats.overflow_recoveries += 1;
                        debug!(
                            stream = %self.stream,
                            connection = %connection.id(),
                            dropped,
                            "Subscriber lagging, replaced pending frames with newest"
                        );
                    }
                    Err(_) => {
                        trace!(connection = %connection.id(), "Queue closed during broadcast");
                    }
                },
                Err(PushError::Closed(_)) => {
                    trace!(connection = %connection.id(), "Queue closed during broadcast");
                }
            }
        }
    }

    fn shutdown(&mut self) {
        if self.state == HubState::Terminated {
            return;
        }
        self.state = HubState::ShuttingDown;
        debug!(stream = %self.stream, state = ?self.state, connections = self.connections.len(), "Hub shutting down");

        for (_, connection) in self.connections.drain() {
            connection.close();
        }
        self.state = HubState::Terminated;

        // Refuse new events, then release anything that raced the shutdown.
        self.mailbox.close();
        while let Ok(event) = self.mailbox.try_recv() {
            if let HubEvent::Register(connection) = event {
                connection.close();
            }
        }

        info!(stream = %self.stream, state = ?self.state, "Hub terminated");
    }
}
