//! Shared frame types for the wspub relay.
//!
//! A [`Frame`] is the unit the relay moves around: an opaque payload plus a
//! [`FrameKind`] discriminator. The relay never looks inside the payload; the
//! WebSocket transport defines how it is encoded on the wire.

use axum::body::Bytes;
use axum::extract::ws::Message;
use serde::{Deserialize, Serialize};

/// Discriminator of a [`Frame`].
///
/// `Close` is reserved: broadcasting it to a hub is the hub's shutdown signal,
/// never a message delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Text,
    Binary,
    Close,
}

/// One discrete message unit. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    payload: Bytes,
}

impl Frame {
    /// Creates a frame from a discriminator and a payload.
    #[must_use]
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Creates a text frame.
    ///
    /// # Example
    ///
    /// ```rust
    /// use wspub_server::types::{Frame, FrameKind};
    ///
    /// let frame = Frame::text("hello");
    /// assert_eq!(frame.kind(), FrameKind::Text);
    /// assert_eq!(frame.payload().as_ref(), b"hello");
    /// ```
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(FrameKind::Text, text.into())
    }

    /// Creates a binary frame.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(FrameKind::Binary, payload)
    }

    /// Creates the reserved close frame.
    #[must_use]
    pub fn close() -> Self {
        Self::new(FrameKind::Close, Bytes::new())
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn is_close(&self) -> bool {
        self.kind == FrameKind::Close
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Converts an inbound WebSocket message into a data frame.
    ///
    /// Only text and binary messages carry data. Control messages (ping, pong
    /// and close) return `None`, so a remote peer can never inject the
    /// reserved close frame into a hub.
    #[must_use]
    pub fn from_message(message: Message) -> Option<Self> {
        match message {
            Message::Text(text) => Some(Self::text(text.as_str())),
            Message::Binary(payload) => Some(Self::binary(payload)),
            Message::Ping(_) | Message::Pong(_) | Message::Close(_) => None,
        }
    }

    /// Converts this frame into the WebSocket message written to subscribers.
    #[must_use]
    pub fn into_message(self) -> Message {
        match self.kind {
            FrameKind::Text => {
                Message::Text(String::from_utf8_lossy(&self.payload).into_owned().into())
            }
            FrameKind::Binary => Message::Binary(self.payload),
            FrameKind::Close => Message::Close(None),
        }
    }
}
