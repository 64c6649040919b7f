//! Bounded per-connection outbound queue.
//!
//! Each subscriber owns one [`OutboundQueue`]. The hub pushes frames into it
//! without ever waiting, and the connection's writer task pops them and writes
//! them to the socket.
//!
//! # Overflow
//!
//! When the hub finds a queue full it calls [`OutboundQueue::replace_all`],
//! which empties the queue and enqueues only the newest frame in a single
//! step under the queue's lock. A lagging subscriber therefore sees a gap
//! followed by the freshest data, and the broadcaster is never stalled by it.
//!
//! # Closing
//!
//! [`OutboundQueue::close`] is the only cancellation primitive for a
//! connection. After closing, the writer still receives the frames that were
//! already queued, then [`OutboundQueue::pop`] returns `None`.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::types::Frame;

/// Default number of frames buffered per connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Why a non-blocking push was refused. The rejected frame is handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// The queue holds `capacity` frames already.
    Full(Frame),
    /// The queue has been closed.
    Closed(Frame),
}

/// Outcome of [`OutboundQueue::drain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drained {
    /// The queue is open; this many pending frames were discarded.
    Emptied(usize),
    /// The queue is closed. Any pending frames were discarded as well.
    Closed,
}

#[derive(Debug)]
struct Inner {
    frames: VecDeque<Frame>,
    closed: bool,
}

/// A small bounded FIFO of frames shared by the hub and one writer task.
#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<Inner>,
    capacity: usize,
    notify: Notify,
}

impl OutboundQueue {
    /// Creates an open, empty queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "outbound queue capacity must be at least 1");
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Enqueues `frame` if there is room. Never waits.
    pub fn try_push(&self, frame: Frame) -> Result<(), PushError> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(PushError::Closed(frame));
            }
            if inner.frames.len() >= self.capacity {
                return Err(PushError::Full(frame));
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Discards every pending frame and enqueues `frame` alone.
    ///
    /// Returns the number of frames dropped, or hands `frame` back if the
    /// queue is closed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use wspub_server::queue::OutboundQueue;
    /// use wspub_server::types::Frame;
    ///
    /// let queue = OutboundQueue::new(2);
    /// queue.try_push(Frame::text("1")).unwrap();
    /// queue.try_push(Frame::text("2")).unwrap();
    ///
    /// assert_eq!(queue.replace_all(Frame::text("3")), Ok(2));
    /// assert_eq!(queue.len(), 1);
    /// ```
    pub fn replace_all(&self, frame: Frame) -> Result<usize, Frame> {
        let dropped = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(frame);
            }
            let dropped = inner.frames.len();
            inner.frames.clear();
            inner.frames.push_back(frame);
            dropped
        };
        self.notify.notify_one();
        Ok(dropped)
    }

    /// Discards pending frames without touching the socket. Never waits.
    pub fn drain(&self) -> Drained {
        let mut inner = self.lock();
        let dropped = inner.frames.len();
        inner.frames.clear();
        if inner.closed {
            Drained::Closed
        } else {
            Drained::Emptied(dropped)
        }
    }

    /// Closes the queue. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let newly_closed = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.closed, true)
        };
        if newly_closed {
            self.notify.notify_one();
        }
        newly_closed
    }

    /// Waits for the next frame.
    ///
    /// Returns `None` once the queue is closed and every frame queued before
    /// the close has been handed out. Intended for a single consumer.
    pub async fn pop(&self) -> Option<Frame> {
        loop {
            {
                let mut inner = self.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}
