//! wspub server - WebSocket publish/subscribe relay.
//!
//! Publishers push frames into named streams; subscribers holding a token for
//! a stream receive every frame published to it, in order.
//!
//! # Architecture
//!
//! - [`registrar::Registrar`] maps stream ids to [`hub::Hub`]s, creating them
//!   lazily.
//! - Each [`hub::Hub`] is an actor task that owns its subscriber set and fans
//!   frames out to per-connection [`queue::OutboundQueue`]s. A full queue is
//!   drained and refilled with the newest frame instead of blocking the hub.
//! - [`connection`] runs the per-socket read and write loops.
//! - [`tokens::TokenManager`] records which token grants access to which
//!   stream.
//! - [`routes`] exposes all of it over HTTP and WebSocket on two listeners.
//!
//! Nothing is persisted; frames exist only in memory while in flight.

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod queue;
pub mod registrar;
pub mod routes;
pub mod tokens;
pub mod types;
