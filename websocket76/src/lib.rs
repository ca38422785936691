#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

//! A callback-driven client for the early (hixie-76) WebSocket protocol.
//!
//! The protocol engine is [`WebSocket`], a single-threaded state machine that performs no
//! I/O of its own: it records its intents on a [`Transport`] and consumes transport events
//! through its `on_*` methods, dispatching lifecycle and message events to the optional
//! [`EventHandlers`] slots. [`Client`] is a ready-made Tokio driver that pairs the machine
//! with a TCP stream (or a TLS stream, with the `ssl-native-tls` feature).
//!
//! The wire protocol logic itself lives in the `websocket76-codec` crate.

mod client;
mod connection;
mod endpoint;
#[cfg(feature = "ssl-native-tls")]
mod ssl;

pub use crate::client::{Client, Handle};
pub use crate::connection::{CommandQueue, ConnectionState, EventHandlers, Transport, TransportCommand, WebSocket};
pub use crate::endpoint::Endpoint;

pub use websocket76_codec::{expected_challenge, verify_challenge, Challenge, HandshakeKeys, TextFrameCodec};

use std::io;

use tokio::io::{AsyncRead, AsyncWrite};

/// Used by [`Client`] to represent types that are `AsyncRead` and `AsyncWrite`.
pub trait AsyncNetworkStream: AsyncRead + AsyncWrite {}

impl<S> AsyncNetworkStream for S where S: AsyncRead + AsyncWrite {}

/// Represents errors reported by a connection.
///
/// `Connection`, `Handshake` and `Timeout` are fatal: they move the connection to the
/// failed state and are reported through the failure handler exactly once. The machine
/// never retries; a new connection must be constructed for another attempt.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport failed while connecting, reading or writing.
    #[error("connection failed: {0}")]
    Connection(#[from] io::Error),

    /// The server's handshake response was malformed, carried an unexpected status
    /// code or did not echo the expected challenge digest.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection did not reach the open state within the configured timeout.
    #[error("timed out while opening the connection")]
    Timeout,

    /// `open` was called on a connection that had already been started.
    #[error("connection already started")]
    AlreadyStarted,

    /// `send` was called while the connection was not open.
    #[error("connection is not open")]
    NotOpen,

    /// The message cannot be represented as a text frame.
    #[error("unsendable message: {0}")]
    BadMessage(String),

    /// The endpoint URL is not a usable WebSocket URL.
    #[error("invalid WebSocket URL: {0}")]
    Url(String),
}

/// Represents results returned by this crate.
pub type Result<T> = std::result::Result<T, Error>;
