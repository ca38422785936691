#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

//! A Tokio codec implementation of the early (hixie-76) WebSocket protocol.
//!
//! This crate does not do any I/O directly. It covers the protocol logic only: the numeric
//! key challenge sent during the handshake, the parser for the server's handshake response,
//! and the 0x00/0xFF-delimited text frame codec used once the connection is open. For a
//! full WebSocket client, see the `websocket76` crate.

#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod challenge;
mod frame;
mod handshake;

pub use crate::challenge::{expected_challenge, verify_challenge, Challenge, HandshakeKeys, SecKey, CHALLENGE_LEN, KEY3_LEN};
pub use crate::frame::TextFrameCodec;
pub use crate::handshake::{parse_response, ResponseHead};

use std::error;
use std::result;

/// Represents errors that can be exposed by this crate.
pub type Error = Box<dyn error::Error + 'static>;

/// Represents results returned by the non-async functions in this crate.
pub type Result<T> = result::Result<T, Error>;
