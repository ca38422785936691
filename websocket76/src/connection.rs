use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use websocket76_codec::{parse_response, verify_challenge, Challenge, HandshakeKeys, TextFrameCodec, CHALLENGE_LEN};

use crate::endpoint::Endpoint;
use crate::{Error, Result};

/// The byte-stream transport a [`WebSocket`] drives.
///
/// The machine performs no I/O of its own. Each method records an intent; the driver
/// that owns the transport carries it out and reports the outcome back through the
/// machine's `on_*` methods. Implementations must preserve the order of `write` calls,
/// and are responsible for TLS when the endpoint requires it.
pub trait Transport {
    /// Requests a connection to the given host and port.
    fn connect(&mut self, host: &str, port: u16);

    /// Queues bytes to be written to the peer.
    fn write(&mut self, data: Bytes);

    /// Requests that the connection be shut down.
    fn disconnect(&mut self);
}

/// A buffered transport intent, produced by a [`WebSocket`] through [`CommandQueue`]
/// and consumed by the driver that owns the actual stream.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportCommand {
    /// Open a connection to the host and port.
    Connect {
        /// Host name or address to connect to.
        host: String,
        /// TCP port to connect to.
        port: u16,
    },
    /// Write the bytes to the peer, after any previously queued writes.
    Write(Bytes),
    /// Shut the connection down.
    Disconnect,
}

/// A [`Transport`] that queues commands for an external driver to execute.
#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: VecDeque<TransportCommand>,
}

impl CommandQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the oldest queued command.
    pub fn pop(&mut self) -> Option<TransportCommand> {
        self.commands.pop_front()
    }
}

impl Transport for CommandQueue {
    fn connect(&mut self, host: &str, port: u16) {
        self.commands.push_back(TransportCommand::Connect {
            host: host.to_owned(),
            port,
        });
    }

    fn write(&mut self, data: Bytes) {
        self.commands.push_back(TransportCommand::Write(data));
    }

    fn disconnect(&mut self) {
        self.commands.push_back(TransportCommand::Disconnect);
    }
}

/// Lifecycle of a single connection attempt.
///
/// States advance monotonically in the order listed here; `Failed` is additionally
/// reachable from every non-terminal state. `Closed` and `Failed` are terminal: once
/// either is reached the machine emits no further events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    /// `open` has not been called yet.
    Idle,
    /// Waiting for the transport to connect.
    Connecting,
    /// The handshake request has been written; waiting for the response head.
    HandshakeSent,
    /// The response head was parsed; waiting for the 16-byte challenge body.
    HandshakeHeadersReceived,
    /// The handshake completed; messages may flow.
    Open,
    /// `close` was called; waiting for the transport to confirm shutdown.
    Closing,
    /// The connection shut down.
    Closed,
    /// The connection failed; the error was passed to the failure handler.
    Failed,
}

impl ConnectionState {
    /// Returns `true` for the two terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Optional callbacks for lifecycle and message events.
///
/// Every slot starts empty; an event with no handler is dropped. Handlers run on the
/// thread driving the machine, from inside the `WebSocket` method that produced the
/// event, so they cannot call back into the machine; to send or close in reaction to
/// an event, queue a request with the driver instead (for [`Client`](crate::Client),
/// through a [`Handle`](crate::Handle)).
#[derive(Default)]
pub struct EventHandlers {
    opened: Option<Box<dyn FnMut() + Send>>,
    closed: Option<Box<dyn FnMut() + Send>>,
    failed: Option<Box<dyn FnMut(&Error) + Send>>,
    message_received: Option<Box<dyn FnMut(&str) + Send>>,
    message_sent: Option<Box<dyn FnMut() + Send>>,
}

impl EventHandlers {
    /// Creates a set of handlers with every slot empty.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler invoked once when the connection reaches the open state.
    pub fn on_opened<F: FnMut() + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.opened = Some(Box::new(f));
        self
    }

    /// Sets the handler invoked once when the connection shuts down cleanly.
    pub fn on_closed<F: FnMut() + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.closed = Some(Box::new(f));
        self
    }

    /// Sets the handler invoked once if the connection fails.
    pub fn on_failed<F: FnMut(&Error) + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.failed = Some(Box::new(f));
        self
    }

    /// Sets the handler invoked for every received text message, in arrival order.
    pub fn on_message_received<F: FnMut(&str) + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.message_received = Some(Box::new(f));
        self
    }

    /// Sets the handler invoked after a sent message is accepted by the transport.
    pub fn on_message_sent<F: FnMut() + Send + 'static>(&mut self, f: F) -> &mut Self {
        self.message_sent = Some(Box::new(f));
        self
    }
}

/// A client connection: the hixie-76 handshake and text framing over a [`Transport`].
///
/// The machine is strictly single-threaded. Every state transition happens inside one
/// of the public methods, which must all be called from the thread (or task) that
/// delivers transport events; there is no internal locking. The transport is owned by
/// the machine for its whole lifetime. [`Client`](crate::Client) is a ready-made Tokio
/// driver; custom drivers implement [`Transport`] and feed the `on_*` methods.
pub struct WebSocket<T> {
    endpoint: Endpoint,
    transport: T,
    handlers: EventHandlers,
    state: ConnectionState,
    buf: BytesMut,
    codec: TextFrameCodec,
    expected: Option<Challenge>,
    failure: Option<Error>,
}

impl<T: Transport> WebSocket<T> {
    /// Creates an idle connection for the endpoint over the given transport.
    pub fn new(endpoint: Endpoint, transport: T) -> Self {
        WebSocket {
            endpoint,
            transport,
            handlers: EventHandlers::new(),
            state: ConnectionState::Idle,
            buf: BytesMut::new(),
            codec: TextFrameCodec,
            expected: None,
            failure: None,
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns `true` while messages may be sent and received.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Returns the endpoint this connection targets.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the handler slots, for attaching event callbacks.
    pub fn handlers_mut(&mut self) -> &mut EventHandlers {
        &mut self.handlers
    }

    /// Returns the transport, typically so a driver can drain queued commands.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Takes the error that moved the connection to [`ConnectionState::Failed`].
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// Starts the connection attempt.
    ///
    /// Valid only while idle. Calling `open` on a connection that was already started
    /// fails it and reports [`Error::AlreadyStarted`] through the failure handler.
    pub fn open(&mut self) {
        if self.state != ConnectionState::Idle {
            self.fail(Error::AlreadyStarted);
            return;
        }

        self.state = ConnectionState::Connecting;
        self.transport.connect(self.endpoint.host(), self.endpoint.port());
    }

    /// Tells the machine that the transport finished connecting.
    ///
    /// Generates fresh handshake keys, writes the request (head plus the eight key-3
    /// bytes) and stores the expected challenge digest for later comparison. Ignored
    /// unless the connection is waiting for the transport, so a late connect after a
    /// timeout or `close` has no effect.
    pub fn on_transport_connected(&mut self) {
        if self.state != ConnectionState::Connecting {
            return;
        }

        self.send_handshake(HandshakeKeys::generate());
    }

    fn send_handshake(&mut self, keys: HandshakeKeys) {
        let head = self.endpoint.handshake_request(&keys);
        let mut request = BytesMut::with_capacity(head.len() + keys.key3().len());
        request.extend_from_slice(head.as_bytes());
        request.extend_from_slice(keys.key3());

        self.expected = Some(keys.expected_challenge());
        self.transport.write(request.freeze());
        self.state = ConnectionState::HandshakeSent;
    }

    /// Feeds bytes read from the transport into the machine.
    ///
    /// During the handshake this advances the response parsing and the challenge
    /// check; once open it decodes text frames and invokes the message handler for
    /// each one, in arrival order. Bytes arriving in any other state are discarded,
    /// so no message event can fire after `close` or a failure, even for data that
    /// was already in flight.
    pub fn on_bytes_received(&mut self, data: &[u8]) {
        match self.state {
            ConnectionState::HandshakeSent
            | ConnectionState::HandshakeHeadersReceived
            | ConnectionState::Open => {}
            _ => return,
        }

        self.buf.extend_from_slice(data);

        if self.state == ConnectionState::HandshakeSent {
            match parse_response(&self.buf) {
                Ok(Some(head)) => {
                    self.buf.advance(head.len());
                    self.state = ConnectionState::HandshakeHeadersReceived;
                }
                Ok(None) => return,
                Err(e) => {
                    self.fail(Error::Handshake(e.to_string()));
                    return;
                }
            }
        }

        if self.state == ConnectionState::HandshakeHeadersReceived {
            if self.buf.len() < CHALLENGE_LEN {
                return;
            }

            let received = self.buf.split_to(CHALLENGE_LEN);
            let matches = self
                .expected
                .map_or(false, |expected| verify_challenge(&expected, &received));

            if !matches {
                self.fail(Error::Handshake("challenge digest mismatch".to_owned()));
                return;
            }

            self.state = ConnectionState::Open;
            self.emit_opened();
        }

        if self.state == ConnectionState::Open {
            // Anything beyond the challenge bytes is already the start of the first
            // frame, so it goes straight to the frame codec.
            self.drain_frames();
        }
    }

    fn drain_frames(&mut self) {
        loop {
            match self.codec.decode(&mut self.buf) {
                Ok(Some(message)) => self.emit_message_received(&message),
                Ok(None) => return,
                // Invalid UTF-8 affects only the one frame, and the codec has already
                // consumed it. Keep scanning; the connection stays open.
                Err(_) => {}
            }
        }
    }

    /// Encodes and sends a text message.
    ///
    /// Valid only while open: in any other state this returns [`Error::NotOpen`] and
    /// leaves the connection untouched. On success the message-sent handler fires as
    /// soon as the bytes are accepted by the transport; writes are queued in call
    /// order, so messages arrive on the wire in the order they were sent.
    pub fn send(&mut self, message: &str) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(Error::NotOpen);
        }

        let mut frame = BytesMut::with_capacity(message.len() + 2);
        self.codec
            .encode(message, &mut frame)
            .map_err(|e| Error::BadMessage(e.to_string()))?;

        self.transport.write(frame.freeze());
        self.emit_message_sent();
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Safe to call in any state and any number of times, including mid-handshake.
    /// The closed handler fires exactly once, when the transport confirms shutdown.
    pub fn close(&mut self) {
        if self.state.is_terminal() || self.state == ConnectionState::Closing {
            return;
        }

        self.state = ConnectionState::Closing;
        self.transport.disconnect();
    }

    /// Tells the machine that the transport shut down.
    ///
    /// Moves any non-terminal connection to `Closed` and fires the closed handler;
    /// ignored once a terminal state was reached.
    pub fn on_transport_closed(&mut self) {
        if self.state.is_terminal() {
            return;
        }

        self.state = ConnectionState::Closed;
        self.emit_closed();
    }

    /// Tells the machine that the transport failed.
    ///
    /// Moves any non-terminal connection to `Failed` and fires the failure handler.
    pub fn on_transport_error(&mut self, err: io::Error) {
        self.fail(Error::Connection(err));
    }

    /// Tells the machine that the open timeout elapsed.
    ///
    /// Only has an effect while the connection is still on its way to open; once it is
    /// open, closing or done, a late timer is ignored.
    pub fn on_open_timeout(&mut self) {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::HandshakeSent
            | ConnectionState::HandshakeHeadersReceived => self.fail(Error::Timeout),
            _ => {}
        }
    }

    fn fail(&mut self, err: Error) {
        if self.state.is_terminal() {
            return;
        }

        self.state = ConnectionState::Failed;
        self.transport.disconnect();
        self.emit_failed(&err);
        self.failure = Some(err);
    }

    fn emit_opened(&mut self) {
        if let Some(f) = self.handlers.opened.as_mut() {
            f();
        }
    }

    fn emit_closed(&mut self) {
        if let Some(f) = self.handlers.closed.as_mut() {
            f();
        }
    }

    fn emit_failed(&mut self, err: &Error) {
        if let Some(f) = self.handlers.failed.as_mut() {
            f(err);
        }
    }

    fn emit_message_received(&mut self, message: &str) {
        if let Some(f) = self.handlers.message_received.as_mut() {
            f(message);
        }
    }

    fn emit_message_sent(&mut self) {
        if let Some(f) = self.handlers.message_sent.as_mut() {
            f();
        }
    }
}
