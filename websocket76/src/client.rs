use std::io;
use std::result;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};

use crate::connection::{CommandQueue, EventHandlers, TransportCommand, WebSocket};
use crate::endpoint::Endpoint;
use crate::{AsyncNetworkStream, Result};

type Stream = Box<dyn AsyncNetworkStream + Send + Unpin>;

enum Request {
    Send(String),
    Close,
}

/// Queues requests into a running [`Client`] from outside its event loop.
///
/// Event handlers cannot call back into the connection, so they capture a `Handle`
/// instead; handles are cheap to clone and may also be used from other tasks.
/// Requests are processed in call order. A request is dropped silently when the
/// connection is not (or no longer) in a state to honour it: a `send` before the
/// connection opens or after it terminates goes nowhere.
#[derive(Clone)]
pub struct Handle {
    tx: UnboundedSender<Request>,
}

impl Handle {
    /// Queues a text message to be sent.
    pub fn send<S: Into<String>>(&self, message: S) {
        let _ = self.tx.send(Request::Send(message.into()));
    }

    /// Asks the connection to close.
    pub fn close(&self) {
        let _ = self.tx.send(Request::Close);
    }
}

/// Drives a [`WebSocket`] over a Tokio TCP stream.
///
/// The client owns the event loop: it executes the transport commands the machine
/// queues, feeds bytes read from the socket back into it, and applies the endpoint's
/// open timeout. `wss://...` endpoints are supported with the `ssl-native-tls`
/// feature.
pub struct Client {
    ws: WebSocket<CommandQueue>,
    rx: UnboundedReceiver<Request>,
}

impl Client {
    /// Creates a client for the endpoint, along with a [`Handle`] for talking to it
    /// once it runs.
    #[must_use]
    pub fn new(endpoint: Endpoint) -> (Self, Handle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Client {
            ws: WebSocket::new(endpoint, CommandQueue::new()),
            rx,
        };

        (client, Handle { tx })
    }

    /// Returns the handler slots, for attaching event callbacks before
    /// [`run`](Client::run).
    pub fn handlers_mut(&mut self) -> &mut EventHandlers {
        self.ws.handlers_mut()
    }

    /// Opens the connection and runs it to completion.
    ///
    /// Resolves and connects the TCP stream itself, wrapping it in TLS when the
    /// endpoint calls for it. Returns `Ok(())` once the connection has closed, or the
    /// error that failed it; either way the matching event has already been dispatched
    /// to the handlers.
    pub async fn run(self) -> Result<()> {
        self.drive(None).await
    }

    /// Runs the connection over an already established stream.
    ///
    /// The handshake is still performed. The stream is assumed to be connected to the
    /// endpoint, with TLS already set up if the scheme requires it.
    pub async fn run_on<S: AsyncNetworkStream + Send + Unpin + 'static>(self, stream: S) -> Result<()> {
        self.drive(Some(Box::new(stream))).await
    }

    async fn drive(mut self, mut stream: Option<Stream>) -> Result<()> {
        let preconnected = stream.is_some();
        let deadline = self.ws.endpoint().timeout.map(|t| Instant::now() + t);
        let mut requests_open = true;
        let mut buf = [0; 8 * 1024];

        self.ws.open();

        loop {
            // Carry out the transport intents the machine queued. Commands pushed
            // while handling one (the handshake write after a connect, for instance)
            // are picked up in the same pass.
            while let Some(command) = self.ws.transport_mut().pop() {
                match command {
                    TransportCommand::Connect { host, port } => {
                        if preconnected {
                            self.ws.on_transport_connected();
                            continue;
                        }

                        match connect(&host, port, deadline, self.ws.endpoint().uses_tls()).await {
                            Ok(s) => {
                                stream = Some(s);
                                self.ws.on_transport_connected();
                            }
                            Err(ConnectError::TimedOut) => self.ws.on_open_timeout(),
                            Err(ConnectError::Io(e)) => self.ws.on_transport_error(e),
                        }
                    }
                    TransportCommand::Write(data) => {
                        if let Some(s) = stream.as_mut() {
                            if let Err(e) = s.write_all(&data).await {
                                self.ws.on_transport_error(e);
                            }
                        }
                    }
                    TransportCommand::Disconnect => {
                        if let Some(mut s) = stream.take() {
                            let _ = s.shutdown().await;
                        }

                        self.ws.on_transport_closed();
                    }
                }
            }

            if self.ws.state().is_terminal() {
                break;
            }

            tokio::select! {
                _ = sleep_until_deadline(deadline), if deadline.is_some() && !self.ws.is_open() => {
                    self.ws.on_open_timeout();
                }
                request = self.rx.recv(), if requests_open => match request {
                    Some(Request::Send(message)) => {
                        let _ = self.ws.send(&message);
                    }
                    Some(Request::Close) => self.ws.close(),
                    None => requests_open = false,
                },
                received = read_some(stream.as_mut(), &mut buf) => match received {
                    Ok(0) => self.ws.on_transport_closed(),
                    Ok(n) => self.ws.on_bytes_received(&buf[..n]),
                    Err(e) => self.ws.on_transport_error(e),
                },
            }
        }

        match self.ws.take_failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

enum ConnectError {
    TimedOut,
    Io(io::Error),
}

async fn connect(
    host: &str,
    port: u16,
    deadline: Option<Instant>,
    tls: bool,
) -> result::Result<Stream, ConnectError> {
    let establish = establish(host, port, tls);
    match deadline {
        Some(deadline) => match time::timeout_at(deadline, establish).await {
            Ok(connected) => connected.map_err(ConnectError::Io),
            Err(_) => Err(ConnectError::TimedOut),
        },
        None => establish.await.map_err(ConnectError::Io),
    }
}

async fn establish(host: &str, port: u16, tls: bool) -> io::Result<Stream> {
    let stream = TcpStream::connect((host, port)).await?;

    #[cfg(feature = "ssl-native-tls")]
    if tls {
        let stream = crate::ssl::wrap(host, stream).await?;
        return Ok(Box::new(stream));
    }

    #[cfg(not(feature = "ssl-native-tls"))]
    if tls {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "wss endpoint, but TLS support is not compiled in",
        ));
    }

    Ok(Box::new(stream))
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn read_some(stream: Option<&mut Stream>, buf: &mut [u8]) -> io::Result<usize> {
    match stream {
        Some(stream) => stream.read(buf).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use websocket76_codec::expected_challenge;

    use crate::client::Client;
    use crate::endpoint::Endpoint;
    use crate::Error;

    fn header_value<'a>(request: &'a str, name: &str) -> &'a str {
        let prefix = format!("{}: ", name);
        request
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .unwrap()
    }

    fn key_number(field: &str) -> u32 {
        let digits: String = field.chars().filter(|c| c.is_ascii_digit()).collect();
        let spaces = field.matches(' ').count() as u64;
        (digits.parse::<u64>().unwrap() / spaces) as u32
    }

    /// Acts as a hixie-76 server on the other end of a duplex pipe: accepts the
    /// handshake by recomputing the challenge from the request, then echoes one frame.
    async fn accept_and_echo(mut server_io: DuplexStream) {
        let mut request = Vec::new();
        let mut byte = [0; 1];
        while !request.ends_with(b"\r\n\r\n") {
            server_io.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }

        let mut key3 = [0; 8];
        server_io.read_exact(&mut key3).await.unwrap();

        let request = String::from_utf8(request).unwrap();
        let key1 = key_number(header_value(&request, "Sec-WebSocket-Key1"));
        let key2 = key_number(header_value(&request, "Sec-WebSocket-Key2"));

        server_io
            .write_all(
                b"HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
                  Upgrade: WebSocket\r\n\
                  Connection: Upgrade\r\n\
                  \r\n",
            )
            .await
            .unwrap();
        server_io.write_all(&expected_challenge(key1, key2, &key3)).await.unwrap();

        let mut frame = Vec::new();
        loop {
            server_io.read_exact(&mut byte).await.unwrap();
            frame.push(byte[0]);
            if byte[0] == 0xff {
                break;
            }
        }

        server_io.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn opens_sends_and_receives() {
        let (client_io, server_io) = duplex(4096);
        let endpoint = Endpoint::new("ws://localhost:8000/chat")
            .unwrap()
            .timeout(Duration::from_secs(5));
        let (mut client, handle) = Client::new(endpoint);

        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            let handle = handle.clone();
            client.handlers_mut().on_opened(move || {
                events.lock().unwrap().push("opened".to_owned());
                handle.send("hi");
            });
        }
        {
            let events = events.clone();
            let handle = handle.clone();
            client.handlers_mut().on_message_received(move |message| {
                events.lock().unwrap().push(format!("message({})", message));
                handle.close();
            });
        }
        {
            let events = events.clone();
            client.handlers_mut().on_closed(move || {
                events.lock().unwrap().push("closed".to_owned());
            });
        }

        let server = tokio::spawn(accept_and_echo(server_io));
        client.run_on(client_io).await.unwrap();
        server.await.unwrap();

        assert_eq!(
            vec!["opened".to_owned(), "message(hi)".to_owned(), "closed".to_owned()],
            *events.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn times_out_when_the_server_stays_silent() {
        let (client_io, _server_io) = duplex(4096);
        let endpoint = Endpoint::new("ws://localhost:8000/chat")
            .unwrap()
            .timeout(Duration::from_millis(50));
        let (mut client, _handle) = Client::new(endpoint);

        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = events.clone();
            client.handlers_mut().on_opened(move || {
                events.lock().unwrap().push("opened".to_owned());
            });
        }
        {
            let events = events.clone();
            client.handlers_mut().on_failed(move |err| {
                events.lock().unwrap().push(format!("failed({})", matches!(err, Error::Timeout)));
            });
        }

        let err = client.run_on(client_io).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(vec!["failed(true)".to_owned()], *events.lock().unwrap());
    }

    #[tokio::test]
    async fn reports_a_rejected_handshake() {
        let (client_io, mut server_io) = duplex(4096);
        let endpoint = Endpoint::new("ws://localhost:8000/chat").unwrap();
        let (client, _handle) = Client::new(endpoint);

        let server = tokio::spawn(async move {
            let mut request = Vec::new();
            let mut byte = [0; 1];
            while !request.ends_with(b"\r\n\r\n") {
                server_io.read_exact(&mut byte).await.unwrap();
                request.push(byte[0]);
            }

            server_io.write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n").await.unwrap();
        });

        let err = client.run_on(client_io).await.unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
        server.await.unwrap();
    }
}
