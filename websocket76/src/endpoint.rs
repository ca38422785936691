use std::fmt;
use std::time::Duration;

use url::Url;

use websocket76_codec::HandshakeKeys;

use crate::{Error, Result};

macro_rules! writeok {
    ($dst:expr, $($arg:tt)*) => {
        let _ = fmt::Write::write_fmt(&mut $dst, format_args!($($arg)*));
    }
}

/// Describes the server a connection attempt targets.
///
/// An `Endpoint` is immutable once a connection starts: the URL, origin, cookie and
/// open timeout are all fixed when the [`WebSocket`](crate::WebSocket) is created.
#[derive(Clone, Debug)]
pub struct Endpoint {
    url: Url,
    origin: String,
    pub(crate) cookie: Option<String>,
    pub(crate) timeout: Option<Duration>,
}

impl Endpoint {
    /// Parses a `ws://...` or `wss://...` URL.
    ///
    /// The `Origin` header value defaults to the corresponding `http` or `https` URL
    /// for the target host; use [`origin`](Endpoint::origin) to override it.
    ///
    /// # Errors
    ///
    /// Fails when the URL does not parse, has a scheme other than `ws` or `wss`, or
    /// has no host.
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::Url(e.to_string()))?;
        let origin_scheme = match url.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => return Err(Error::Url(format!("unsupported scheme {:?}", other))),
        };

        let host = url
            .host_str()
            .ok_or_else(|| Error::Url("missing host".to_owned()))?;

        let origin = format!("{scheme}://{host}", scheme = origin_scheme, host = host);
        Ok(Endpoint {
            url,
            origin,
            cookie: None,
            timeout: None,
        })
    }

    /// Replaces the `Origin` header value sent during the handshake.
    #[must_use]
    pub fn origin(mut self, origin: &str) -> Self {
        self.origin = origin.to_owned();
        self
    }

    /// Sets the `Cookie` header sent during the handshake.
    #[must_use]
    pub fn cookie(mut self, cookie: &str) -> Self {
        self.cookie = Some(cookie.to_owned());
        self
    }

    /// Sets how long `open` may take before the connection fails with a timeout error.
    ///
    /// Without a timeout, a connection attempt waits for the transport or the server
    /// indefinitely.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the host to connect to.
    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    /// Returns the port to connect to, falling back to the default for the scheme.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Returns `true` if the endpoint calls for an encrypted transport.
    #[must_use]
    pub fn uses_tls(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// Formats the handshake request head for this endpoint.
    ///
    /// The eight key-3 bytes follow the head as the request body; they are not part of
    /// the returned string.
    #[must_use]
    pub fn handshake_request(&self, keys: &HandshakeKeys) -> String {
        let mut s = String::new();
        writeok!(s, "GET {path}", path = self.url.path());
        if let Some(query) = self.url.query() {
            writeok!(s, "?{query}", query = query);
        }

        s += " HTTP/1.1\r\n\
              Upgrade: WebSocket\r\n\
              Connection: Upgrade\r\n";

        if let Some(host) = self.url.host() {
            writeok!(s, "Host: {host}", host = host);
            if let Some(port) = self.url.port() {
                writeok!(s, ":{port}", port = port);
            }

            s += "\r\n";
        }

        writeok!(s, "Origin: {origin}\r\n", origin = self.origin);
        writeok!(s, "Sec-WebSocket-Key1: {key}\r\n", key = keys.key1().field());
        writeok!(s, "Sec-WebSocket-Key2: {key}\r\n", key = keys.key2().field());

        if let Some(cookie) = &self.cookie {
            writeok!(s, "Cookie: {cookie}\r\n", cookie = cookie);
        }

        s += "\r\n";
        s
    }
}
