use std::collections::HashMap;
use std::fmt::Write;
use std::str;

use httparse::{Response, EMPTY_HEADER};

use crate::Result;

const SWITCHING_PROTOCOLS: u16 = 101;
const MAX_HEADERS: usize = 24;

/// A fully received handshake response head: status line plus headers.
///
/// The sixteen challenge bytes that complete the handshake follow the head on the wire
/// and are not part of this struct; [`len`](ResponseHead::len) tells the caller where
/// they start.
#[derive(Clone, Debug)]
pub struct ResponseHead {
    len: usize,
    code: u16,
    reason: String,
    headers: HashMap<String, String>,
}

impl ResponseHead {
    /// Returns the number of bytes occupied by the status line and headers, including
    /// the blank line that terminates them.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the HTTP status code of the response.
    #[must_use]
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Returns the reason phrase of the status line.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns the value of a header, matching the name case-insensitively.
    ///
    /// When the server repeats a header, the last occurrence wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Parses the server's handshake response out of the data received so far.
///
/// Returns `Ok(None)` until a complete head (status line, headers and the terminating
/// blank line) has been received; the caller keeps accumulating bytes and calls again
/// after the next read, so arrival in arbitrary chunks is fine. Bytes beyond the head
/// are ignored here.
///
/// # Errors
///
/// Fails when the response is not parseable as an HTTP response head, or when the
/// status code is not 101.
pub fn parse_response(data: &[u8]) -> Result<Option<ResponseHead>> {
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];
    let mut response = Response::new(&mut headers);
    let status = response.parse(data)?;
    if !status.is_complete() {
        return Ok(None);
    }

    let len = status.unwrap();
    let code = response.code.unwrap();
    if code != SWITCHING_PROTOCOLS {
        let mut error_message = format!("server responded with HTTP status {code}", code = code);

        if let Some(reason) = response.reason {
            write!(error_message, ": {:?}", reason).expect("formatting reason failed");
        }

        return Err(error_message.into());
    }

    let mut map = HashMap::new();
    for header in response.headers.iter() {
        let value = str::from_utf8(header.value)
            .map_err(|_| format!("{name} header is not valid UTF-8", name = header.name))?;
        map.insert(header.name.to_ascii_lowercase(), value.to_owned());
    }

    Ok(Some(ResponseHead {
        len,
        code,
        reason: response.reason.unwrap_or("").to_owned(),
        headers: map,
    }))
}

#[cfg(test)]
mod tests {
    use crate::handshake::parse_response;

    static RESPONSE: &[u8] = b"HTTP/1.1 101 WebSocket Protocol Handshake\r\n\
                               Upgrade: WebSocket\r\n\
                               Connection: Upgrade\r\n\
                               Sec-WebSocket-Origin: http://example.com\r\n\
                               \r\n";

    #[test]
    fn needs_more_data_until_blank_line() {
        for n in 0..RESPONSE.len() {
            assert!(parse_response(&RESPONSE[..n]).unwrap().is_none(), "prefix of {} bytes", n);
        }
    }

    #[test]
    fn parses_complete_head() {
        let head = parse_response(RESPONSE).unwrap().unwrap();
        assert_eq!(RESPONSE.len(), head.len());
        assert_eq!(101, head.code());
        assert_eq!("WebSocket Protocol Handshake", head.reason());
        assert_eq!(Some("WebSocket"), head.header("upgrade"));
        assert_eq!(Some("http://example.com"), head.header("SEC-WEBSOCKET-ORIGIN"));
        assert_eq!(None, head.header("cookie"));
    }

    #[test]
    fn trailing_bytes_do_not_change_consumed_count() {
        let mut data = RESPONSE.to_vec();
        data.extend_from_slice(b"sixteen challenge bytes and more");
        let head = parse_response(&data).unwrap().unwrap();
        assert_eq!(RESPONSE.len(), head.len());
    }

    #[test]
    fn duplicate_headers_are_last_wins() {
        let data = b"HTTP/1.1 101 OK\r\nX-Test: first\r\nX-Test: second\r\n\r\n";
        let head = parse_response(data).unwrap().unwrap();
        assert_eq!(Some("second"), head.header("x-test"));
    }

    #[test]
    fn rejects_unexpected_status_code() {
        let err = parse_response(b"HTTP/1.1 403 Forbidden\r\n\r\n").unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("Forbidden"));
    }

    #[test]
    fn rejects_malformed_header_line() {
        assert!(parse_response(b"HTTP/1.1 101 OK\r\nnot a header line\r\n\r\n").is_err());
    }

    #[test]
    fn rejects_non_http_data() {
        assert!(parse_response(b"\x00garbage\xff").is_err());
    }
}
