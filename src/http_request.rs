use bytes::{Buf, Bytes};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::tokens;

const MAX_HEADERS: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("invalid header name")]
    HeaderName,
    #[error("invalid header value")]
    HeaderValue,
    #[error("invalid version")]
    Version,
    #[error("invalid newline")]
    NewLine,
    #[error("invalid token")]
    Token,
    #[error("unsupported method `{0}`")]
    Method(String),
    #[error("invalid uri")]
    URI,
    #[error("too many headers")]
    TooManyHeaders,
    #[error("missing header `{0}`")]
    MissingHeader(String),
    #[error("invalid content length")]
    ContentLength,
}

// Bail out with `Ok(None)` when the buffer ends before the element does
macro_rules! complete {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(None),
        }
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    pub fn from_token(token: &str) -> Result<Self, RequestError> {
        Ok(match token {
            "GET" => Method::GET,
            "HEAD" => Method::HEAD,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "CONNECT" => Method::CONNECT,
            "OPTIONS" => Method::OPTIONS,
            "TRACE" => Method::TRACE,
            "PATCH" => Method::PATCH,
            other => return Err(RequestError::Method(other.to_string())),
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request headers, keyed by lowercased name.
///
/// Repeated headers are folded into one comma-separated value.
#[derive(Debug, Default)]
pub struct Headers {
    headers: BTreeMap<String, Vec<u8>>,
}

impl Headers {
    pub fn insert(&mut self, name: &str, value: &[u8]) {
        let entry = self.headers.entry(name.to_ascii_lowercase()).or_default();
        if !entry.is_empty() {
            entry.extend_from_slice(b", ");
        }
        entry.extend_from_slice(value);
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Result<&str, RequestError> {
        let value = self
            .get(name)
            .ok_or_else(|| RequestError::MissingHeader(name.to_string()))?;
        std::str::from_utf8(value).map_err(|_| RequestError::HeaderValue)
    }

    /// Checks a comma-separated header for a token, ignoring case
    pub fn contains_token(&self, name: &str, token: &str) -> bool {
        match self.get_str(name) {
            Ok(value) => value
                .split(',')
                .any(|part| part.trim().eq_ignore_ascii_case(token)),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<u8>)> {
        self.headers.iter()
    }
}

#[derive(Debug, Default)]
pub struct Request {
    /// The request method, such as `GET`.
    pub method: Option<Method>,
    /// The request target, such as `/about-us?lang=en`.
    pub path: Option<String>,
    /// The minor request version, `1` for `HTTP/1.1`.
    pub version: Option<u8>,
    /// The request headers.
    pub headers: Headers,
    /// The request body, filled in by the server once `Content-Length` bytes arrived.
    pub body: Bytes,
}

impl Request {
    // Creates a new Request
    pub fn new() -> Self {
        Request::default()
    }

    /// Parses a request head.
    ///
    /// Returns `Ok(None)` if `buf` does not yet hold the whole head and
    /// `Ok(Some(len))` with the length of the head (including the blank line) otherwise.
    pub fn parse(&mut self, buf: &[u8]) -> Result<Option<usize>, RequestError> {
        let mut bytes = buf;
        let method = complete!(Request::parse_token(&mut bytes));
        let path = complete!(Request::parse_uri(&mut bytes));
        let version = complete!(Request::parse_version(&mut bytes));
        complete!(Request::parse_new_line(&mut bytes));

        let mut headers = Headers::default();
        complete!(Request::parse_headers(&mut bytes, &mut headers));

        self.method = Some(Method::from_token(&method)?);
        self.path = Some(path);
        self.version = Some(version);
        self.headers = headers;

        Ok(Some(buf.len() - bytes.len()))
    }

    /// The request path without its query string
    pub fn route_path(&self) -> &str {
        let path = self.path.as_deref().unwrap_or("");
        match path.find('?') {
            Some(i) => &path[..i],
            None => path,
        }
    }

    pub fn content_length(&self) -> Result<usize, RequestError> {
        match self.headers.get_str("Content-Length") {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|_| RequestError::ContentLength),
            Err(RequestError::MissingHeader(_)) => Ok(0),
            Err(_) => Err(RequestError::ContentLength),
        }
    }

    pub fn is_chunked(&self) -> bool {
        self.headers.get("Transfer-Encoding").is_some()
    }

    pub fn keep_alive(&self) -> bool {
        match self.version {
            Some(1) => !self.headers.contains_token("Connection", "close"),
            _ => self.headers.contains_token("Connection", "keep-alive"),
        }
    }

    fn parse_headers(
        bytes: &mut &[u8],
        headers: &mut Headers,
    ) -> Result<Option<()>, RequestError> {
        let mut count = 0;
        loop {
            match bytes.first() {
                None => return Ok(None),
                Some(b'\r') | Some(b'\n') => return Request::parse_new_line(bytes),
                Some(_) => {}
            }

            if count == MAX_HEADERS {
                return Err(RequestError::TooManyHeaders);
            }

            let name = complete!(Request::parse_header_name(bytes));

            while matches!(bytes.first(), Some(b' ') | Some(b'\t')) {
                bytes.advance(1);
            }

            let mut end = None;
            for (i, b) in bytes.iter().enumerate() {
                if *b == b'\r' || *b == b'\n' {
                    end = Some(i);
                    break;
                } else if !tokens::is_header_value_token(*b) {
                    return Err(RequestError::HeaderValue);
                }
            }
            let end = match end {
                Some(end) => end,
                None => return Ok(None),
            };

            let value = bytes[..end]
                .iter()
                .rposition(|b| *b != b' ' && *b != b'\t')
                .map_or(&bytes[..0], |last| &bytes[..=last]);
            headers.insert(&name, value);
            bytes.advance(end);
            complete!(Request::parse_new_line(bytes));
            count += 1;
        }
    }

    fn parse_header_name(bytes: &mut &[u8]) -> Result<Option<String>, RequestError> {
        for (i, b) in bytes.iter().enumerate() {
            if *b == b':' {
                if i == 0 {
                    return Err(RequestError::HeaderName);
                }
                // token chars are ASCII
                let name = String::from_utf8_lossy(&bytes[..i]).into_owned();
                bytes.advance(i + 1);
                return Ok(Some(name));
            } else if !tokens::is_token(*b) {
                return Err(RequestError::HeaderName);
            }
        }
        Ok(None)
    }

    fn parse_new_line(bytes: &mut &[u8]) -> Result<Option<()>, RequestError> {
        match bytes.first() {
            None => Ok(None),
            Some(b'\r') => match bytes.get(1) {
                None => Ok(None),
                Some(b'\n') => {
                    bytes.advance(2);
                    Ok(Some(()))
                }
                Some(_) => Err(RequestError::NewLine),
            },
            Some(b'\n') => {
                bytes.advance(1);
                Ok(Some(()))
            }
            Some(_) => Err(RequestError::NewLine),
        }
    }

    fn parse_version(bytes: &mut &[u8]) -> Result<Option<u8>, RequestError> {
        if bytes.len() < 8 {
            return if b"HTTP/1.".starts_with(&bytes[..bytes.len().min(7)]) {
                Ok(None)
            } else {
                Err(RequestError::Version)
            };
        }
        let res = match &bytes[..8] {
            b"HTTP/1.0" => 0,
            b"HTTP/1.1" => 1,
            _ => return Err(RequestError::Version),
        };
        bytes.advance(8);
        Ok(Some(res))
    }

    fn parse_uri(bytes: &mut &[u8]) -> Result<Option<String>, RequestError> {
        for (i, b) in bytes.iter().enumerate() {
            if *b == b' ' {
                if i == 0 {
                    return Err(RequestError::URI);
                }
                let uri = std::str::from_utf8(&bytes[..i])
                    .map_err(|_| RequestError::URI)?
                    .to_string();
                bytes.advance(i + 1);
                return Ok(Some(uri));
            } else if !tokens::is_uri_token(*b) {
                return Err(RequestError::URI);
            }
        }
        Ok(None)
    }

    fn parse_token(bytes: &mut &[u8]) -> Result<Option<String>, RequestError> {
        for (i, b) in bytes.iter().enumerate() {
            if *b == b' ' {
                if i == 0 {
                    return Err(RequestError::Token);
                }
                let token = std::str::from_utf8(&bytes[..i])
                    .map_err(|_| RequestError::Token)?
                    .to_string();
                bytes.advance(i + 1);
                return Ok(Some(token));
            } else if !tokens::is_token(*b) {
                return Err(RequestError::Token);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_requests() {
        let mut request = Request::new();
        let raw = b"GET /test HTTP/1.1\r\n\r\n";

        let len = request.parse(raw).expect("parsing request");

        assert_eq!(len, Some(raw.len()));
        assert_eq!(request.version, Some(1));
        assert_eq!(request.method, Some(Method::GET));
        assert_eq!(request.path, Some(String::from("/test")));
    }

    #[test]
    fn accept_only_newline() {
        let mut request = Request::new();

        request
            .parse(b"GET /test HTTP/1.0\nHost: localhost\n\n")
            .expect("parsing request")
            .expect("complete request");

        assert_eq!(request.version, Some(0));
        assert_eq!(request.headers.get_str("host"), Ok("localhost"));
    }

    #[test]
    fn do_not_accept_only_cr() {
        let mut request = Request::new();

        request
            .parse(b"GET /test HTTP/1.1\rX")
            .expect_err("parsing request");
    }

    #[test]
    fn partial_requests_need_more_data() {
        let raw = b"GET /v1/ws HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";
        for end in 0..raw.len() {
            let mut request = Request::new();
            assert_eq!(request.parse(&raw[..end]), Ok(None), "prefix of {} bytes", end);
        }

        let mut request = Request::new();
        assert_eq!(request.parse(raw), Ok(Some(raw.len())));
    }

    #[test]
    fn head_length_excludes_body() {
        let mut request = Request::new();
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";

        assert_eq!(request.parse(raw), Ok(Some(raw.len() - 5)));
        assert_eq!(request.content_length(), Ok(5));
        assert_eq!(request.method, Some(Method::POST));
    }

    #[test]
    fn headers_are_case_insensitive_and_trimmed() {
        let mut request = Request::new();
        request
            .parse(b"GET / HTTP/1.1\r\nsec-websocket-key:   abc  \r\nConnection: keep-alive, Upgrade\r\n\r\n")
            .unwrap();

        assert_eq!(request.headers.get_str("Sec-WebSocket-Key"), Ok("abc"));
        assert!(request.headers.contains_token("connection", "upgrade"));
        assert!(!request.headers.contains_token("connection", "close"));
        assert_eq!(
            request.headers.get_str("Origin"),
            Err(RequestError::MissingHeader("Origin".to_string()))
        );
    }

    #[test]
    fn repeated_headers_are_folded() {
        let mut request = Request::new();
        request
            .parse(b"GET / HTTP/1.1\r\nConnection: keep-alive\r\nConnection: Upgrade\r\n\r\n")
            .unwrap();

        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.headers.get_str("connection"), Ok("keep-alive, Upgrade"));
    }

    #[test]
    fn reject_invalid_heads() {
        let cases: &[(&[u8], RequestError)] = &[
            (b"G(T / HTTP/1.1\r\n\r\n", RequestError::Token),
            (b"BREW / HTTP/1.1\r\n\r\n", RequestError::Method("BREW".to_string())),
            (b"GET /<x> HTTP/1.1\r\n\r\n", RequestError::URI),
            (b"GET / HTTP/2.0\r\n\r\n", RequestError::Version),
            (b"GET / HTTP/1.1\r\nBad Name: x\r\n\r\n", RequestError::HeaderName),
            (b"GET / HTTP/1.1\r\n: x\r\n\r\n", RequestError::HeaderName),
            (b"GET / HTTP/1.1\r\nName: a\x7fb\r\n\r\n", RequestError::HeaderValue),
        ];

        for (raw, err) in cases {
            let mut request = Request::new();
            assert_eq!(request.parse(raw).as_ref(), Err(err));
        }
    }

    #[test]
    fn too_many_headers() {
        let mut raw = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..=MAX_HEADERS {
            raw.extend_from_slice(format!("X-Header-{}: {}\r\n", i, i).as_bytes());
        }
        raw.extend_from_slice(b"\r\n");

        let mut request = Request::new();
        assert_eq!(request.parse(&raw), Err(RequestError::TooManyHeaders));
    }

    #[test]
    fn keep_alive_defaults() {
        let mut request = Request::new();
        request.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(request.keep_alive());

        let mut request = Request::new();
        request.parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap();
        assert!(!request.keep_alive());

        let mut request = Request::new();
        request.parse(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        assert!(!request.keep_alive());

        let mut request = Request::new();
        request.parse(b"GET / HTTP/1.0\r\nConnection: Keep-Alive\r\n\r\n").unwrap();
        assert!(request.keep_alive());
    }

    #[test]
    fn route_path_strips_query() {
        let mut request = Request::new();
        request.parse(b"GET /v1/ws?token=1 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.route_path(), "/v1/ws");
    }
}
