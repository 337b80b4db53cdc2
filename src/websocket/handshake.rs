use httpstatus::StatusCode;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::http_request::{Method, Request};

const WEBSOCKET_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
pub const WEBSOCKET_VERSION: &str = "13";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("websocket upgrade requires GET, got {0}")]
    Method(String),
    #[error("missing `Connection: Upgrade` header")]
    Connection,
    #[error("missing `Upgrade: websocket` header")]
    Upgrade,
    #[error("unsupported websocket version, expected 13")]
    Version,
    #[error("missing or invalid `Sec-WebSocket-Key` header")]
    Key,
    #[error("origin `{0}` does not match host")]
    Origin(String),
}

impl HandshakeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandshakeError::Method(_) => StatusCode::MethodNotAllowed,
            HandshakeError::Version => StatusCode::UpgradeRequired,
            HandshakeError::Origin(_) => StatusCode::Forbidden,
            _ => StatusCode::BadRequest,
        }
    }
}

/// Computes `Sec-WebSocket-Accept` for a client key
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID);
    base64::encode(hasher.finalize())
}

/// Checks an upgrade request and returns the accept key for the 101 response
pub fn validate(request: &Request) -> Result<String, HandshakeError> {
    match request.method {
        Some(Method::GET) => {}
        Some(method) => return Err(HandshakeError::Method(method.to_string())),
        None => return Err(HandshakeError::Method(String::new())),
    }

    if !request.headers.contains_token("Connection", "upgrade") {
        return Err(HandshakeError::Connection);
    }
    if !request.headers.contains_token("Upgrade", "websocket") {
        return Err(HandshakeError::Upgrade);
    }
    if request.headers.get_str("Sec-WebSocket-Version") != Ok(WEBSOCKET_VERSION) {
        return Err(HandshakeError::Version);
    }

    let key = request
        .headers
        .get_str("Sec-WebSocket-Key")
        .map_err(|_| HandshakeError::Key)?
        .trim();
    match base64::decode(key) {
        Ok(decoded) if decoded.len() == 16 => {}
        _ => return Err(HandshakeError::Key),
    }

    check_same_origin(request)?;

    Ok(accept_key(key))
}

// Browsers always send Origin; requests without one are not cross-site
fn check_same_origin(request: &Request) -> Result<(), HandshakeError> {
    let origin = match request.headers.get_str("Origin") {
        Ok(origin) => origin,
        Err(_) => return Ok(()),
    };

    let origin_host = origin
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(rest))
        .unwrap_or("");
    let host = request.headers.get_str("Host").unwrap_or("");

    if origin_host.is_empty() || !origin_host.eq_ignore_ascii_case(host) {
        return Err(HandshakeError::Origin(origin.to_string()));
    }
    Ok(())
}
