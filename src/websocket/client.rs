use anyhow::{anyhow, bail, Result};
use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::handshake::{accept_key, WEBSOCKET_VERSION};
use super::{Role, WebSocket};

const MAX_RESPONSE_HEAD: usize = 8192;

/// Opens a WebSocket connection to `address` and upgrades `path` on it
pub async fn connect(address: &str, path: &str) -> Result<WebSocket<TcpStream>> {
    let mut stream = TcpStream::connect(address).await?;
    let key = base64::encode(rand::random::<[u8; 16]>());

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {address}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: {WEBSOCKET_VERSION}\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut buffer = BytesMut::with_capacity(1024);
    let head_len = loop {
        if let Some(i) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
        if buffer.len() > MAX_RESPONSE_HEAD {
            bail!("upgrade response head too large");
        }
        if stream.read_buf(&mut buffer).await? == 0 {
            bail!("connection closed during handshake");
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_len]).into_owned();
    buffer.advance(head_len);
    check_response(&head, &accept_key(&key))?;
    debug!(address, path, "websocket handshake completed");

    Ok(WebSocket::from_parts(stream, Role::Client, buffer))
}

fn check_response(head: &str, expected_accept: &str) -> Result<()> {
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    if status_line.split_whitespace().nth(1) != Some("101") {
        bail!("server refused upgrade: {}", status_line);
    }

    let accept = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Sec-WebSocket-Accept"))
        .map(|(_, value)| value.trim())
        .ok_or_else(|| anyhow!("missing Sec-WebSocket-Accept header"))?;
    if accept != expected_accept {
        bail!("unexpected Sec-WebSocket-Accept value {}", accept);
    }
    Ok(())
}
