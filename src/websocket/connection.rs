use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use super::frame::{FrameHeader, OpCode};
use super::mask::apply_mask;
use super::message::{close_code, CloseFrame, FrameType, Message};
use super::WebSocketError;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 << 20;

/// Which end of the connection we are; decides who masks frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

pub struct WebSocket<S> {
    stream: S,
    role: Role,
    read_buf: BytesMut,
    max_message_size: usize,
    closed: bool,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, role: Role) -> Self {
        Self::from_parts(stream, role, BytesMut::with_capacity(4096))
    }

    /// Wraps a stream whose first bytes were already read into `read_buf`,
    /// e.g. frames a client pipelined right behind its upgrade request.
    pub fn from_parts(stream: S, role: Role, read_buf: BytesMut) -> Self {
        Self {
            stream,
            role,
            read_buf,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            closed: false,
        }
    }

    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads the next text or binary message.
    ///
    /// Pings are answered and pongs dropped along the way. A close frame from
    /// the peer is answered and reported as [`WebSocketError::Closed`]; any other
    /// error also ends the connection.
    pub async fn read_message(&mut self) -> Result<Message, WebSocketError> {
        if self.closed {
            return Err(WebSocketError::AlreadyClosed);
        }

        match self.read_data_message().await {
            Ok(message) => Ok(message),
            Err(err) => {
                if let Some(code) = err.close_code() {
                    debug!(code, error = %err, "closing websocket after protocol violation");
                    let reason = err.to_string();
                    // the peer may already be gone; report the read error, not this one
                    let _ = self.send_close(Some(CloseFrame { code, reason })).await;
                }
                self.closed = true;
                Err(err)
            }
        }
    }

    pub async fn send(&mut self, message: Message) -> Result<(), WebSocketError> {
        if self.closed {
            return Err(WebSocketError::AlreadyClosed);
        }
        if let Message::Close(frame) = message {
            return self.send_close(frame).await;
        }
        self.write_frame(message.opcode(), &message.payload()).await
    }

    pub async fn close(&mut self, code: u16) -> Result<(), WebSocketError> {
        if self.closed {
            return Ok(());
        }
        self.send_close(Some(CloseFrame {
            code,
            reason: String::new(),
        }))
        .await
    }

    async fn send_close(&mut self, frame: Option<CloseFrame>) -> Result<(), WebSocketError> {
        self.closed = true;
        self.write_frame(OpCode::Close, &Message::Close(frame).payload())
            .await
    }

    async fn read_data_message(&mut self) -> Result<Message, WebSocketError> {
        let mut fragments: Option<(FrameType, BytesMut)> = None;

        loop {
            let (header, payload) = self.read_frame().await?;
            trace!(opcode = ?header.opcode, fin = header.fin, len = payload.len(), "read frame");

            match header.opcode {
                OpCode::Ping => self.write_frame(OpCode::Pong, &payload).await?,
                OpCode::Pong => debug!("ignoring unsolicited pong"),
                OpCode::Close => {
                    let frame = parse_close_payload(&payload)?;
                    let reply = frame.as_ref().map(|frame| CloseFrame {
                        code: frame.code,
                        reason: String::new(),
                    });
                    self.send_close(reply).await?;
                    return Err(WebSocketError::Closed(frame));
                }
                OpCode::Text | OpCode::Binary => {
                    if fragments.is_some() {
                        return Err(WebSocketError::Protocol(
                            "data frame inside a fragmented message".to_string(),
                        ));
                    }
                    let frame_type = if header.opcode == OpCode::Text {
                        FrameType::Text
                    } else {
                        FrameType::Binary
                    };
                    if header.fin {
                        return finish_message(frame_type, payload);
                    }
                    fragments = Some((frame_type, BytesMut::from(&payload[..])));
                }
                OpCode::Continuation => {
                    let (frame_type, mut data) = fragments.take().ok_or_else(|| {
                        WebSocketError::Protocol("continuation frame without a message".to_string())
                    })?;
                    if data.len() + payload.len() > self.max_message_size {
                        return Err(WebSocketError::MessageTooBig(self.max_message_size));
                    }
                    data.put_slice(&payload);
                    if header.fin {
                        return finish_message(frame_type, data.freeze());
                    }
                    fragments = Some((frame_type, data));
                }
            }
        }
    }

    async fn read_frame(&mut self) -> Result<(FrameHeader, Bytes), WebSocketError> {
        loop {
            if let Some((header, header_len)) = FrameHeader::parse(&self.read_buf)? {
                self.check_header(&header)?;

                let payload_len = header.payload_len as usize;
                let frame_len = header_len + payload_len;
                if self.read_buf.len() >= frame_len {
                    self.read_buf.advance(header_len);
                    let mut payload = self.read_buf.split_to(payload_len);
                    if let Some(mask) = header.mask {
                        apply_mask(&mut payload, mask);
                    }
                    return Ok((header, payload.freeze()));
                }
                self.read_buf.reserve(frame_len - self.read_buf.len());
            }

            if self.stream.read_buf(&mut self.read_buf).await? == 0 {
                return Err(WebSocketError::Eof);
            }
        }
    }

    fn check_header(&self, header: &FrameHeader) -> Result<(), WebSocketError> {
        if header.rsv1 || header.rsv2 || header.rsv3 {
            return Err(WebSocketError::Protocol("reserved bits set".to_string()));
        }
        match (self.role, header.mask.is_some()) {
            (Role::Server, false) => {
                return Err(WebSocketError::Protocol("unmasked client frame".to_string()))
            }
            (Role::Client, true) => {
                return Err(WebSocketError::Protocol("masked server frame".to_string()))
            }
            _ => {}
        }
        if header.opcode.is_control() {
            if !header.fin {
                return Err(WebSocketError::Protocol("fragmented control frame".to_string()));
            }
            if header.payload_len > 125 {
                return Err(WebSocketError::Protocol("control frame too long".to_string()));
            }
        }
        if header.payload_len > self.max_message_size as u64 {
            return Err(WebSocketError::MessageTooBig(self.max_message_size));
        }
        Ok(())
    }

    async fn write_frame(&mut self, opcode: OpCode, payload: &[u8]) -> Result<(), WebSocketError> {
        let mut header = FrameHeader::new(opcode, payload.len() as u64);
        if self.role == Role::Client {
            header.mask = Some(rand::random());
        }

        let mut buf = BytesMut::with_capacity(payload.len() + 14);
        header.encode(&mut buf);
        let start = buf.len();
        buf.put_slice(payload);
        if let Some(mask) = header.mask {
            apply_mask(&mut buf[start..], mask);
        }

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

fn finish_message(frame_type: FrameType, payload: Bytes) -> Result<Message, WebSocketError> {
    match frame_type {
        FrameType::Text => String::from_utf8(payload.to_vec())
            .map(Message::Text)
            .map_err(|_| WebSocketError::InvalidUtf8),
        FrameType::Binary => Ok(Message::Binary(payload)),
    }
}

fn parse_close_payload(payload: &[u8]) -> Result<Option<CloseFrame>, WebSocketError> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(WebSocketError::Protocol("truncated close code".to_string())),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999) {
                return Err(WebSocketError::Protocol(format!("invalid close code {}", code)));
            }
            let reason = std::str::from_utf8(&payload[2..])
                .map_err(|_| WebSocketError::InvalidUtf8)?
                .to_string();
            Ok(Some(CloseFrame { code, reason }))
        }
    }
}

impl WebSocketError {
    /// The close code sent to the peer when this error ends the connection
    pub fn close_code(&self) -> Option<u16> {
        match self {
            WebSocketError::Protocol(_) => Some(close_code::PROTOCOL_ERROR),
            WebSocketError::InvalidUtf8 => Some(close_code::INVALID_PAYLOAD),
            WebSocketError::MessageTooBig(_) => Some(close_code::MESSAGE_TOO_BIG),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (WebSocket<DuplexStream>, WebSocket<DuplexStream>) {
        let (server, client) = duplex(1 << 16);
        (
            WebSocket::new(server, Role::Server),
            WebSocket::new(client, Role::Client),
        )
    }

    fn client_frame(opcode: OpCode, fin: bool, payload: &[u8]) -> Vec<u8> {
        let mut header = FrameHeader::new(opcode, payload.len() as u64);
        header.fin = fin;
        header.mask = Some([0xa1, 0xb2, 0xc3, 0xd4]);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let start = buf.len();
        buf.put_slice(payload);
        apply_mask(&mut buf[start..], [0xa1, 0xb2, 0xc3, 0xd4]);
        buf.to_vec()
    }

    async fn read_server_frame(stream: &mut DuplexStream) -> (FrameHeader, Vec<u8>) {
        let mut buf = BytesMut::new();
        loop {
            if let Some((header, len)) = FrameHeader::parse(&buf).unwrap() {
                if buf.len() >= len + header.payload_len as usize {
                    let payload = buf[len..len + header.payload_len as usize].to_vec();
                    return (header, payload);
                }
            }
            assert_ne!(stream.read_buf(&mut buf).await.unwrap(), 0, "unexpected eof");
        }
    }

    #[tokio::test]
    async fn text_and_binary_messages() {
        let (mut server, mut client) = pair();

        client.send(Message::Text("hello".to_string())).await.unwrap();
        client
            .send(Message::Binary(Bytes::from_static(&[1, 2, 3])))
            .await
            .unwrap();

        assert_eq!(server.read_message().await.unwrap(), Message::Text("hello".to_string()));
        assert_eq!(
            server.read_message().await.unwrap(),
            Message::Binary(Bytes::from_static(&[1, 2, 3]))
        );

        server.send(Message::Text("helloworld".to_string())).await.unwrap();
        assert_eq!(
            client.read_message().await.unwrap(),
            Message::Text("helloworld".to_string())
        );
    }

    #[tokio::test]
    async fn fragmented_message_with_interleaved_ping() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);

        let mut bytes = client_frame(OpCode::Text, false, b"hel");
        bytes.extend(client_frame(OpCode::Ping, true, b"p"));
        bytes.extend(client_frame(OpCode::Continuation, false, b"lo "));
        bytes.extend(client_frame(OpCode::Continuation, true, b"there"));
        raw.write_all(&bytes).await.unwrap();

        assert_eq!(
            server.read_message().await.unwrap(),
            Message::Text("hello there".to_string())
        );

        let (header, payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Pong);
        assert_eq!(header.mask, None);
        assert_eq!(payload, b"p");
    }

    #[tokio::test]
    async fn pipelined_bytes_are_read_first() {
        let (server, _client) = duplex(64);
        let buffered = BytesMut::from(&client_frame(OpCode::Binary, true, b"early")[..]);
        let mut server = WebSocket::from_parts(server, Role::Server, buffered);

        assert_eq!(
            server.read_message().await.unwrap(),
            Message::Binary(Bytes::from_static(b"early"))
        );
    }

    #[tokio::test]
    async fn close_is_answered() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);

        raw.write_all(&client_frame(OpCode::Close, true, &[0x03, 0xe8, b'o', b'k']))
            .await
            .unwrap();

        match server.read_message().await {
            Err(WebSocketError::Closed(Some(frame))) => {
                assert_eq!(frame.code, close_code::NORMAL);
                assert_eq!(frame.reason, "ok");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(server.is_closed());

        let (header, payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(payload, vec![0x03, 0xe8]);

        assert!(matches!(
            server.read_message().await,
            Err(WebSocketError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn unmasked_client_frame_is_a_protocol_error() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);

        let mut buf = BytesMut::new();
        FrameHeader::new(OpCode::Text, 2).encode(&mut buf);
        buf.put_slice(b"hi");
        raw.write_all(&buf).await.unwrap();

        assert!(matches!(
            server.read_message().await,
            Err(WebSocketError::Protocol(_))
        ));

        let (header, payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(&payload[..2], &close_code::PROTOCOL_ERROR.to_be_bytes());
    }

    #[tokio::test]
    async fn invalid_utf8_text_is_rejected() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);

        raw.write_all(&client_frame(OpCode::Text, true, &[0xff, 0xfe]))
            .await
            .unwrap();

        assert!(matches!(
            server.read_message().await,
            Err(WebSocketError::InvalidUtf8)
        ));
        let (_, payload) = read_server_frame(&mut raw).await;
        assert_eq!(&payload[..2], &close_code::INVALID_PAYLOAD.to_be_bytes());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server).max_message_size(4);

        let mut bytes = client_frame(OpCode::Binary, false, b"abc");
        bytes.extend(client_frame(OpCode::Continuation, true, b"de"));
        raw.write_all(&bytes).await.unwrap();

        assert!(matches!(
            server.read_message().await,
            Err(WebSocketError::MessageTooBig(4))
        ));
        let (header, payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(&payload[..2], &close_code::MESSAGE_TOO_BIG.to_be_bytes());
    }

    async fn assert_protocol_error(frame: &[u8], expected: &str) {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);
        raw.write_all(frame).await.unwrap();

        match server.read_message().await {
            Err(WebSocketError::Protocol(reason)) => assert_eq!(reason, expected),
            other => panic!("unexpected result: {:?}", other),
        }

        let (header, payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Close);
        assert_eq!(&payload[..2], &close_code::PROTOCOL_ERROR.to_be_bytes());
    }

    #[tokio::test]
    async fn reserved_bits_are_rejected() {
        let mut frame = client_frame(OpCode::Text, true, b"hi");
        frame[0] |= 0x40;
        assert_protocol_error(&frame, "reserved bits set").await;
    }

    #[tokio::test]
    async fn long_control_frame_is_rejected() {
        let frame = client_frame(OpCode::Ping, true, &[b'p'; 126]);
        assert_protocol_error(&frame, "control frame too long").await;
    }

    #[tokio::test]
    async fn fragmented_control_frame_is_rejected() {
        let frame = client_frame(OpCode::Ping, false, b"p");
        assert_protocol_error(&frame, "fragmented control frame").await;
    }

    #[tokio::test]
    async fn masked_server_frame_is_rejected_by_client() {
        let (client, mut raw) = duplex(1 << 16);
        let mut client = WebSocket::new(client, Role::Client);

        raw.write_all(&client_frame(OpCode::Text, true, b"hi"))
            .await
            .unwrap();

        match client.read_message().await {
            Err(WebSocketError::Protocol(reason)) => assert_eq!(reason, "masked server frame"),
            other => panic!("unexpected result: {:?}", other),
        }

        // the client masks its own close frame
        let (header, mut payload) = read_server_frame(&mut raw).await;
        assert_eq!(header.opcode, OpCode::Close);
        apply_mask(&mut payload, header.mask.expect("client frames are masked"));
        assert_eq!(&payload[..2], &close_code::PROTOCOL_ERROR.to_be_bytes());
    }

    #[tokio::test]
    async fn continuation_without_start_is_rejected() {
        let (server, mut raw) = duplex(1 << 16);
        let mut server = WebSocket::new(server, Role::Server);

        raw.write_all(&client_frame(OpCode::Continuation, true, b"x"))
            .await
            .unwrap();

        assert!(matches!(
            server.read_message().await,
            Err(WebSocketError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn eof_ends_the_read() {
        let (server, raw) = duplex(64);
        let mut server = WebSocket::new(server, Role::Server);
        drop(raw);

        assert!(matches!(server.read_message().await, Err(WebSocketError::Eof)));
    }
}
