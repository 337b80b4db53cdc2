use bytes::Bytes;

use super::frame::OpCode;

/// Close status codes used by the server (RFC 6455 section 7.4.1)
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const PROTOCOL_ERROR: u16 = 1002;
    pub const INVALID_PAYLOAD: u16 = 1007;
    pub const MESSAGE_TOO_BIG: u16 = 1009;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Text,
    Binary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

impl Message {
    /// The frame type of a data message; `None` for control messages
    pub fn frame_type(&self) -> Option<FrameType> {
        match self {
            Message::Text(_) => Some(FrameType::Text),
            Message::Binary(_) => Some(FrameType::Binary),
            _ => None,
        }
    }

    pub fn is_data(&self) -> bool {
        self.frame_type().is_some()
    }

    /// Builds a data message carrying `payload` with the given frame type.
    ///
    /// Text payloads that are not valid UTF-8 are converted lossily.
    pub fn with_payload(frame_type: FrameType, payload: &[u8]) -> Self {
        match frame_type {
            FrameType::Text => Message::Text(String::from_utf8_lossy(payload).into_owned()),
            FrameType::Binary => Message::Binary(Bytes::copy_from_slice(payload)),
        }
    }

    pub fn payload(&self) -> Bytes {
        match self {
            Message::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Message::Binary(data) | Message::Ping(data) | Message::Pong(data) => data.clone(),
            Message::Close(None) => Bytes::new(),
            Message::Close(Some(frame)) => {
                let mut payload = frame.code.to_be_bytes().to_vec();
                payload.extend_from_slice(frame.reason.as_bytes());
                Bytes::from(payload)
            }
        }
    }

    pub(crate) fn opcode(&self) -> OpCode {
        match self {
            Message::Text(_) => OpCode::Text,
            Message::Binary(_) => OpCode::Binary,
            Message::Ping(_) => OpCode::Ping,
            Message::Pong(_) => OpCode::Pong,
            Message::Close(_) => OpCode::Close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_keeps_frame_type() {
        let inbound = Message::Binary(Bytes::from_static(&[0, 159, 146, 150]));
        let reply = Message::with_payload(inbound.frame_type().unwrap(), b"helloworld");
        assert_eq!(reply, Message::Binary(Bytes::from_static(b"helloworld")));

        let inbound = Message::Text("hi".to_string());
        let reply = Message::with_payload(inbound.frame_type().unwrap(), b"helloworld");
        assert_eq!(reply, Message::Text("helloworld".to_string()));
    }

    #[test]
    fn control_messages_have_no_frame_type() {
        assert!(!Message::Ping(Bytes::new()).is_data());
        assert!(!Message::Close(None).is_data());
    }

    #[test]
    fn close_payload() {
        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "bye".to_string(),
        }));
        assert_eq!(&close.payload()[..], &[0x03, 0xe8, b'b', b'y', b'e']);
    }
}
