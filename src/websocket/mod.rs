// https://developer.mozilla.org/en-US/docs/Web/API/WebSockets_API/Writing_WebSocket_servers
// https://datatracker.ietf.org/doc/html/rfc6455

use thiserror::Error;

pub mod client;
mod connection;
pub mod echo;
pub mod frame;
pub mod handshake;
mod mask;
mod message;

pub use connection::{Role, WebSocket, DEFAULT_MAX_MESSAGE_SIZE};
pub use echo::{FixedReply, MessageHandler, WebSocketUpgrade};
pub use message::{close_code, CloseFrame, FrameType, Message};

#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed without a close frame")]
    Eof,
    #[error("connection closed by peer")]
    Closed(Option<CloseFrame>),
    #[error("connection already closed")]
    AlreadyClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid utf-8 in text message")]
    InvalidUtf8,
    #[error("message larger than {0} bytes")]
    MessageTooBig(usize),
}
