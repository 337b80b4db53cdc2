use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::handshake::{self, HandshakeError, WEBSOCKET_VERSION};
use super::{Message, Role, WebSocket, WebSocketError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::http_response::ResponseBuilder;
use crate::router::{Context, Handler, OnUpgrade};

/// Decides what, if anything, to send back for an inbound data message
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, peer: SocketAddr, message: &Message) -> Option<Message>;
}

/// Logs every message and answers with the same payload each time
pub struct FixedReply {
    reply: Bytes,
}

impl FixedReply {
    pub fn new(reply: impl Into<Bytes>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl MessageHandler for FixedReply {
    fn on_message(&self, peer: SocketAddr, message: &Message) -> Option<Message> {
        let frame_type = message.frame_type()?;
        match message {
            Message::Text(text) => info!(peer = %peer, "{}", text),
            other => {
                let payload = other.payload();
                info!(peer = %peer, len = payload.len(), "{}", String::from_utf8_lossy(&payload))
            }
        }
        Some(Message::with_payload(frame_type, &self.reply))
    }
}

/// Reads messages and sends back the handler's replies until a read or write fails.
///
/// The connection is dropped, closing the socket, on return.
pub async fn serve<S, H>(mut ws: WebSocket<S>, handler: &H, peer: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: MessageHandler + ?Sized,
{
    loop {
        let message = match ws.read_message().await {
            Ok(message) => message,
            Err(WebSocketError::Closed(frame)) => {
                debug!(peer = %peer, code = ?frame.map(|f| f.code), "websocket closed by peer");
                break;
            }
            Err(e) => {
                debug!(peer = %peer, error = %e, "websocket read failed");
                break;
            }
        };

        if let Some(reply) = handler.on_message(peer, &message) {
            if let Err(e) = ws.send(reply).await {
                debug!(peer = %peer, error = %e, "websocket write failed");
                break;
            }
        }
    }
    info!(peer = %peer, "websocket connection finished");
}

/// Route handler completing the upgrade and running [`serve`] on the socket
pub struct WebSocketUpgrade<H> {
    handler: Arc<H>,
    max_message_size: usize,
}

impl<H: MessageHandler> WebSocketUpgrade<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    pub fn max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }
}

#[async_trait]
impl<H: MessageHandler> Handler for WebSocketUpgrade<H> {
    async fn call(&self, ctx: &mut Context) -> Result<()> {
        let accept = match handshake::validate(&ctx.request) {
            Ok(accept) => accept,
            Err(e) => {
                debug!(error = %e, "rejecting websocket upgrade");
                if e == HandshakeError::Version {
                    ctx.response
                        .set_header("Sec-WebSocket-Version", WEBSOCKET_VERSION);
                }
                ctx.response.status_code(e.status_code());
                ctx.response.write(e.to_string().as_bytes());
                return Ok(());
            }
        };

        let handler = self.handler.clone();
        let max_message_size = self.max_message_size;
        let on_upgrade: OnUpgrade = Box::new(
            move |stream: TcpStream, buffered: BytesMut, peer: SocketAddr| -> BoxFuture<'static, ()> {
                Box::pin(async move {
                    info!(peer = %peer, "websocket client connected");
                    let ws = WebSocket::from_parts(stream, Role::Server, buffered)
                        .max_message_size(max_message_size);
                    serve(ws, &*handler, peer).await;
                })
            },
        );
        ctx.upgrade(ResponseBuilder::switching_protocols(&accept), on_upgrade);
        Ok(())
    }
}
