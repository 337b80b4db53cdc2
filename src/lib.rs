use anyhow::Result;
use bytes::{Buf, BytesMut};
use httpstatus::StatusCode;
use socket2::{Domain, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::http_request::{Method, Request};
use crate::http_response::ResponseBuilder;
use crate::router::{find_route, Context, Route, Router};
use crate::static_files::StaticFile;
use crate::websocket::{FixedReply, WebSocketUpgrade};

pub mod config;
pub mod http_request;
pub mod http_response;
pub mod router;
pub mod static_files;
pub mod tokens;
pub mod websocket;

/// Largest request head we are willing to buffer
const REQUEST_BUFFER_SIZE: usize = 30000;
const MAX_BODY_SIZE: usize = 1 << 20;
/// How long, and how much, to keep reading after an error response
const LINGER_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_DRAIN: usize = 1 << 20;

pub struct HTTPServer {
    routes: Vec<Route>,
}

impl Default for HTTPServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HTTPServer {
    pub fn new() -> Self {
        HTTPServer {
            routes: Vec::with_capacity(8),
        }
    }

    fn add_route(&mut self, route: Route) {
        self.routes.push(route)
    }

    // start listening on a new socket/port
    pub fn listen_blocking(self, address: SocketAddr) -> Result<()> {
        let rt = runtime::Runtime::new()?;
        rt.block_on(async move { self.bind(address)?.run().await })
    }

    /// Binds the listening socket. Must be called from within a tokio runtime.
    pub fn bind(self, address: SocketAddr) -> Result<BoundServer> {
        // Protocol is None/0 since tcp is implied by Type::STREAM
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, None)?;

        // Enable processing of both ipv6 and ipv4 packets
        if address.is_ipv6() {
            socket.set_only_v6(false)?;
        }
        socket.set_reuse_address(true)?;

        // tokio expects a non-blocking socket
        socket.set_nonblocking(true)?;

        socket.bind(&address.into())?;
        socket.listen(128)?;

        let listener = TcpListener::from_std(socket.into())?;
        info!(address = %listener.local_addr()?, "started server");

        Ok(BoundServer {
            listener,
            routes: Arc::new(self.routes),
        })
    }
}

pub struct BoundServer {
    listener: TcpListener,
    routes: Arc<Vec<Route>>,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one task per connection
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    let routes = self.routes.clone();
                    tokio::spawn(async move {
                        if let Err(e) = process_connection(routes, socket, addr).await {
                            debug!(peer = %addr, error = %e, "connection failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "couldn't get client"),
            }
        }
    }
}

/// The echo server: the WebSocket endpoint, then the static page for every other path
pub fn echo_server(config: &Config) -> HTTPServer {
    let mut server = HTTPServer::new();
    server
        .any(
            &config.ws_path,
            WebSocketUpgrade::new(FixedReply::new(config.reply.clone()))
                .max_message_size(config.max_message_size),
        )
        .any("*", StaticFile::new(&config.index));
    server
}

async fn process_connection(
    routes: Arc<Vec<Route>>,
    mut socket: TcpStream,
    addr: SocketAddr,
) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        let mut request = Request::new();
        let head_len = loop {
            match request.parse(&buffer) {
                Ok(Some(len)) => break len,
                Ok(None) if buffer.len() >= REQUEST_BUFFER_SIZE => {
                    debug!(peer = %addr, "request head too large");
                    return write_error(&mut socket, StatusCode::BadRequest, "request head too large").await;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(peer = %addr, error = %e, "malformed request");
                    return write_error(&mut socket, StatusCode::BadRequest, &e.to_string()).await;
                }
            }

            if socket.read_buf(&mut buffer).await? == 0 {
                // client went away between requests
                return Ok(());
            }
        };
        buffer.advance(head_len);

        if request.is_chunked() {
            return write_error(&mut socket, StatusCode::NotImplemented, "chunked bodies are not supported").await;
        }
        let content_length = match request.content_length() {
            Ok(n) if n <= MAX_BODY_SIZE => n,
            Ok(_) => return write_error(&mut socket, StatusCode::BadRequest, "body too large").await,
            Err(e) => return write_error(&mut socket, StatusCode::BadRequest, &e.to_string()).await,
        };
        while buffer.len() < content_length {
            if socket.read_buf(&mut buffer).await? == 0 {
                return Ok(());
            }
        }
        request.body = buffer.split_to(content_length).freeze();

        let keep_alive = request.keep_alive();
        let is_head = request.method == Some(Method::HEAD);
        let request = Arc::new(request);
        let mut ctx = Context::new(request.clone(), ResponseBuilder::new());

        match find_route(&routes, &request) {
            Some((route, params)) => {
                ctx.params = params;
                if let Err(e) = route.handler.call(&mut ctx).await {
                    warn!(peer = %addr, path = request.route_path(), error = %e, "handler failed");
                    ctx.response.clear();
                    ctx.response.status_code(StatusCode::InternalServerError);
                    ctx.response.write(b"500 internal server error");
                }
            }
            None => {
                ctx.response.status_code(StatusCode::NotFound);
                ctx.response.write(b"404 page not found");
            }
        }

        if let Some(upgrade) = ctx.take_upgrade() {
            socket.write_all(&upgrade.response).await?;
            debug!(peer = %addr, path = request.route_path(), "switched protocols");
            (upgrade.on_upgrade)(socket, buffer, addr).await;
            return Ok(());
        }

        if !keep_alive {
            ctx.response.set_header("Connection", "close");
        }
        if is_head {
            ctx.response.omit_body();
        }
        debug!(
            peer = %addr,
            method = ?request.method,
            path = request.route_path(),
            status = ctx.response.status(),
            "request"
        );
        socket.write_all(&ctx.response.build()).await?;

        if !keep_alive {
            return Ok(());
        }
    }
}

async fn write_error(socket: &mut TcpStream, status: StatusCode, message: &str) -> Result<()> {
    let mut response = ResponseBuilder::new();
    response.status_code(status).set_header("Connection", "close");
    response.write(message.as_bytes());
    socket.write_all(&response.build()).await?;
    socket.shutdown().await?;

    // Closing with unread input makes the kernel send a reset, which can
    // destroy the response before the client reads it
    let mut sink = BytesMut::with_capacity(4096);
    let _ = tokio::time::timeout(LINGER_TIMEOUT, async {
        let mut drained = 0;
        while drained < MAX_DRAIN {
            sink.clear();
            match socket.read_buf(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(n) => drained += n,
            }
        }
    })
    .await;
    Ok(())
}
