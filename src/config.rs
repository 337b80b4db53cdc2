//! Command-line configuration for the echo server.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::websocket::DEFAULT_MAX_MESSAGE_SIZE;

#[derive(Parser, Debug, Clone)]
#[command(name = "server")]
#[command(about = "Serves a static page and answers every WebSocket message with a fixed reply", long_about = None)]
pub struct Config {
    /// Address to listen on; the default accepts IPv4 and IPv6
    #[arg(short, long, default_value = "[::]:3000")]
    pub listen: SocketAddr,

    /// File served for every path except the WebSocket endpoint
    #[arg(short, long, default_value = "index.html")]
    pub index: PathBuf,

    /// Path upgraded to a WebSocket connection
    #[arg(long, default_value = "/v1/ws")]
    pub ws_path: String,

    /// Payload sent back for every message
    #[arg(short, long, default_value = "helloworld")]
    pub reply: String,

    /// Largest accepted message, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    pub max_message_size: usize,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::try_parse_from(["server"]).unwrap();

        assert_eq!(config.listen, "[::]:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.index, PathBuf::from("index.html"));
        assert_eq!(config.ws_path, "/v1/ws");
        assert_eq!(config.reply, "helloworld");
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn overrides() {
        let config = Config::try_parse_from([
            "server",
            "--listen",
            "127.0.0.1:8080",
            "--ws-path",
            "/ws",
            "-r",
            "pong",
        ])
        .unwrap();

        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.reply, "pong");
    }

    #[test]
    fn invalid_listen_address() {
        assert!(Config::try_parse_from(["server", "--listen", "localhost"]).is_err());
    }
}
