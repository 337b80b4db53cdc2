use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use websocket_echo_server::{config::Config, echo_server};

fn main() -> Result<()> {
    let config = Config::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        index = %config.index.display(),
        ws_path = %config.ws_path,
        reply = %config.reply,
        "starting echo server"
    );

    echo_server(&config).listen_blocking(config.listen)
}
