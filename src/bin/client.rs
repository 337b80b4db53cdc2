use anyhow::{bail, Result};
use bytes::Bytes;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use websocket_echo_server::websocket::{client, close_code, Message};

/// Sends one message to the echo server and prints the reply
#[derive(Parser, Debug)]
#[command(name = "client")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:3000")]
    address: String,

    /// WebSocket path
    #[arg(short, long, default_value = "/v1/ws")]
    path: String,

    /// Send the message as a binary frame
    #[arg(short, long)]
    binary: bool,

    /// Message to send
    #[arg(default_value = "hello")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let mut ws = client::connect(&args.address, &args.path).await?;

    let message = if args.binary {
        Message::Binary(Bytes::from(args.message.into_bytes()))
    } else {
        Message::Text(args.message)
    };
    ws.send(message).await?;

    match ws.read_message().await? {
        Message::Text(text) => println!("text: {}", text),
        Message::Binary(data) => println!("binary: {:?}", data),
        other => bail!("unexpected message {:?}", other),
    }

    ws.close(close_code::NORMAL).await?;
    Ok(())
}
