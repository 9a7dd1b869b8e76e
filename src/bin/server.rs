//! Room-based chat and signaling server.
//!
//! Coordinates connected clients across named rooms: lobby listing, room
//! presence, chat history, typing/reaction events, and WebRTC handshake
//! relay.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3001
//! ```

use clap::Parser;
use studyhall::common::logger::setup_logger;
use studyhall::server::runner::run_server;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Room-based WebSocket chat and signaling server", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "3001")]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    if let Err(e) = run_server(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
