//! Mock ledger server.
//!
//! Speaks enough of the rippled WebSocket API to exercise ledgerwire:
//! - ledgers close on a timer and include queued transactions
//! - `submit` accepts blobs from `JsonBlobCodec`
//! - `ledger_data` pages by marker, `subscribe` streams closed ledgers
//!
//! Run the server, then watch it:
//!   cargo run --bin mock-ledger -- --port 6006 --close-ms 1000
//!   cargo run --bin ledger-watch -- --url ws://127.0.0.1:6006

mod ledger;
mod server;

use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mock_ledger=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(6006);
    let close_ms = parse_arg(&args, "--close-ms").unwrap_or(1000);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    tracing::info!("Starting mock ledger on {} (close every {}ms)", addr, close_ms);

    server::run(addr, Duration::from_millis(u64::from(close_ms))).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
