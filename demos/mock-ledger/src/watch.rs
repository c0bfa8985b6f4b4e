//! Follows a ledger server: pages through its state, then prints every
//! closed ledger until interrupted.
//!
//!   cargo run --bin ledger-watch -- --url ws://127.0.0.1:6006 --config client.toml

use ledgerwire_client::{Client, ClientConfig, ClientEvent, EventKind, LedgerClient};
use ledgerwire_core::{Request, StreamKind};
use serde_json::json;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ledger_watch=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let url = parse_arg_string(&args, "--url").unwrap_or_else(|| "ws://127.0.0.1:6006".to_string());
    let config = match parse_arg_string(&args, "--config") {
        Some(path) => ClientConfig::load(Path::new(&path))?,
        None => ClientConfig::default(),
    };

    let client = Client::new(url.clone(), config);
    client.events().on(EventKind::Reconnecting, |event| {
        if let ClientEvent::Reconnecting { attempt } = event {
            tracing::warn!("Connection lost, reconnect attempt {}", attempt);
        }
    });
    client.events().on(EventKind::Error, |event| {
        if let ClientEvent::Error { kind, message, .. } = event {
            tracing::warn!("{}: {}", kind, message);
        }
    });
    let (_, mut ledgers) = client.events().channel(EventKind::Stream(StreamKind::LedgerClosed));

    client.connect().await?;
    tracing::info!("Connected to {}", url);

    let objects = client
        .collect_all(&Request::new("ledger_data").with("limit", 8), "state")
        .await?;
    tracing::info!("Ledger holds {} state objects", objects.len());

    let subscribed = client
        .request(&Request::new("subscribe").with("streams", json!(["ledger"])))
        .await?;
    tracing::info!("Subscribed at ledger {}", subscribed.result["ledger_index"]);

    loop {
        tokio::select! {
            event = ledgers.recv() => {
                let Some(ClientEvent::Stream(message)) = event else {
                    break;
                };
                tracing::info!(
                    "Ledger {} closed with {} transactions",
                    message.payload["ledger_index"],
                    message.payload["txn_count"]
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await?;
    Ok(())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
