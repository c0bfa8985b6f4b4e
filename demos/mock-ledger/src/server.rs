//! WebSocket front end for the mock ledger.

use crate::ledger::Ledger;
use futures_util::{SinkExt, StreamExt};
use ledgerwire_core::RippledError;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

type SharedLedger = Arc<RwLock<Ledger>>;

pub async fn run(addr: SocketAddr, close_interval: Duration) -> anyhow::Result<()> {
    let ledger = Arc::new(RwLock::new(Ledger::new(1, 40)));
    let (ledger_tx, _) = broadcast::channel::<String>(100);

    tokio::spawn(close_ledgers(ledger.clone(), ledger_tx.clone(), close_interval));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let ledger = ledger.clone();
        let ledger_tx = ledger_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, ledger, ledger_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn close_ledgers(ledger: SharedLedger, ledger_tx: broadcast::Sender<String>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let closed = ledger.write().await.close();
        tracing::debug!("Closed ledger {} with {} transactions", closed.ledger_index, closed.txn_count);

        let frame = json!({
            "type": "ledgerClosed",
            "ledger_index": closed.ledger_index,
            "ledger_hash": format!("{:064X}", closed.ledger_index),
            "txn_count": closed.txn_count,
            "fee_base": 10,
            "reserve_base": 1_000_000,
            "reserve_inc": 200_000,
            "validated_ledgers": format!("1-{}", closed.ledger_index),
        });
        let _ = ledger_tx.send(frame.to_string());
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ledger: SharedLedger,
    ledger_tx: broadcast::Sender<String>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::debug!("New connection from {}", addr);

    let mut ledger_rx = ledger_tx.subscribe();
    let mut subscribed = false;

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                let Message::Text(text) = msg else {
                    continue;
                };
                let reply = match serde_json::from_str::<Value>(&text) {
                    Ok(request) => handle_request(&ledger, &request, &mut subscribed).await,
                    Err(e) => {
                        tracing::warn!("Invalid message: {}", e);
                        json!({"error": "badSyntax", "error_message": "Syntax error.", "status": "error"})
                    }
                };
                sink.send(Message::Text(reply.to_string().into())).await?;
            }

            frame = ledger_rx.recv() => {
                match frame {
                    Ok(frame) if subscribed => sink.send(Message::Text(frame.into())).await?,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => tracing::warn!("{} lagged by {} ledgers", addr, n),
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("Connection closed: {}", addr);
    Ok(())
}

async fn handle_request(ledger: &SharedLedger, request: &Value, subscribed: &mut bool) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let command = request.get("command").and_then(Value::as_str).unwrap_or_default();
    let param = |key: &str| request.get(key).and_then(Value::as_str);

    let outcome = match command {
        "ping" => Ok(json!({})),
        "ledger" => Ok(ledger.read().await.ledger()),
        "server_state" => Ok(ledger.read().await.server_state()),
        "account_info" => match param("account") {
            Some(account) => ledger.read().await.account_info(account),
            None => Err(RippledError::new("invalidParams")),
        },
        "submit" => match param("tx_blob") {
            Some(blob) => ledger.write().await.submit(blob),
            None => Err(RippledError::new("invalidParams")),
        },
        "tx" => match param("transaction") {
            Some(hash) => ledger.read().await.tx(hash),
            None => Err(RippledError::new("invalidParams")),
        },
        "ledger_data" => {
            let limit = request.get("limit").and_then(Value::as_u64).map(|l| l as usize);
            ledger.read().await.ledger_data(param("marker"), limit)
        }
        "subscribe" => {
            let streams = request.get("streams").and_then(Value::as_array);
            if streams.is_some_and(|s| s.iter().any(|s| s == "ledger")) {
                *subscribed = true;
                let state = ledger.read().await;
                Ok(json!({"ledger_index": state.validated(), "fee_base": 10}))
            } else {
                Ok(json!({}))
            }
        }
        "unsubscribe" => {
            *subscribed = false;
            Ok(json!({}))
        }
        _ => Err(RippledError::new("unknownCmd")),
    };

    match outcome {
        Ok(result) => json!({"id": id, "type": "response", "status": "success", "result": result}),
        Err(err) => json!({
            "id": id,
            "type": "response",
            "status": "error",
            "error": err.error,
            "error_code": err.error_code,
            "error_message": err.error_message,
            "request": request,
        }),
    }
}
