//! Scripted WebSocket server for integration tests.
#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use ledgerwire_client::{ClientConfig, ClientEvent, ReconnectConfig, SubmissionConfig};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// What the server does in answer to one request.
pub enum Reply {
    Now(Value),
    After(Duration, Value),
    /// Close the socket with this code.
    Close(u16),
}

type Handler = Box<dyn FnMut(&Value) -> Vec<Reply> + Send>;

#[derive(Clone)]
enum Control {
    Push(Value),
    Drop,
    Stall,
}

pub struct MockServer {
    url: String,
    requests: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    control: broadcast::Sender<Control>,
    accept: JoinHandle<()>,
}

impl MockServer {
    pub async fn start<F>(handler: F) -> Self
    where
        F: FnMut(&Value) -> Vec<Reply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let handler: Arc<Mutex<Handler>> = Arc::new(Mutex::new(Box::new(handler)));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (control, _) = broadcast::channel(16);

        let accept = {
            let requests = requests.clone();
            let connections = connections.clone();
            let control = control.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(stream, handler.clone(), requests.clone(), control.subscribe()));
                }
            })
        };

        Self {
            url,
            requests,
            connections,
            control,
            accept,
        }
    }

    /// Answers every request with `{"command": <command>}`.
    pub async fn echo() -> Self {
        Self::start(|req| vec![Reply::Now(success(req, json!({"command": req["command"]})))]).await
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    pub fn commands(&self, command: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r["command"] == command)
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send an unsolicited frame on every open socket.
    pub fn push(&self, frame: Value) {
        let _ = self.control.send(Control::Push(frame));
    }

    /// Drop every open socket without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }

    /// Stop reading (and answering pings) on every open socket.
    pub fn stall(&self) {
        let _ = self.control.send(Control::Stall);
    }

    /// Stop accepting and drop every open socket.
    pub fn shutdown(&self) {
        self.accept.abort();
        self.drop_connections();
    }

    /// Wait until at least `n` requests have arrived.
    pub async fn wait_for_requests(&self, n: usize) {
        for _ in 0..200 {
            if self.requests.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} requests, got {}", self.requests.lock().len());
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(
    stream: TcpStream,
    handler: Arc<Mutex<Handler>>,
    requests: Arc<Mutex<Vec<Value>>>,
    mut control: broadcast::Receiver<Control>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    let (delayed_tx, mut delayed) = mpsc::unbounded_channel::<Message>();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => {
                        let _ = sink.close().await;
                        return;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(_)) | None => return,
                };
                let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                requests.lock().push(request.clone());

                let replies = {
                    let mut handler = handler.lock();
                    (&mut **handler)(&request)
                };
                for reply in replies {
                    match reply {
                        Reply::Now(frame) => {
                            if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                        Reply::After(delay, frame) => {
                            let tx = delayed_tx.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(Message::Text(frame.to_string().into()));
                            });
                        }
                        Reply::Close(code) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            return;
                        }
                    }
                }
            }

            Some(message) = delayed.recv() => {
                if sink.send(message).await.is_err() {
                    return;
                }
            }

            ctl = control.recv() => match ctl {
                Ok(Control::Push(frame)) => {
                    if sink.send(Message::Text(frame.to_string().into())).await.is_err() {
                        return;
                    }
                }
                Ok(Control::Stall) => {
                    let _ = control.recv().await;
                    return;
                }
                Ok(Control::Drop) | Err(broadcast::error::RecvError::Closed) => return,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }
}

pub fn success(request: &Value, result: Value) -> Value {
    json!({
        "id": request["id"],
        "type": "response",
        "status": "success",
        "result": result,
    })
}

pub fn error(request: &Value, error: &str) -> Value {
    json!({
        "id": request["id"],
        "type": "response",
        "status": "error",
        "error": error,
        "error_message": format!("{error} reported by mock"),
        "request": request,
    })
}

/// A url nothing is listening on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}")
}

/// Short timeouts and a small reconnect budget.
pub fn test_config() -> ClientConfig {
    ClientConfig {
        connection_timeout_ms: 1_000,
        request_timeout_ms: 2_000,
        heartbeat_interval_ms: 5_000,
        reconnect: ReconnectConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 20,
            max_delay_ms: 100,
            multiplier: 2.0,
        },
        submission: SubmissionConfig {
            ledger_close_time_ms: 10,
            ..SubmissionConfig::default()
        },
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Every event kind the lifecycle tests care about, in arrival order.
pub fn lifecycle(events: &ledgerwire_client::EventRegistry) -> mpsc::UnboundedReceiver<ClientEvent> {
    use ledgerwire_client::EventKind;

    let (tx, rx) = mpsc::unbounded_channel();
    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Error,
    ] {
        let tx = tx.clone();
        events.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}
