//! Request/response correlation over a [`Connection`].
//!
//! Every request gets a fresh numeric id and a pending entry before its
//! frame is queued. Replies are matched strictly by id. Frames that are not
//! replies go to the event registry.

use crate::connection::{Connection, FrameHandler};
use crate::error::{ClientError, ConnectionError};
use crate::events::{ClientEvent, EventRegistry};
use ledgerwire_core::{MessageError, Reply, Request, Response, ServerMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

type Resolver = oneshot::Sender<Result<Response, ClientError>>;

/// Requests awaiting a reply, keyed by correlation id.
pub(crate) struct PendingRequests {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, Resolver>>,
    events: Arc<EventRegistry>,
}

impl PendingRequests {
    pub(crate) fn new(events: Arc<EventRegistry>) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn register(&self, id: u64) -> (PendingGuard<'_>, oneshot::Receiver<Result<Response, ClientError>>) {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().insert(id, tx);
        (PendingGuard { pending: self, id }, rx)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn resolve(&self, reply: Reply) {
        self.settle(&reply.id, reply.outcome.map_err(ClientError::from));
    }

    fn settle(&self, id: &Value, outcome: Result<Response, ClientError>) {
        let resolver = id
            .as_u64()
            .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
            .and_then(|id| self.entries.lock().remove(&id));

        match resolver {
            Some(resolver) => {
                let _ = resolver.send(outcome);
            }
            None => tracing::debug!("dropping reply for unknown request id {}", id),
        }
    }
}

impl FrameHandler for PendingRequests {
    fn on_frame(&self, text: &str) {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Reply(reply)) => self.resolve(reply),
            Ok(ServerMessage::Stream(message)) => self.events.emit(&ClientEvent::Stream(message)),
            Ok(ServerMessage::Error(err)) => {
                tracing::warn!("server reported error: {}", err);
                self.events.emit(&ClientEvent::error(
                    err.error.clone(),
                    err.error_message.clone().unwrap_or_default(),
                    err.request.clone(),
                ));
            }
            Err(MessageError::MalformedReply { id, reason }) => {
                tracing::warn!("malformed reply {}: {}", id, reason);
                self.settle(&id, Err(ClientError::ResponseFormat(reason)));
            }
            Err(e) => {
                tracing::warn!("unhandled frame: {}", e);
                self.events.emit(&ClientEvent::error(
                    "badMessage",
                    e.to_string(),
                    Some(Value::String(text.to_string())),
                ));
            }
        }
    }

    fn on_close(&self, err: ConnectionError) {
        let drained: Vec<Resolver> = self.entries.lock().drain().map(|(_, r)| r).collect();
        if !drained.is_empty() {
            tracing::debug!("rejecting {} pending requests: {}", drained.len(), err);
        }
        for resolver in drained {
            let _ = resolver.send(Err(err.clone().into()));
        }
    }
}

/// Removes the pending entry when the request future completes or is dropped.
struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.entries.lock().remove(&self.id);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    connection: Connection,
    pending: Arc<PendingRequests>,
    timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn new(connection: Connection, pending: Arc<PendingRequests>, timeout: Duration) -> Self {
        Self {
            connection,
            pending,
            timeout,
        }
    }

    pub async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        self.request_with_timeout(request, self.timeout).await
    }

    /// Send `request` and wait up to `timeout` for its reply.
    pub async fn request_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let id = self.pending.next_id();
        let frame = request.to_frame(id)?;
        let (_guard, reply) = self.pending.register(id);

        self.connection.send(frame)?;
        tracing::debug!("sent {} (id {})", request.command, id);

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ConnectionError::NotConnected.into()),
            Err(_) => {
                tracing::debug!("request {} ({}) timed out", id, request.command);
                Err(ClientError::Timeout { id, after: timeout })
            }
        }
    }

    /// Number of requests still waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection", &self.connection)
            .field("pending", &self.pending.len())
            .finish()
    }
}
