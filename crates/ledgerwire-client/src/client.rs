//! The client contract and its WebSocket implementation.

use crate::config::{ClientConfig, SubmissionConfig};
use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, PendingRequests};
use crate::error::ClientError;
use crate::events::EventRegistry;
use async_trait::async_trait;
use ledgerwire_core::{ConnectionState, Request, Response};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Everything a caller can do with a ledger server.
///
/// Implemented by [`Client`] (one socket), [`BroadcastClient`](crate::BroadcastClient)
/// (several sockets raced) and [`HttpClient`](crate::HttpClient). The
/// submission coordinator is generic over it.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn url(&self) -> &str;

    async fn connect(&self) -> Result<(), ClientError>;

    /// Close normally and stay closed.
    async fn disconnect(&self) -> Result<(), ClientError>;

    fn is_connected(&self) -> bool;

    fn events(&self) -> &EventRegistry;

    async fn request(&self, request: &Request) -> Result<Response, ClientError>;

    /// Tuning picked up by a [`SubmissionCoordinator`](crate::SubmissionCoordinator)
    /// built over this client.
    fn submission_config(&self) -> SubmissionConfig {
        SubmissionConfig::default()
    }

    /// Repeat `request` from the marker in `previous`.
    async fn request_next_page(
        &self,
        request: &Request,
        previous: &Response,
    ) -> Result<Response, ClientError> {
        let next = request.next_page(previous).ok_or(ClientError::NoNextPage)?;
        self.request(&next).await
    }

    /// Follow markers until the last page.
    async fn request_all(&self, request: &Request) -> Result<Vec<Response>, ClientError> {
        let mut pages = vec![self.request(request).await?];
        while let Some(next) = pages.last().and_then(|page| request.next_page(page)) {
            pages.push(self.request(&next).await?);
        }
        Ok(pages)
    }

    /// Concatenate the `field` array from every page.
    async fn collect_all(&self, request: &Request, field: &str) -> Result<Vec<Value>, ClientError> {
        let mut items = Vec::new();
        for page in self.request_all(request).await? {
            match page.result.get(field) {
                Some(Value::Array(values)) => items.extend(values.iter().cloned()),
                Some(_) => {
                    return Err(ClientError::ResponseFormat(format!("{field} is not an array")));
                }
                None => {}
            }
        }
        Ok(items)
    }

    /// Index of the most recent validated ledger.
    async fn ledger_index(&self) -> Result<u32, ClientError> {
        let response = self
            .request(&Request::new("ledger").with("ledger_index", "validated"))
            .await?;
        response
            .result
            .get("ledger_index")
            .and_then(Value::as_u64)
            .and_then(|index| u32::try_from(index).ok())
            .ok_or_else(|| ClientError::ResponseFormat("ledger response has no ledger_index".to_string()))
    }
}

/// A client over one WebSocket.
///
/// Cheap to clone; clones share the socket, the pending table and the
/// listeners. Nothing is spawned until [`connect`](LedgerClient::connect).
#[derive(Clone)]
pub struct Client {
    connection: Connection,
    dispatcher: Dispatcher,
    events: Arc<EventRegistry>,
    config: Arc<ClientConfig>,
}

impl Client {
    pub fn new(url: impl Into<String>, config: ClientConfig) -> Self {
        let events = Arc::new(EventRegistry::new());
        let pending = Arc::new(PendingRequests::new(events.clone()));
        let connection = Connection::new(url, config.clone(), events.clone(), pending.clone());
        let dispatcher = Dispatcher::new(connection.clone(), pending, config.request_timeout());

        Self {
            connection,
            dispatcher,
            events,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Close with a specific close code.
    pub async fn disconnect_with(&self, code: u16) -> Result<(), ClientError> {
        Ok(self.connection.disconnect(Some(code)).await?)
    }

    pub async fn request_with_timeout(
        &self,
        request: &Request,
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        self.dispatcher.request_with_timeout(request, timeout).await
    }
}

#[async_trait]
impl LedgerClient for Client {
    fn url(&self) -> &str {
        self.connection.url()
    }

    async fn connect(&self) -> Result<(), ClientError> {
        Ok(self.connection.connect().await?)
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(self.connection.disconnect(None).await?)
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    fn events(&self) -> &EventRegistry {
        &self.events
    }

    async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        self.dispatcher.request(request).await
    }

    fn submission_config(&self) -> SubmissionConfig {
        self.config.submission.clone()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
