//! JSON-RPC over HTTP.
//!
//! Same contract as the socket client, minus streams: there is nothing to
//! connect, and every request is an independent POST.

use crate::client::LedgerClient;
use crate::config::{ClientConfig, SubmissionConfig};
use crate::error::ClientError;
use crate::events::EventRegistry;
use async_trait::async_trait;
use ledgerwire_core::{Request, Response, RippledError};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    timeout: Duration,
    submission: SubmissionConfig,
    events: EventRegistry,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(url: impl Into<String>, config: &ClientConfig) -> Result<Self, ClientError> {
        let timeout = config.request_timeout();
        let http = reqwest::Client::builder()
            .connect_timeout(config.connection_timeout())
            .timeout(timeout)
            .build()?;

        Ok(Self {
            url: url.into(),
            http,
            timeout,
            submission: config.submission.clone(),
            events: EventRegistry::new(),
            next_id: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl LedgerClient for HttpClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn events(&self) -> &EventRegistry {
        &self.events
    }

    fn submission_config(&self) -> SubmissionConfig {
        self.submission.clone()
    }

    async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let body = json!({
            "method": request.command,
            "params": [request.params],
        });
        tracing::debug!("POST {} {} (id {})", self.url, request.command, id);

        let reply = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| self.transport_error(id, e))?;
        let mut payload: Value = reply.json().await.map_err(|e| self.transport_error(id, e))?;

        let result = payload
            .get_mut("result")
            .map(Value::take)
            .ok_or_else(|| ClientError::ResponseFormat("reply has no result".to_string()))?;

        if result.get("status").and_then(Value::as_str) == Some("error") || result.get("error").is_some() {
            let err: RippledError = serde_json::from_value(result)
                .map_err(|e| ClientError::ResponseFormat(e.to_string()))?;
            return Err(err.into());
        }
        Ok(Response::from_result(Value::from(id), result))
    }
}

impl HttpClient {
    fn transport_error(&self, id: u64, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                id,
                after: self.timeout,
            }
        } else {
            err.into()
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient").field("url", &self.url).finish()
    }
}
