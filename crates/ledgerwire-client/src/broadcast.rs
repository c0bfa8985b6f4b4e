//! One logical client over several servers.
//!
//! Reads are sent to every member and the first successful reply wins; the
//! other members' requests run to completion and their replies are dropped.
//! `connect` and `disconnect` go to every member and succeed only if all of
//! them do.
//!
//! Markers are only valid on the server that issued them. A paged reply
//! remembers which member answered it, and `request_next_page` for that
//! marker goes to that member alone.

use crate::client::{Client, LedgerClient};
use crate::config::{ClientConfig, SubmissionConfig};
use crate::error::{ClientError, ConnectionError, NORMAL_CLOSURE};
use crate::events::{ClientEvent, EventKind, EventRegistry};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream::FuturesUnordered;
use ledgerwire_core::{Request, Response};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

/// Markers remembered for `request_next_page`.
const MARKER_HISTORY: usize = 64;

#[derive(Clone)]
pub struct BroadcastClient {
    inner: Arc<Shared>,
}

struct Shared {
    members: Vec<Client>,
    events: Arc<EventRegistry>,
    /// Serialized marker and the index of the member that issued it.
    markers: Mutex<VecDeque<(String, usize)>>,
}

impl BroadcastClient {
    pub fn new<I, S>(urls: I, config: ClientConfig) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members: Vec<Client> = urls
            .into_iter()
            .map(|url| Client::new(url, config.clone()))
            .collect();
        if members.is_empty() {
            return Err(ClientError::validation("broadcast client needs at least one server url"));
        }

        let events = Arc::new(EventRegistry::new());
        for member in &members {
            let aggregate = events.clone();
            member.events().on(EventKind::Error, move |event| aggregate.emit(event));
        }

        Ok(Self {
            inner: Arc::new(Shared {
                members,
                events,
                markers: Mutex::new(VecDeque::new()),
            }),
        })
    }

    pub fn members(&self) -> &[Client] {
        &self.inner.members
    }

    /// Run `call` on every member and return the first success with the
    /// index of the member that produced it.
    async fn race<T, F, Fut>(&self, call: F) -> Result<(usize, T), ClientError>
    where
        F: Fn(Client) -> Fut,
        Fut: Future<Output = Result<T, ClientError>> + Send + 'static,
        T: Send + 'static,
    {
        let mut in_flight: FuturesUnordered<_> = self
            .inner
            .members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let task = tokio::spawn(call(member.clone()));
                async move { (index, task.await) }
            })
            .collect();

        let mut first_error = None;
        while let Some((index, joined)) = in_flight.next().await {
            match joined {
                Ok(Ok(value)) => return Ok((index, value)),
                Ok(Err(e)) => {
                    tracing::debug!("broadcast member failed: {}", e);
                    first_error.get_or_insert(e);
                }
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(_) => {}
            }
        }
        Err(first_error.unwrap_or(ClientError::Connection(ConnectionError::NotConnected)))
    }

    fn remember_marker(&self, response: &Response, member: usize) {
        let Some(marker) = response.marker() else {
            return;
        };
        let mut markers = self.inner.markers.lock();
        if markers.len() == MARKER_HISTORY {
            markers.pop_front();
        }
        markers.push_back((marker.to_string(), member));
    }

    fn marker_owner(&self, response: &Response) -> Option<usize> {
        let marker = response.marker()?.to_string();
        let mut markers = self.inner.markers.lock();
        let position = markers.iter().rposition(|(m, _)| *m == marker)?;
        markers.remove(position).map(|(_, member)| member)
    }
}

#[async_trait]
impl LedgerClient for BroadcastClient {
    /// The first member's url.
    fn url(&self) -> &str {
        self.inner.members.first().map_or("", |m| m.url())
    }

    async fn connect(&self) -> Result<(), ClientError> {
        let results = join_all(self.inner.members.iter().map(|m| m.connect())).await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        self.inner.events.emit(&ClientEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), ClientError> {
        let results = join_all(self.inner.members.iter().map(|m| m.disconnect())).await;
        results.into_iter().collect::<Result<Vec<_>, _>>()?;
        self.inner.events.emit(&ClientEvent::Disconnected {
            code: NORMAL_CLOSURE,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.members.iter().all(|m| m.is_connected())
    }

    fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    async fn request(&self, request: &Request) -> Result<Response, ClientError> {
        let (member, response) = self
            .race(|member| {
                let request = request.clone();
                async move { member.request(&request).await }
            })
            .await?;
        self.remember_marker(&response, member);
        Ok(response)
    }

    /// Sent only to the member that issued `previous`'s marker. A marker
    /// this client did not hand out is raced like any other request.
    async fn request_next_page(
        &self,
        request: &Request,
        previous: &Response,
    ) -> Result<Response, ClientError> {
        let next = request.next_page(previous).ok_or(ClientError::NoNextPage)?;
        let Some(index) = self.marker_owner(previous) else {
            return self.request(&next).await;
        };
        let member = &self.inner.members[index];
        let response = member.request(&next).await?;
        self.remember_marker(&response, index);
        Ok(response)
    }

    /// Markers are server-specific, so each member pages on its own.
    async fn request_all(&self, request: &Request) -> Result<Vec<Response>, ClientError> {
        self.race(|member| {
            let request = request.clone();
            async move { member.request_all(&request).await }
        })
        .await
        .map(|(_, pages)| pages)
    }

    fn submission_config(&self) -> SubmissionConfig {
        self.inner
            .members
            .first()
            .map(|member| member.submission_config())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for BroadcastClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastClient")
            .field("members", &self.inner.members)
            .finish()
    }
}
