//! One persistent WebSocket and its lifecycle.
//!
//! A `Connection` owns the socket through a session task that multiplexes
//! inbound frames, queued outbound frames, heartbeat pings and the close
//! request in a single `select!` loop. Nothing else ever writes to the socket.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected`, and on an unexpected
//! close `Connected -> Reconnecting` (when enabled) until a new socket is up
//! or the attempt ceiling is reached.

use crate::config::ClientConfig;
use crate::error::{ABNORMAL_CLOSURE, ConnectionError, NORMAL_CLOSURE};
use crate::events::{ClientEvent, EventRegistry};
use futures_util::{SinkExt, StreamExt};
use ledgerwire_core::ConnectionState;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a requested close waits for the server's close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Receives what arrives on the socket.
pub(crate) trait FrameHandler: Send + Sync + 'static {
    fn on_frame(&self, text: &str);
    /// The socket is gone; `err` describes how.
    fn on_close(&self, err: ConnectionError);
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    config: ClientConfig,
    events: Arc<EventRegistry>,
    handler: Arc<dyn FrameHandler>,
    link: Mutex<Link>,
    /// Held while a lifecycle event is checked against the link and emitted,
    /// so listeners see transitions in the order they happened.
    lifecycle: Mutex<()>,
    next_session: AtomicU64,
}

/// Shared outcome of one connect attempt; `None` while in flight.
type Outcome = Option<Result<(), ConnectionError>>;

enum Link {
    Idle,
    Connecting(watch::Receiver<Outcome>),
    Connected(Session),
    Reconnecting {
        attempt: u32,
        token: u64,
        task: Option<JoinHandle<()>>,
    },
}

struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<Message>,
    /// Taken once a close has been requested.
    close: Option<oneshot::Sender<u16>>,
    closed: watch::Receiver<bool>,
}

/// What a caller has to wait for before looking at the link again.
enum Wait {
    Outcome(watch::Receiver<Outcome>),
    Closed(watch::Receiver<bool>),
}

/// Which link state a fresh socket is allowed to replace.
#[derive(Clone, Copy)]
enum Expect {
    Caller,
    Reconnect(u64),
}

#[derive(Debug, Clone, Copy)]
enum SessionEnd {
    Requested(u16),
    Lost(u16),
}

impl Connection {
    pub(crate) fn new(
        url: impl Into<String>,
        config: ClientConfig,
        events: Arc<EventRegistry>,
        handler: Arc<dyn FrameHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                url: url.into(),
                config,
                events,
                handler,
                link: Mutex::new(Link::Idle),
                lifecycle: Mutex::new(()),
                next_session: AtomicU64::new(0),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.link.lock() {
            Link::Idle => ConnectionState::Disconnected,
            Link::Connecting(_) => ConnectionState::Connecting,
            Link::Connected(session) if session.close.is_some() => ConnectionState::Connected,
            Link::Connected(_) => ConnectionState::Disconnected,
            Link::Reconnecting { attempt, .. } => ConnectionState::Reconnecting { attempt: *attempt },
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Open the socket, or join the attempt already in flight.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        loop {
            let wait = {
                let mut link = self.inner.link.lock();
                match std::mem::replace(&mut *link, Link::Idle) {
                    Link::Connected(session) => {
                        if session.close.is_some() {
                            *link = Link::Connected(session);
                            return Ok(());
                        }
                        let closed = session.closed.clone();
                        *link = Link::Connected(session);
                        Wait::Closed(closed)
                    }
                    Link::Connecting(rx) => {
                        *link = Link::Connecting(rx.clone());
                        Wait::Outcome(rx)
                    }
                    Link::Reconnecting { task, .. } => {
                        if let Some(task) = task {
                            task.abort();
                        }
                        tracing::debug!("replacing reconnect loop with a fresh connect");
                        Wait::Outcome(self.start_connecting(&mut link, true))
                    }
                    Link::Idle => Wait::Outcome(self.start_connecting(&mut link, false)),
                }
            };

            match wait {
                Wait::Closed(mut closed) => {
                    let _ = closed.wait_for(|done| *done).await;
                }
                Wait::Outcome(mut outcome) => {
                    return match outcome.wait_for(Option::is_some).await {
                        Ok(result) => result.clone().unwrap_or(Err(ConnectionError::NotConnected)),
                        Err(_) => Err(ConnectionError::NotConnected),
                    };
                }
            }
        }
    }

    /// Close the socket and stay closed. Idempotent.
    pub async fn disconnect(&self, code: Option<u16>) -> Result<(), ConnectionError> {
        let code = code.unwrap_or(NORMAL_CLOSURE);
        loop {
            let wait = {
                let mut link = self.inner.link.lock();
                match std::mem::replace(&mut *link, Link::Idle) {
                    Link::Idle => return Ok(()),
                    Link::Connecting(rx) => {
                        *link = Link::Connecting(rx.clone());
                        Wait::Outcome(rx)
                    }
                    Link::Connected(mut session) => {
                        if let Some(close) = session.close.take() {
                            let _ = close.send(code);
                        }
                        let closed = session.closed.clone();
                        *link = Link::Connected(session);
                        Wait::Closed(closed)
                    }
                    Link::Reconnecting { task, attempt, .. } => {
                        if let Some(task) = task {
                            task.abort();
                        }
                        drop(link);
                        tracing::info!("stopped reconnecting to {} after {} attempts", self.inner.url, attempt);
                        let _order = self.inner.lifecycle.lock();
                        self.inner.events.emit(&ClientEvent::Disconnected { code });
                        return Ok(());
                    }
                }
            };

            match wait {
                Wait::Closed(mut closed) => {
                    let _ = closed.wait_for(|done| *done).await;
                }
                Wait::Outcome(mut outcome) => {
                    let _ = outcome.wait_for(Option::is_some).await;
                }
            }
        }
    }

    /// Queue a text frame on the live socket.
    pub(crate) fn send(&self, text: String) -> Result<(), ConnectionError> {
        match &*self.inner.link.lock() {
            Link::Connected(session) if session.close.is_some() => session
                .outbound
                .send(Message::Text(text.into()))
                .map_err(|_| ConnectionError::NotConnected),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    /// `ends_outage` is set when this attempt replaces a reconnect loop; if
    /// it fails, the outage is over and gets its terminal `Disconnected`.
    fn start_connecting(&self, link: &mut Link, ends_outage: bool) -> watch::Receiver<Outcome> {
        let (tx, rx) = watch::channel(None);
        *link = Link::Connecting(rx.clone());

        tracing::debug!("connecting to {}", self.inner.url);
        let conn = self.clone();
        tokio::spawn(async move {
            let result = match conn.handshake().await {
                Ok(ws) => {
                    if conn.install(ws, Expect::Caller) {
                        Ok(())
                    } else {
                        Err(ConnectionError::NotConnected)
                    }
                }
                Err(e) => {
                    tracing::warn!("connection to {} failed: {}", conn.inner.url, e);
                    let _order = conn.inner.lifecycle.lock();
                    let gave_up = {
                        let mut link = conn.inner.link.lock();
                        let connecting = matches!(*link, Link::Connecting(_));
                        if connecting {
                            *link = Link::Idle;
                        }
                        connecting
                    };
                    conn.inner
                        .events
                        .emit(&ClientEvent::error("websocket", e.to_string(), None));
                    if gave_up && ends_outage {
                        conn.inner.events.emit(&ClientEvent::Disconnected {
                            code: ABNORMAL_CLOSURE,
                        });
                    }
                    Err(e)
                }
            };
            let _ = tx.send(Some(result));
        });
        rx
    }

    async fn handshake(&self) -> Result<Socket, ConnectionError> {
        let limit = self.inner.config.connection_timeout();
        match tokio::time::timeout(limit, tokio_tungstenite::connect_async(self.inner.url.as_str())).await {
            Ok(Ok((ws, _))) => Ok(ws),
            Ok(Err(e)) => Err(ConnectionError::Handshake(e.to_string())),
            Err(_) => Err(ConnectionError::ConnectTimeout(limit)),
        }
    }

    /// Make `ws` the live socket if the link is still in the expected state.
    fn install(&self, ws: Socket, expect: Expect) -> bool {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed) + 1;

        {
            let mut link = self.inner.link.lock();
            let expected = match (&*link, expect) {
                (Link::Connecting(_), Expect::Caller) => true,
                (Link::Reconnecting { token, .. }, Expect::Reconnect(t)) => *token == t,
                _ => false,
            };
            if !expected {
                tracing::debug!("discarding socket, connection state moved on");
                return false;
            }
            *link = Link::Connected(Session {
                id,
                outbound: outbound_tx,
                close: Some(close_tx),
                closed: closed_rx,
            });
        }

        tracing::info!("connected to {}", self.inner.url);
        self.inner.events.emit(&ClientEvent::Connected);

        let conn = self.clone();
        tokio::spawn(async move {
            let end = conn.run_session(ws, outbound_rx, close_rx).await;
            conn.finish_session(id, end);
            let _ = closed_tx.send(true);
        });
        true
    }

    async fn run_session(
        &self,
        ws: Socket,
        mut outbound: mpsc::UnboundedReceiver<Message>,
        mut close: oneshot::Receiver<u16>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();
        let interval = self.inner.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                frame = stream.next() => {
                    last_seen = Instant::now();
                    match frame {
                        Some(Ok(Message::Text(text))) => self.inner.handler.on_frame(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.inner.handler.on_frame(text),
                            Err(_) => tracing::debug!("ignoring non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(ABNORMAL_CLOSURE, |f| u16::from(f.code));
                            tracing::debug!("server closed the connection with code {}", code);
                            return SessionEnd::Lost(code);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("socket error on {}: {}", self.inner.url, e);
                            return SessionEnd::Lost(ABNORMAL_CLOSURE);
                        }
                        None => return SessionEnd::Lost(ABNORMAL_CLOSURE),
                    }
                }

                Some(message) = outbound.recv() => {
                    if let Err(e) = sink.send(message).await {
                        tracing::warn!("write to {} failed: {}", self.inner.url, e);
                        return SessionEnd::Lost(ABNORMAL_CLOSURE);
                    }
                }

                code = &mut close => {
                    let code = code.unwrap_or(NORMAL_CLOSURE);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: "".into(),
                    };
                    if sink.send(Message::Close(Some(frame))).await.is_ok() {
                        // Drain until the server acknowledges the close.
                        let _ = tokio::time::timeout(CLOSE_GRACE, async {
                            while let Some(Ok(_)) = stream.next().await {}
                        })
                        .await;
                    }
                    return SessionEnd::Requested(code);
                }

                _ = heartbeat.tick() => {
                    if last_seen.elapsed() >= interval * 2 {
                        tracing::warn!("no traffic from {} for {:?}, dropping socket", self.inner.url, last_seen.elapsed());
                        return SessionEnd::Lost(ABNORMAL_CLOSURE);
                    }
                    if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                        tracing::warn!("ping to {} failed: {}", self.inner.url, e);
                        return SessionEnd::Lost(ABNORMAL_CLOSURE);
                    }
                }
            }
        }
    }

    fn finish_session(&self, id: u64, end: SessionEnd) {
        let policy = &self.inner.config.reconnect;
        let reconnect_token = {
            let mut link = self.inner.link.lock();
            match &*link {
                Link::Connected(session) if session.id == id => {}
                _ => return,
            }
            match end {
                SessionEnd::Lost(_) if policy.enabled && policy.max_attempts > 0 => {
                    let token = self.inner.next_session.fetch_add(1, Ordering::Relaxed) + 1;
                    *link = Link::Reconnecting {
                        attempt: 1,
                        token,
                        task: None,
                    };
                    Some(token)
                }
                _ => {
                    *link = Link::Idle;
                    None
                }
            }
        };

        let code = match end {
            SessionEnd::Requested(code) | SessionEnd::Lost(code) => code,
        };
        tracing::info!("disconnected from {} (code {})", self.inner.url, code);
        self.inner.handler.on_close(ConnectionError::Disconnected { code });

        let Some(token) = reconnect_token else {
            self.inner.events.emit(&ClientEvent::Disconnected { code });
            return;
        };

        if !self.announce_attempt(token, 1) {
            return;
        }
        let conn = self.clone();
        let task = tokio::spawn(async move { conn.reconnect(token).await });

        let mut link = self.inner.link.lock();
        match &mut *link {
            Link::Reconnecting { token: t, task: slot, .. } if *t == token => *slot = Some(task),
            _ => task.abort(),
        }
    }

    /// Record `attempt` and emit `Reconnecting`, unless the reconnect loop
    /// identified by `token` has already been stopped or replaced.
    fn announce_attempt(&self, token: u64, attempt: u32) -> bool {
        let _order = self.inner.lifecycle.lock();
        {
            let mut link = self.inner.link.lock();
            match &mut *link {
                Link::Reconnecting { token: t, attempt: a, .. } if *t == token => *a = attempt,
                _ => return false,
            }
        }
        self.inner.events.emit(&ClientEvent::Reconnecting { attempt });
        true
    }

    async fn reconnect(self, token: u64) {
        let policy = self.inner.config.reconnect.clone();

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 && !self.announce_attempt(token, attempt) {
                return;
            }

            let delay = policy.delay_for_attempt(attempt);
            tracing::info!("reconnecting to {} in {:?} (attempt {}/{})", self.inner.url, delay, attempt, policy.max_attempts);
            tokio::time::sleep(delay).await;

            match self.handshake().await {
                Ok(ws) => {
                    self.install(ws, Expect::Reconnect(token));
                    return;
                }
                Err(e) => tracing::warn!("reconnect attempt {} to {} failed: {}", attempt, self.inner.url, e),
            }
        }

        let _order = self.inner.lifecycle.lock();
        {
            let mut link = self.inner.link.lock();
            if !matches!(&*link, Link::Reconnecting { token: t, .. } if *t == token) {
                return;
            }
            *link = Link::Idle;
        }

        let err = ConnectionError::ReconnectExhausted {
            attempts: policy.max_attempts,
        };
        tracing::error!("{}: {}", self.inner.url, err);
        self.inner
            .events
            .emit(&ClientEvent::error("reconnectFailed", err.to_string(), None));
        self.inner.events.emit(&ClientEvent::Disconnected {
            code: ABNORMAL_CLOSURE,
        });
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish()
    }
}
