//! Publish/subscribe registry for connection and stream events.
//!
//! Listeners may be added or removed at any time, including from inside a
//! listener: `emit` snapshots the listener list before calling out.

use ledgerwire_core::{StreamKind, StreamMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected { code: u16 },
    Reconnecting { attempt: u32 },
    Error {
        kind: String,
        message: String,
        data: Option<Value>,
    },
    Stream(StreamMessage),
}

impl ClientEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ClientEvent::Connected => EventKind::Connected,
            ClientEvent::Disconnected { .. } => EventKind::Disconnected,
            ClientEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ClientEvent::Error { .. } => EventKind::Error,
            ClientEvent::Stream(msg) => EventKind::Stream(msg.kind),
        }
    }

    pub(crate) fn error(kind: impl Into<String>, message: impl Into<String>, data: Option<Value>) -> Self {
        ClientEvent::Error {
            kind: kind.into(),
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    Error,
    Stream(StreamKind),
}

/// Handle returned by [`EventRegistry::on`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        for entries in listeners.values_mut() {
            if let Some(pos) = entries.iter().position(|(lid, _)| *lid == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn off_all(&self, kind: EventKind) {
        self.listeners.lock().remove(&kind);
    }

    /// Deliver events of `kind` to a channel instead of a callback.
    pub fn channel(&self, kind: EventKind) -> (ListenerId, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on(kind, move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.lock().get(&kind).map_or(0, Vec::len)
    }

    pub fn emit(&self, event: &ClientEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .get(&event.kind())
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();

        for listener in snapshot {
            listener(event);
        }
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("EventRegistry")
            .field("kinds", &listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
