//! Lifecycle event bus
//!
//! Components that change shared state (the session store, both registries
//! and the engine) publish an [`Event`] on an [`EventBus`] that is created
//! once at startup and handed to each constructor. Subscribers receive events
//! through a `tokio::sync::broadcast` channel; a bounded ring of recent
//! events is kept for inspection and tests.
//!
//! # Examples
//!
//! ```
//! use parley::events::{EventBus, EventKind};
//!
//! let bus = EventBus::new(16);
//! bus.emit(EventKind::ServerAdded, "server_registry", serde_json::json!({"name": "fs"}));
//! assert_eq!(bus.recent(10).len(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default number of events kept in the recent-history ring.
pub const DEFAULT_HISTORY: usize = 256;

/// Kinds of lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionCreated,
    SessionClosed,
    SessionUpdated,
    ServerAdded,
    ServerRemoved,
    ServerConnected,
    ServerDisconnected,
    ProviderAdded,
    ProviderRemoved,
    ProviderConnected,
    ProviderDisconnected,
    ToolCallFailed,
    ProviderFailed,
    MessageProcessed,
}

/// A single published notification
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// Component that published the event
    pub source: String,
    /// Event payload
    pub data: serde_json::Value,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
}

/// Explicitly constructed publish/subscribe hub
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    history: Mutex<VecDeque<Event>>,
    history_limit: usize,
}

impl EventBus {
    /// Create a bus keeping at most `history_limit` recent events.
    ///
    /// The broadcast channel uses the same capacity; slow subscribers that
    /// fall further behind observe `RecvError::Lagged`.
    pub fn new(history_limit: usize) -> Self {
        let capacity = history_limit.max(1);
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            history_limit: capacity,
        }
    }

    /// Publish an event to every subscriber and record it in history.
    ///
    /// Publishing never fails: having no subscribers is normal.
    pub fn emit(&self, kind: EventKind, source: &str, data: serde_json::Value) {
        let event = Event {
            kind,
            source: source.to_string(),
            data,
            timestamp: Utc::now(),
        };
        tracing::trace!(?kind, source, "event emitted");

        {
            let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
            if history.len() == self.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Return up to `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<Event> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Count recorded events of one kind.
    pub fn count(&self, kind: EventKind) -> usize {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        history.iter().filter(|e| e.kind == kind).count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}
