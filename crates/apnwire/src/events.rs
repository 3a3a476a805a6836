//! Event bus for `error`, `drain` and `feedback` occurrences.
//!
//! Observers are plain closures keyed by [`EventKind`]. A persistent observer
//! stays registered until [`EventBus::off`]; a single-fire observer is removed
//! right after its first delivery. Observers of one kind run in registration
//! order.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::codec::FeedbackRecord;
use crate::errors::ChannelError;

/// Event names observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A channel failed.
    Error,
    /// All queued outbound data has been handed to the transport.
    Drain,
    /// A rejected device was reported by the feedback service.
    Feedback,
}

impl EventKind {
    /// Event name as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Drain => "drain",
            Self::Feedback => "feedback",
        }
    }
}

/// A rejected-device report, as delivered to `feedback` observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackEvent {
    /// When the device rejected a notification. Serializes as seconds
    /// since the Unix epoch, as on the wire.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Device token as lowercase hex.
    pub device: String,
}

impl From<&FeedbackRecord> for FeedbackEvent {
    fn from(record: &FeedbackRecord) -> Self {
        Self {
            timestamp: record.rejected_at(),
            device: record.device_hex(),
        }
    }
}

/// An occurrence delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Channel failure, prefixed with the channel name when displayed.
    Error(ChannelError),
    /// Outbound queue and transport buffer are empty.
    Drain,
    /// Rejected-device report.
    Feedback(FeedbackEvent),
}

impl ClientEvent {
    /// The kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Error(_) => EventKind::Error,
            Self::Drain => EventKind::Drain,
            Self::Feedback(_) => EventKind::Feedback,
        }
    }
}

/// Handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

/// Observer callback.
pub type Observer = Box<dyn FnMut(&ClientEvent) + Send>;

struct Entry {
    id: SubscriptionId,
    once: bool,
    observer: Observer,
}

/// Multi-observer publish mechanism keyed by event kind.
#[derive(Default)]
pub struct EventBus {
    observers: HashMap<EventKind, Vec<Entry>>,
    next_id: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<_, _> = self.observers.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventBus").field("observers", &counts).finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a persistent observer.
    pub fn on(&mut self, kind: EventKind, observer: Observer) -> SubscriptionId {
        let id = self.allocate_id();
        self.insert(kind, id, false, observer);
        id
    }

    /// Register an observer that is removed after its first delivery.
    pub fn once(&mut self, kind: EventKind, observer: Observer) -> SubscriptionId {
        let id = self.allocate_id();
        self.insert(kind, id, true, observer);
        id
    }

    /// Register under an id allocated elsewhere (by the client handle).
    pub(crate) fn insert(&mut self, kind: EventKind, id: SubscriptionId, once: bool, observer: Observer) {
        self.observers.entry(kind).or_default().push(Entry { id, once, observer });
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        let mut removed = false;
        for entries in self.observers.values_mut() {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            removed |= entries.len() != before;
        }
        removed
    }

    /// Deliver an event to every observer of its kind. Returns how many ran.
    pub fn emit(&mut self, event: &ClientEvent) -> usize {
        let Some(entries) = self.observers.get_mut(&event.kind()) else {
            return 0;
        };
        for entry in entries.iter_mut() {
            (entry.observer)(event);
        }
        let delivered = entries.len();
        entries.retain(|e| !e.once);
        delivered
    }

    /// Number of observers registered for `kind`.
    pub fn observer_count(&self, kind: EventKind) -> usize {
        self.observers.get(&kind).map_or(0, Vec::len)
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        // Locally allocated ids live in the upper half so they never collide
        // with ids handed out by the client.
        SubscriptionId(u64::MAX - self.next_id)
    }
}
