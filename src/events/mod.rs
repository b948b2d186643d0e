//! # Event Fan-out Hub
//!
//! Keeps the set of live client connections and broadcasts backend events to
//! all of them. Each connection gets its own outbound queue (a `may` channel)
//! with a fixed depth; a connection that cannot keep up, or whose receiving
//! side is gone, is dropped instead of slowing down everybody else.
//!
//! There is no replay: a connection only sees events published after it
//! subscribed.
//!
//! ```rust,ignore
//! let hub = Arc::new(EventHub::new(64));
//! let sub = hub.subscribe();
//! hub.publish(DomainEvent::new("encode-complete", json!({"id": 42})));
//! assert!(matches!(sub.try_recv(), Some(Outbound::Event(_))));
//! ```

pub mod sse;

use crate::ids::ConnectionId;
use may::sync::mpsc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A backend event pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: String,
    pub payload: Value,
}

impl DomainEvent {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// A message queued for one connection.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<DomainEvent>),
    Ping,
}

impl Outbound {
    /// `text/event-stream` frame for this message.
    #[must_use]
    pub fn to_frame(&self) -> String {
        match self {
            Outbound::Event(ev) => {
                let kind: String = ev
                    .kind
                    .chars()
                    .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
                    .collect();
                // serde_json never emits raw newlines, so one data line suffices
                format!("event: {kind}\ndata: {}\n\n", ev.payload)
            }
            Outbound::Ping => ": ping\n\n".to_string(),
        }
    }
}

#[derive(Clone)]
struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    pending: Arc<AtomicUsize>,
}

/// Something that can push events to clients.
pub trait EventPublisher: Send + Sync {
    /// Broadcast `event`; returns how many connections accepted it.
    fn publish(&self, event: DomainEvent) -> usize;
}

/// Backend collaborator that reports finished encodes.
///
/// Handed a publisher once the server is live; from then on it publishes
/// `encode-complete` (or any other) events whenever it likes.
pub trait EncodeCompletion: Send {
    fn ready(&mut self, publisher: Arc<dyn EventPublisher>);
}

/// Live transport the hub is attached to by [`EventHub::initialize`].
pub trait EventTransport {
    type Handle;

    /// Start accepting connections that subscribe to `hub`.
    fn attach(self, hub: Arc<EventHub>) -> io::Result<Self::Handle>;
}

/// The set of live connections.
pub struct EventHub {
    subscribers: RwLock<HashMap<ConnectionId, Subscriber>>,
    capacity: usize,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscriber_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl EventHub {
    /// `capacity` is the per-connection queue depth before it counts as slow.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Attach the hub to a live transport.
    pub fn initialize<T: EventTransport>(self: &Arc<Self>, transport: T) -> io::Result<T::Handle> {
        let handle = transport.attach(Arc::clone(self))?;
        info!(queue_depth = self.capacity, "Event hub initialized");
        Ok(handle)
    }

    /// Register a new live connection.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let total = {
            let mut subs = self.subscribers.write();
            subs.insert(
                id,
                Subscriber {
                    tx,
                    pending: Arc::clone(&pending),
                },
            );
            subs.len()
        };
        info!(connection_id = %id, subscribers = total, "Subscriber added");
        Subscription {
            id,
            rx,
            pending,
            hub: Arc::clone(self),
        }
    }

    /// Remove a connection. Returns `false` when it was not subscribed.
    pub fn unsubscribe(&self, id: ConnectionId) -> bool {
        let (removed, total) = {
            let mut subs = self.subscribers.write();
            (subs.remove(&id).is_some(), subs.len())
        };
        if removed {
            info!(connection_id = %id, subscribers = total, "Subscriber removed");
        }
        removed
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Broadcast a domain event to every current connection.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let event = Arc::new(event);
        let delivered = self.deliver(|| Outbound::Event(Arc::clone(&event)));
        debug!(kind = %event.kind, delivered = delivered, "Event published");
        delivered
    }

    /// Queue a heartbeat on every connection so dead ones get noticed.
    pub fn ping(&self) -> usize {
        self.deliver(|| Outbound::Ping)
    }

    /// Drop every connection, ending their writers.
    pub fn close_all(&self) {
        let dropped = std::mem::take(&mut *self.subscribers.write());
        if !dropped.is_empty() {
            info!(subscribers = dropped.len(), "Closed all subscribers");
        }
    }

    fn deliver<F: Fn() -> Outbound>(&self, make: F) -> usize {
        let snapshot: Vec<(ConnectionId, Subscriber)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, sub) in snapshot {
            let queued = sub.pending.fetch_add(1, Ordering::AcqRel);
            if queued >= self.capacity {
                sub.pending.fetch_sub(1, Ordering::AcqRel);
                failed.push((id, "slow"));
                continue;
            }
            if sub.tx.send(make()).is_err() {
                sub.pending.fetch_sub(1, Ordering::AcqRel);
                failed.push((id, "disconnected"));
                continue;
            }
            delivered += 1;
        }

        if !failed.is_empty() {
            let mut subs = self.subscribers.write();
            for (id, reason) in &failed {
                if subs.remove(id).is_some() {
                    warn!(connection_id = %id, reason = %reason, "Subscriber dropped");
                }
            }
        }
        delivered
    }
}

impl EventPublisher for EventHub {
    fn publish(&self, event: DomainEvent) -> usize {
        EventHub::publish(self, event)
    }
}

/// Receiving half of a live connection. Dropping it unsubscribes.
pub struct Subscription {
    id: ConnectionId,
    rx: mpsc::Receiver<Outbound>,
    pending: Arc<AtomicUsize>,
    hub: Arc<EventHub>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next message. `None` once the hub dropped this connection.
    #[must_use]
    pub fn recv(&self) -> Option<Outbound> {
        let msg = self.rx.recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }

    #[must_use]
    pub fn try_recv(&self) -> Option<Outbound> {
        let msg = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(msg)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_kind(msg: Option<Outbound>) -> Option<String> {
        match msg? {
            Outbound::Event(ev) => Some(ev.kind.clone()),
            Outbound::Ping => None,
        }
    }

    #[test]
    fn test_frame_format() {
        let ev = Outbound::Event(Arc::new(DomainEvent::new("encode-complete", json!({"id": 42}))));
        assert_eq!(ev.to_frame(), "event: encode-complete\ndata: {\"id\":42}\n\n");
        assert_eq!(Outbound::Ping.to_frame(), ": ping\n\n");
    }

    #[test]
    fn test_subscription_drop_unsubscribes_once() {
        let hub = Arc::new(EventHub::new(4));
        let sub = hub.subscribe();
        let id = sub.id();
        assert_eq!(hub.subscriber_count(), 1);
        drop(sub);
        assert_eq!(hub.subscriber_count(), 0);
        assert!(!hub.unsubscribe(id));
    }

    #[test]
    fn test_late_subscriber_sees_nothing() {
        let hub = Arc::new(EventHub::new(4));
        let early = hub.subscribe();
        assert_eq!(hub.publish(DomainEvent::new("a", json!(null))), 1);
        let late = hub.subscribe();
        assert_eq!(event_kind(early.try_recv()).as_deref(), Some("a"));
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn test_slow_subscriber_removed() {
        let hub = Arc::new(EventHub::new(2));
        let fast = hub.subscribe();
        let slow = hub.subscribe();
        for i in 0..2 {
            assert_eq!(hub.publish(DomainEvent::new("e", json!(i))), 2);
            assert!(fast.try_recv().is_some());
        }
        assert_eq!(hub.publish(DomainEvent::new("e", json!(2))), 1);
        assert_eq!(hub.subscriber_count(), 1);
        // the slow one still drains what it had, then sees the end
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_some());
        assert!(slow.try_recv().is_none());
        assert!(fast.try_recv().is_some());
    }

    #[test]
    fn test_close_all() {
        let hub = Arc::new(EventHub::new(2));
        let sub = hub.subscribe();
        hub.close_all();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(sub.recv().is_none());
    }
}
