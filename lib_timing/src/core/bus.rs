//! # Event Bus
//!
//! In-process typed publish/subscribe for [`RaceEvent`]s. The bus decouples
//! the ingestion path from its consumers: a feed task emits without knowing
//! who listens, and a slow consumer can never stall delivery to the others.
//!
//! Each subscriber owns an unbounded MPSC channel; `emit` fans an
//! `Arc<RaceEvent>` out to every matching channel and drops subscribers
//! whose receiver has gone away. Delivery from one producer to one
//! subscriber is FIFO; no ordering is promised across subscribers.
//!
//! The bus is an explicitly constructed instance, not a process-wide
//! registry, so tests (and multi-tenant embeddings) can run isolated buses
//! side by side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::core::events::{EventKind, RaceEvent};

/// Predicate applied to events before delivery to one subscriber.
pub type EventFilter = Box<dyn Fn(&RaceEvent) -> bool + Send + Sync>;

/// Opaque handle returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: u64,
    kinds: Vec<EventKind>,
    filter: Option<EventFilter>,
    sender: mpsc::UnboundedSender<Arc<RaceEvent>>,
}

impl Subscriber {
    fn accepts(&self, event: &RaceEvent) -> bool {
        self.kinds.contains(&event.kind())
            && self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

/// Process-local publish/subscribe registry.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a subscription for the given kinds and returns the receiver
    /// end of its queue. Pass `None` as the filter to accept every event of
    /// those kinds.
    pub fn subscribe(
        &self,
        kinds: &[EventKind],
        filter: Option<EventFilter>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<Arc<RaceEvent>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.push(Subscriber {
            id,
            kinds: kinds.to_vec(),
            filter,
            sender: tx,
        });
        log::debug!("bus subscription {} registered for {:?}", id, kinds);
        (SubscriptionId(id), rx)
    }

    /// Convenience wrapper around [`subscribe`](Self::subscribe): spawns a
    /// task that invokes `handler` for each delivered event. Must be called
    /// from within a tokio runtime.
    pub fn register<F>(
        &self,
        kinds: &[EventKind],
        filter: Option<EventFilter>,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(Arc<RaceEvent>) + Send + 'static,
    {
        let (id, mut rx) = self.subscribe(kinds, filter);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
        id
    }

    /// Removes a subscription. Its receiver sees the channel close.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|s| s.id != id.0);
    }

    /// Fans an event out to every subscriber whose kind set and filter
    /// accept it. Never blocks on a consumer; subscribers whose receiver was
    /// dropped are pruned here.
    pub fn emit(&self, event: RaceEvent) {
        let event = Arc::new(event);
        let mut subscribers = self.subscribers.lock().expect("bus lock poisoned");
        subscribers.retain(|subscriber| {
            if !subscriber.accepts(&event) {
                return true;
            }
            match subscriber.sender.send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(_) => {
                    log::debug!("bus subscription {} gone, removing", subscriber.id);
                    false
                }
            }
        });
    }

    /// Number of live subscriptions, for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}
