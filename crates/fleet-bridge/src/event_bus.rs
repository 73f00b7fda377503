//! Fan-out event bus: a bounded ring buffer plus subscriber fan-out, with
//! since-ID replay so a late-joining SSE client can catch up before
//! switching to the live tail.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fleet_core::types::{ChangeEvent, FeedEvent};

/// Anything the bus can carry: it must expose a sortable ID for replay.
pub trait BusEvent: Clone + Send + Sync + 'static {
    fn event_id(&self) -> &str;
}

impl BusEvent for FeedEvent {
    fn event_id(&self) -> &str {
        &self.id
    }
}

impl BusEvent for ChangeEvent {
    fn event_id(&self) -> &str {
        &self.id
    }
}

struct Subscriber<T> {
    id: u64,
    filter: Arc<dyn Fn(&T) -> bool + Send + Sync>,
    tx: flume::Sender<T>,
}

struct Inner<T> {
    ring: VecDeque<T>,
    cap: usize,
    subscribers: Vec<Subscriber<T>>,
    next_subscriber_id: u64,
}

/// A single bus instance backs one feature's event stream (feed, or the
/// skills change bus). Cloning shares the same ring and subscriber set.
#[derive(Clone)]
pub struct EventBus<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

pub struct Subscription<T> {
    pub stream: flume::Receiver<T>,
    bus: EventBus<T>,
    id: u64,
}

impl<T> Subscription<T> {
    /// Idempotent: calling more than once, or letting the value drop, is safe.
    pub fn cancel(&self) {
        self.bus.unsubscribe(self.id);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T: BusEvent> EventBus<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                ring: VecDeque::with_capacity(cap.min(4096)),
                cap,
                subscribers: Vec::new(),
                next_subscriber_id: 0,
            })),
        }
    }

    /// Append to the ring (evicting the oldest entry past capacity), then
    /// synchronously fan out to every current subscriber. A subscriber
    /// whose channel is disconnected is pruned; errors from a `filter`
    /// closure are not possible (`filter` is infallible by construction).
    pub fn publish(&self, event: T) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.ring.push_back(event.clone());
        while inner.ring.len() > inner.cap {
            inner.ring.pop_front();
        }
        inner
            .subscribers
            .retain(|sub| !(sub.filter)(&event) || sub.tx.send(event.clone()).is_ok());
    }

    /// Register a subscriber. If `since_id` is set, the returned stream
    /// first yields every ring entry with an ID greater than `since_id`
    /// (lexicographic compare — IDs are ULID-like and sort by creation
    /// order) before any live event, with no duplicate and no gap across
    /// the replay-then-live transition: the ring is read and the
    /// subscriber installed under the same lock.
    pub fn subscribe(
        &self,
        filter: impl Fn(&T) -> bool + Send + Sync + 'static,
        since_id: Option<&str>,
    ) -> Subscription<T> {
        let (tx, rx) = flume::unbounded();
        let filter = Arc::new(filter);
        let mut inner = self.inner.lock().expect("event bus lock poisoned");

        if let Some(since) = since_id {
            for event in inner.ring.iter() {
                if event.event_id() > since && (filter)(event) {
                    let _ = tx.send(event.clone());
                }
            }
        }

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;
        inner.subscribers.push(Subscriber {
            id,
            filter: filter.clone(),
            tx,
        });

        Subscription {
            stream: rx,
            bus: self.clone(),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().expect("event bus lock poisoned");
        inner.subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event bus lock poisoned").subscribers.len()
    }

    pub fn ring_len(&self) -> usize {
        self.inner.lock().expect("event bus lock poisoned").ring.len()
    }
}
