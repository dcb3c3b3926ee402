use futures::Stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// Per-subscriber delivery slot: a bounded queue that drops its oldest entry
/// when full.
struct Slot<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl<T> Slot<T> {
    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out of events to any number of subscribers.
///
/// Publishing never waits: each subscriber owns a bounded queue, and when a
/// subscriber falls behind its oldest undelivered event is discarded. Events
/// reach every subscriber in the order they were published.
pub struct Multicast<T> {
    name: &'static str,
    capacity: usize,
    closed: AtomicBool,
    subscribers: Mutex<Vec<Weak<Slot<T>>>>,
}

impl<T: Clone> Multicast<T> {
    /// Create a multicast whose subscribers buffer at most `capacity` events.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity: capacity.max(1),
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Weak<Slot<T>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber. It only sees events published from now on;
    /// subscribing after [`Multicast::close`] yields an already-ended stream.
    pub fn subscribe(&self) -> EventStream<T> {
        let mut subscribers = self.subscribers();
        let slot = Arc::new(Slot {
            queue: Mutex::new(VecDeque::with_capacity(self.capacity)),
            notify: Notify::new(),
            closed: AtomicBool::new(self.closed.load(Ordering::Acquire)),
            dropped: AtomicU64::new(0),
        });
        subscribers.push(Arc::downgrade(&slot));
        EventStream { slot }
    }

    /// Deliver `event` to every live subscriber. Returns how many received it.
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|weak| weak.strong_count() > 0);

        let mut delivered = 0;
        for slot in subscribers.iter().filter_map(Weak::upgrade) {
            {
                let mut queue = slot.queue();
                if queue.len() >= self.capacity {
                    queue.pop_front();
                    let dropped = slot.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        stream = self.name,
                        dropped, "subscriber lagging, dropped oldest event"
                    );
                }
                queue.push_back(event.clone());
            }
            slot.notify.notify_one();
            delivered += 1;
        }
        delivered
    }

    /// Number of subscribers still holding their stream.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// End every subscriber's stream once its queue is drained.
    pub fn close(&self) {
        let mut subscribers = self.subscribers();
        self.closed.store(true, Ordering::Release);
        for slot in subscribers.drain(..).filter_map(|w| w.upgrade()) {
            slot.closed.store(true, Ordering::Release);
            slot.notify.notify_one();
        }
    }
}

/// Receiving side of a [`Multicast`] subscription.
pub struct EventStream<T> {
    slot: Arc<Slot<T>>,
}

impl<T> EventStream<T> {
    /// Wait for the next event. Returns `None` once the publisher has closed
    /// the stream and every queued event has been received.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.slot.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            self.slot.notify.notified().await;
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        self.slot.queue().pop_front()
    }

    /// How many events this subscriber lost because it fell behind.
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    /// Adapt the subscription into a `futures::Stream`.
    pub fn into_stream(self) -> impl Stream<Item = T>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |mut events| async move {
            events.recv().await.map(|event| (event, events))
        })
    }
}
