//! In-process publish/subscribe.
//!
//! Every subscriber gets its own unbounded queue and its own Tokio task
//! that drains it into the handler. Publishing is therefore a handful of
//! channel sends: it never awaits, never runs handler code, and a slow
//! handler only delays its own queue. Within one subscriber, events arrive
//! in publish order.
//!
//! ```text
//!  publish(e) ──┬─ filter? ─→ [queue] ─→ task ─→ handler(e)
//!               ├─ filter? ─→ [queue] ─→ task ─→ handler(e).await
//!               └─ ...
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

type Filter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    filter: Filter<E>,
    tx: mpsc::UnboundedSender<E>,
}

struct BusInner<E> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<Subscriber<E>>>,
}

impl<E> BusInner<E> {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber<E>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cloneable handle to a publish/subscribe channel for events of type `E`.
///
/// Clones share the same subscriber list.
pub struct EventBus<E> {
    inner: Arc<BusInner<E>>,
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<E> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.inner.subscribers().len())
            .finish()
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every subscriber whose filter accepts it.
    ///
    /// Returns the number of subscribers the event was queued for.
    /// Subscribers whose handler task has gone away are pruned.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.inner.subscribers();
        let mut delivered = 0;
        subscribers.retain(|sub| {
            if !(sub.filter)(&event) {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => false,
            }
        });
        delivered
    }

    /// Subscribes a synchronous handler.
    ///
    /// Must be called from within a Tokio runtime: the handler runs on a
    /// dedicated task.
    pub fn subscribe<F, H>(&self, filter: F, mut handler: H) -> Subscription
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        H: FnMut(E) + Send + 'static,
    {
        let (subscription, mut rx) = self.channel(filter);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event);
            }
        });
        subscription
    }

    /// Subscribes an asynchronous handler. Each call is awaited before the
    /// next event is handed over, so ordering is preserved.
    pub fn subscribe_async<F, H>(&self, filter: F, mut handler: H) -> Subscription
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
        H: FnMut(E) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let (subscription, mut rx) = self.channel(filter);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler(event).await;
            }
        });
        subscription
    }

    /// Subscribes and returns the raw queue instead of spawning a task.
    ///
    /// Useful when the caller already has a loop of its own (and in tests).
    pub fn channel<F>(&self, filter: F) -> (Subscription, mpsc::UnboundedReceiver<E>)
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().push(Subscriber {
            id,
            filter: Box::new(filter),
            tx,
        });

        let weak: Weak<BusInner<E>> = Arc::downgrade(&self.inner);
        let subscription = Subscription {
            id,
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.subscribers().retain(|sub| sub.id != id);
                }
            })),
        };
        (subscription, rx)
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// Handle returned by the `subscribe*` methods.
///
/// Dropping it leaves the subscription in place; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it. Events already
/// queued for the handler are still delivered.
pub struct Subscription {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Returns the subscription's identifier (unique per bus).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the subscriber from the bus.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
