//! The bounded MPMC queue used between pipeline stages.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::time::{self, Duration, Instant};

use crate::error::{PopError, PushError};

/// A bounded multi-producer, multi-consumer queue.
///
/// `StageQueue` is the only channel between adjacent pipeline stages.
/// Producers block (asynchronously) when the buffer is full, which is
/// how backpressure propagates upstream. Consumers block when it is
/// empty.
///
/// Closing the queue is a one-way switch: pushes fail immediately with
/// [`PushError::Closed`], while pops continue to deliver buffered items
/// until the queue is empty and only then report [`PopError::Closed`].
/// Closing twice is a no-op, so both ends can call it defensively.
///
/// Handles are cheap to clone; all clones share the same buffer.
pub struct StageQueue<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    name: String,
    capacity: usize,
    inner: Mutex<Inner<T>>,
    /// Signalled when a slot frees up (or the queue closes).
    space: Notify,
    /// Signalled when an item arrives (or the queue closes).
    items: Notify,
}

struct Inner<T> {
    buffer: VecDeque<T>,
    closed: bool,
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> StageQueue<T> {
    /// Creates a bounded queue holding at most `capacity` items.
    ///
    /// The `name` shows up in logs and in the `panoptes_queue_depth`
    /// gauge, so give each hop a distinct one (for example
    /// `"lobby/detect"`).
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero. A zero-capacity queue could never
    /// accept an item.
    pub fn bounded(name: impl Into<String>, capacity: usize) -> Self {
        assert!(capacity > 0, "stage queue capacity must be at least 1");
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                capacity,
                inner: Mutex::new(Inner {
                    buffer: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                space: Notify::new(),
                items: Notify::new(),
            }),
        }
    }

    /// Enqueues `item`, waiting for a free slot if the queue is full.
    ///
    /// Returns the item back inside [`PushError::Closed`] if the queue
    /// was closed before a slot opened up.
    pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
        self.push_inner(item, None).await
    }

    /// Like [`push`](Self::push), but gives up after `timeout`.
    ///
    /// The item is returned inside [`PushError::Timeout`] so the caller
    /// decides whether to retry it or count it as dropped.
    pub async fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        self.push_inner(item, Some(Instant::now() + timeout)).await
    }

    /// Dequeues the next item, waiting for one to arrive if the queue
    /// is empty.
    ///
    /// Returns [`PopError::Closed`] only once the queue is closed *and*
    /// drained. Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> Result<T, PopError> {
        self.pop_inner(None).await
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`.
    ///
    /// A [`PopError::Timeout`] means the queue is still open and merely
    /// idle; [`PopError::Closed`] keeps its drained-and-done meaning.
    pub async fn pop_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        self.pop_inner(Some(Instant::now() + timeout)).await
    }

    /// Closes the queue. Idempotent.
    ///
    /// Pending and future pushes fail with [`PushError::Closed`];
    /// buffered items remain poppable until drained. All blocked
    /// producers and consumers are woken exactly once.
    pub fn close(&self) {
        let newly_closed = {
            let mut inner = self.lock();
            !std::mem::replace(&mut inner.closed, true)
        };
        if newly_closed {
            self.shared.space.notify_waiters();
            self.shared.items.notify_waiters();
            tracing::debug!(queue = %self.shared.name, "stage queue closed");
        }
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// True when no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    async fn push_inner(&self, item: T, deadline: Option<Instant>) -> Result<(), PushError<T>> {
        loop {
            // Register interest before checking state, otherwise a
            // wakeup issued between the check and the await is lost.
            let notified = self.shared.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(PushError::Closed(item));
                }
                if inner.buffer.len() < self.shared.capacity {
                    inner.buffer.push_back(item);
                    let depth = inner.buffer.len();
                    drop(inner);
                    self.shared.items.notify_one();
                    self.record_depth(depth);
                    return Ok(());
                }
            }

            match deadline {
                Some(at) => {
                    if time::timeout_at(at, notified).await.is_err() {
                        return Err(PushError::Timeout(item));
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn pop_inner(&self, deadline: Option<Instant>) -> Result<T, PopError> {
        loop {
            let notified = self.shared.items.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if let Some(item) = inner.buffer.pop_front() {
                    let depth = inner.buffer.len();
                    drop(inner);
                    self.shared.space.notify_one();
                    self.record_depth(depth);
                    return Ok(item);
                }
                // Drained: only now does closed become visible to pops.
                if inner.closed {
                    return Err(PopError::Closed);
                }
            }

            match deadline {
                Some(at) => {
                    if time::timeout_at(at, notified).await.is_err() {
                        return Err(PopError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Critical sections never leave the buffer half-updated, so a
        // poisoned lock is still coherent and safe to take over.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_depth(&self, depth: usize) {
        metrics::gauge!("panoptes_queue_depth", "queue" => self.shared.name.clone())
            .set(depth as f64);
    }
}
