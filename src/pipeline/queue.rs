//! Capacity-limited FIFO shared between pipeline stages
//!
//! The queue has an explicit open/closed lifecycle. Closing refuses new
//! items but keeps everything already accepted retrievable, so an accepted
//! item is always either delivered by `get` or still drainable.

use crate::ConfigError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Why an item was handed back by a put
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutError<T> {
    /// The queue is at capacity
    Full(T),
    /// The queue has been closed
    Closed(T),
}

impl<T> PutError<T> {
    pub fn into_inner(self) -> T {
        match self {
            PutError::Full(item) | PutError::Closed(item) => item,
        }
    }
}

/// Outcome of a `get`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recv<T> {
    Item(T),
    /// Nothing arrived within the timeout; the queue is still open
    Empty,
    /// The queue is closed and fully drained
    Closed,
}

/// Bounded multi-producer, multi-consumer queue
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Creates an open queue holding at most `capacity` items
    ///
    /// A zero capacity is rejected rather than rounded up.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::Validation(
                "queue capacity must be >= 1".to_string(),
            ));
        }

        Ok(Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current occupancy
    ///
    /// Stale as soon as it returns; only suitable for backpressure heuristics.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueues without waiting
    pub fn try_put(&self, item: T) -> Result<(), PutError<T>> {
        {
            let mut items = self.items.lock();
            if self.closed.load(Ordering::Acquire) {
                return Err(PutError::Closed(item));
            }
            if items.len() >= self.capacity {
                return Err(PutError::Full(item));
            }
            items.push_back(item);
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Enqueues, waiting up to `timeout` for space
    ///
    /// The item is handed back if the queue stays full or gets closed.
    pub async fn put_wait(&self, item: T, timeout: Option<Duration>) -> Result<(), PutError<T>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut item = item;

        loop {
            let mut notified = pin!(self.not_full.notified());
            notified.as_mut().enable();

            match self.try_put(item) {
                Ok(()) => return Ok(()),
                Err(PutError::Closed(back)) => return Err(PutError::Closed(back)),
                Err(PutError::Full(back)) => item = back,
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(PutError::Full(item));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Enqueues an item
    ///
    /// With `blocking` false this is a pure backpressure check: a full queue
    /// returns `false` immediately and the caller decides what to do with
    /// the item. With `blocking` true it waits up to `timeout` (forever when
    /// `None`). A closed queue always returns `false`.
    pub async fn put(&self, item: T, blocking: bool, timeout: Option<Duration>) -> bool {
        if blocking {
            self.put_wait(item, timeout).await.is_ok()
        } else {
            self.try_put(item).is_ok()
        }
    }

    /// Dequeues without waiting
    pub fn try_get(&self) -> Recv<T> {
        let taken = {
            let mut items = self.items.lock();
            match items.pop_front() {
                Some(item) => Recv::Item(item),
                None if self.closed.load(Ordering::Acquire) => Recv::Closed,
                None => Recv::Empty,
            }
        };
        if matches!(taken, Recv::Item(_)) {
            self.not_full.notify_one();
        }
        taken
    }

    /// Dequeues, waiting up to `timeout`
    ///
    /// Once the queue is closed and empty this returns [`Recv::Closed`]
    /// immediately instead of waiting.
    pub async fn get(&self, timeout: Duration) -> Recv<T> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut notified = pin!(self.not_empty.notified());
            notified.as_mut().enable();

            match self.try_get() {
                Recv::Empty => {}
                taken => return taken,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Recv::Empty;
            }
        }
    }

    /// Refuses further puts; already accepted items stay retrievable
    pub fn close(&self) {
        {
            let _items = self.items.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
