//! Cancellable FIFO work queue shared by the watcher, force scans and the worker.
//!
//! Producers append with [`WorkQueue::push`]; the busy gate re-queues deferred
//! items at the head with [`WorkQueue::push_front`]. The single consumer blocks
//! in [`WorkQueue::wait_pop`] until an item arrives, the timeout elapses or the
//! queue is shut down.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Inner<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Thread-safe queue with async blocking dequeue and broadcast shutdown.
#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an item to the tail and wake one waiting consumer.
    ///
    /// Items pushed after shutdown are dropped.
    pub fn push(&self, item: T) {
        {
            let mut inner = self.lock();
            if inner.shutdown {
                return;
            }
            inner.items.push_back(item);
        }
        self.available.notify_one();
    }

    /// Insert an item at the head so it is dequeued next.
    pub fn push_front(&self, item: T) {
        {
            let mut inner = self.lock();
            if inner.shutdown {
                return;
            }
            inner.items.push_front(item);
        }
        self.available.notify_one();
    }

    /// Non-blocking dequeue.
    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.lock();
        if inner.shutdown {
            return None;
        }
        inner.items.pop_front()
    }

    /// Wait for an item for at most `timeout`.
    ///
    /// Returns `None` on timeout or once the queue has been shut down; the two
    /// cases are not distinguished.
    pub async fn wait_pop(&self, timeout: Duration) -> Option<T> {
        // A timeout past the clock's range waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking state so a push between the check and
            // the await is not missed.
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                if inner.shutdown {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return None;
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Signal shutdown. Idempotent; every current and future waiter returns `None`.
    ///
    /// Pending items are discarded.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.shutdown = true;
            inner.items.clear();
        }
        self.available.notify_waiters();
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}
