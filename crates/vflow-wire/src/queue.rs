//! A bounded, closable FIFO of byte slices (spec §4.2, C2).
//!
//! The queue sits between a flow's writer and the VIF's writer-scheduler
//! goroutine (here, task): `put` enqueues outgoing bytes, `get` dequeues
//! them for transmission. `close` lets pending items drain before
//! signalling end-of-queue; `shutdown` discards them immediately. Both
//! end states are terminal and report [`vflow_core::ErrorKind::Aborted`]
//! once reached.
//!
//! `put` never blocks: the VIF's read-dispatch loop calls it directly on
//! the receive path (spec §5 "no operation may block the VIF
//! read-dispatch loop for longer than a frame decode"), so a full queue
//! must fail fast rather than suspend. Capacity is instead the thing
//! that makes the backpressure real: a peer that keeps sending once a
//! flow's inbound queue is full is sending faster than the credit it was
//! granted allows, which is a protocol violation, not a condition to
//! wait out.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;
use vflow_core::error::{Error, Result};

/// Capacity used by [`Default`] and by callers with no sizing opinion of
/// their own.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, PartialEq, Eq)]
enum State {
    Open,
    /// `close` was called: no new puts are accepted, but items already
    /// queued are still handed out by `get` before it reports closed.
    Closing,
    /// `shutdown` was called, or `Closing` drained fully: `get` always
    /// reports `Aborted` from here on.
    Shutdown,
}

struct Inner {
    items: VecDeque<Vec<u8>>,
    state: State,
}

/// A single-consumer, single-producer bounded byte-slice queue.
///
/// Cloning shares the underlying queue (it is reference-counted via
/// `Arc` internally through the owning `Queue` value itself — callers
/// that need multiple handles should wrap a `Queue` in their own `Arc`).
pub struct Queue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl Queue {
    /// Builds a queue that holds at most `capacity` items before `put`
    /// starts failing (spec §4.2 "a *bounded* FIFO").
    pub fn new(capacity: usize) -> Self {
        Queue {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                state: State::Open,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueues one item. Fails with `Aborted` once the queue has been
    /// closed or shut down (spec §4.2 "Put after Close or Shutdown
    /// fails") or once it already holds `capacity` items ("bounded
    /// FIFO").
    pub fn put(&self, item: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Open => {
                if inner.items.len() >= self.capacity {
                    return Err(Error::aborted("queue is at capacity"));
                }
                inner.items.push_back(item);
                drop(inner);
                self.notify.notify_waiters();
                Ok(())
            }
            State::Closing | State::Shutdown => Err(Error::aborted("queue is closed")),
        }
    }

    /// Dequeues the next item, waiting if none is ready yet, or
    /// cancelling (returning `Canceled`) if `cancel` resolves first.
    ///
    /// After `close`, pending items still drain; once the queue is empty
    /// `get` reports `Aborted` (spec §4.2 "Get after full drain reports
    /// `ErrQueueClosed`"). After `shutdown`, `get` reports `Aborted`
    /// immediately regardless of what was still queued.
    pub async fn get(&self, cancel: &vflow_core::Cancellation) -> Result<Vec<u8>> {
        loop {
            // The `Notified` future must be created — and so registered
            // as a listener — before the emptiness check below, not
            // after: `notify_waiters` stores no permit for a future
            // `notified()` call, so creating it only once we already
            // know we're about to wait would let a `put`/`close` landing
            // in between go unseen until some later, unrelated wakeup.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Ok(item);
                }
                if inner.state != State::Open {
                    inner.state = State::Shutdown;
                    return Err(Error::aborted("queue is closed"));
                }
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.cancelled() => return Err(Error::canceled("get canceled")),
            }
        }
    }

    /// Stops accepting new items; queued items still drain via `get`.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == State::Open {
            inner.state = State::Closing;
        }
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Discards any queued items and makes every subsequent `get` report
    /// `Aborted` immediately.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.items.clear();
        inner.state = State::Shutdown;
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vflow_core::Cancellation;

    #[tokio::test]
    async fn put_then_get_round_trips_in_order() {
        let q = Queue::new(DEFAULT_CAPACITY);
        q.put(b"first".to_vec()).unwrap();
        q.put(b"second".to_vec()).unwrap();
        let cancel = Cancellation::new();
        assert_eq!(q.get(&cancel).await.unwrap(), b"first");
        assert_eq!(q.get(&cancel).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn put_fails_once_capacity_is_reached() {
        let q = Queue::new(2);
        q.put(b"a".to_vec()).unwrap();
        q.put(b"b".to_vec()).unwrap();
        assert!(q.put(b"c".to_vec()).is_err());
        let cancel = Cancellation::new();
        assert_eq!(q.get(&cancel).await.unwrap(), b"a");
        q.put(b"c".to_vec()).unwrap();
        assert_eq!(q.get(&cancel).await.unwrap(), b"b");
        assert_eq!(q.get(&cancel).await.unwrap(), b"c");
    }

    #[tokio::test]
    async fn close_drains_pending_then_reports_aborted() {
        let q = Queue::new(DEFAULT_CAPACITY);
        q.put(b"pending".to_vec()).unwrap();
        q.close();
        assert!(q.put(b"too late".to_vec()).is_err());
        let cancel = Cancellation::new();
        assert_eq!(q.get(&cancel).await.unwrap(), b"pending");
        let err = q.get(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::Aborted);
    }

    #[tokio::test]
    async fn shutdown_discards_pending_immediately() {
        let q = Queue::new(DEFAULT_CAPACITY);
        q.put(b"discarded".to_vec()).unwrap();
        q.shutdown();
        let cancel = Cancellation::new();
        let err = q.get(&cancel).await.unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::Aborted);
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn get_is_canceled_by_cancellation() {
        let q = Arc::new(Queue::new(DEFAULT_CAPACITY));
        let cancel = Cancellation::new();
        let waiter = {
            let q = q.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { q.get(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), vflow_core::ErrorKind::Canceled);
    }

    #[tokio::test]
    async fn get_wakes_when_item_is_put() {
        let q = Arc::new(Queue::new(DEFAULT_CAPACITY));
        let cancel = Cancellation::new();
        let waiter = {
            let q = q.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { q.get(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.put(b"late".to_vec()).unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), b"late");
    }
}
