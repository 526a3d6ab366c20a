//! Cancellation and deadline propagation (spec §5 "Cancellation").
//!
//! Every call in the runtime carries a [`CallContext`]: a cancellation
//! token shared with the caller and an optional absolute deadline.
//! Cancelling the token MUST cause the receiving flow to transition to
//! closed (spec §5); the server-side flow loop cancels the method's task
//! when the flow closes (spec §4.7.5).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// A shared cancellation flag plus a notifier for tasks awaiting it.
#[derive(Clone)]
pub struct Cancellation {
    inner: Arc<CancellationInner>,
}

struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancellationInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels this token. Idempotent; wakes every task in [`cancelled`](Self::cancelled).
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Resolves once [`cancel`](Self::cancel) has been called. Resolves
    /// immediately if it already has.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// An absolute deadline, or none.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub const fn none() -> Self {
        Deadline(None)
    }

    pub fn at(instant: Instant) -> Self {
        Deadline(Some(instant))
    }

    pub fn after(duration: Duration) -> Self {
        Deadline(Some(Instant::now() + duration))
    }

    pub fn instant(self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(self) -> bool {
        self.0.is_some_and(|d| Instant::now() >= d)
    }

    pub fn remaining(self) -> Option<Duration> {
        self.0.map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Full per-call metadata: cancellation, deadline, and the trace/language
/// fields carried on the wire request header (spec §3 "Request header").
#[derive(Clone)]
pub struct CallContext {
    cancellation: Cancellation,
    deadline: Deadline,
    trace_id: Option<String>,
    language: Option<String>,
}

impl CallContext {
    pub fn new() -> Self {
        Self {
            cancellation: Cancellation::new(),
            deadline: Deadline::none(),
            trace_id: None,
            language: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// A read-only view carrying the same cancellation token with a fresh
    /// deadline — used when a server hop derives a sub-call's context.
    pub fn view(&self) -> Context<'_> {
        Context {
            cancellation: &self.cancellation,
            deadline: self.deadline,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

/// A cheap, `Copy`-able read-only view over a [`CallContext`]'s
/// cancellation/deadline pair — the minimal projection most call sites
/// (credit checks, poll-ready style decisions) actually need.
#[derive(Clone, Copy)]
pub struct Context<'a> {
    cancellation: &'a Cancellation,
    deadline: Deadline,
}

impl<'a> Context<'a> {
    pub fn new(cancellation: &'a Cancellation, deadline: Deadline) -> Self {
        Self {
            cancellation,
            deadline,
        }
    }

    pub fn cancellation(&self) -> &'a Cancellation {
        self.cancellation
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellation_wakes_pending_waiters() {
        let token = Cancellation::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        tokio::task::yield_now().await;
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn deadline_none_never_expires_without_instant() {
        let d = Deadline::none();
        assert!(d.instant().is_none());
        assert!(!d.is_expired());
    }
}
