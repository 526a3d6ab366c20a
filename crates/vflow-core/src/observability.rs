//! A thin observability facade the core calls into, rather than depending
//! on a concrete metrics backend — statistics *export* is an external
//! collaborator (spec §1), but the trait the runtime calls through is
//! ambient stack the core must own.

use std::time::Duration;

/// Minimal recording surface the server and transport layers use.
///
/// A production embedding wires this to its own metrics system; tests and
/// small deployments can use [`NoopObservability`] or
/// [`TracingObservability`].
pub trait Observability: Send + Sync + 'static {
    /// Records method latency (spec §4.7.5 step 8: "record latency in
    /// per-method statistics").
    fn record_method_latency(&self, suffix: &str, method: &str, elapsed: Duration);

    /// Records a monotonically increasing counter (VCs opened, flows
    /// opened, frames dropped, etc.).
    fn increment(&self, name: &'static str, delta: u64);
}

/// Discards everything. Useful in unit tests that don't care about
/// observability at all.
#[derive(Default, Clone, Copy)]
pub struct NoopObservability;

impl Observability for NoopObservability {
    fn record_method_latency(&self, _suffix: &str, _method: &str, _elapsed: Duration) {}
    fn increment(&self, _name: &'static str, _delta: u64) {}
}

/// Emits `tracing` events; the default for anything that just wants
/// structured logs without standing up a metrics pipeline.
#[derive(Default, Clone, Copy)]
pub struct TracingObservability;

impl Observability for TracingObservability {
    fn record_method_latency(&self, suffix: &str, method: &str, elapsed: Duration) {
        tracing::debug!(suffix, method, elapsed_us = elapsed.as_micros() as u64, "method latency");
    }

    fn increment(&self, name: &'static str, delta: u64) {
        tracing::trace!(counter = name, delta, "counter increment");
    }
}
