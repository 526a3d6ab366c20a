//! Byte-credit accounting for flow-controlled writes (spec §4.4.4).
//!
//! A writer may send up to `min(per-flow credit, shared credit)` bytes
//! before blocking; each `Data` frame debits both pools by the payload
//! size, each `AddReceiveBuffers` credits both. Permits double as bytes:
//! a [`tokio::sync::Semaphore`] with `n` permits represents `n` bytes of
//! outstanding send credit, and `acquire_many` is exactly the "wait until
//! enough credit exists" operation this accounting needs.
//!
//! Priority between system and user flows is not expressed here — it is
//! the writer-scheduler's job (see `vif::WriteScheduler`) to service
//! reserved flow ids ahead of user ids when both have sendable data.
//! This module only ever represents byte budgets, never ordering.

use std::sync::Arc;

use tokio::sync::{AcquireError, Semaphore};
use vflow_core::error::{Error, Result};

/// The VC-wide shared credit pool (flow id zero, spec §3/§4.4.3).
#[derive(Clone)]
pub struct SharedCredit {
    semaphore: Arc<Semaphore>,
}

impl SharedCredit {
    pub fn new(initial_bytes: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(initial_bytes as usize)),
        }
    }

    pub fn add(&self, bytes: u32) {
        if bytes > 0 {
            self.semaphore.add_permits(bytes as usize);
        }
    }
}

/// Per-flow send credit, checked jointly with the VC's [`SharedCredit`].
pub struct FlowCredit {
    semaphore: Semaphore,
    shared: SharedCredit,
}

impl FlowCredit {
    pub fn new(initial_bytes: u32, shared: SharedCredit) -> Self {
        Self {
            semaphore: Semaphore::new(initial_bytes as usize),
            shared,
        }
    }

    /// Grants `bytes` more of this flow's own credit (does not touch the
    /// shared pool; use [`SharedCredit::add`] for `AddReceiveBuffers`
    /// frames addressed to flow zero).
    pub fn add(&self, bytes: u32) {
        if bytes > 0 {
            self.semaphore.add_permits(bytes as usize);
        }
    }

    /// Blocks until `bytes` of credit are available in *both* pools,
    /// then debits both. Acquires the per-flow pool before the shared
    /// pool everywhere in this crate, so no two callers can deadlock
    /// waiting on each other's half-held permits.
    pub async fn debit(&self, bytes: u32) -> Result<()> {
        if bytes == 0 {
            return Ok(());
        }
        let flow_permits = self
            .semaphore
            .acquire_many(bytes)
            .await
            .map_err(acquire_closed)?;
        let shared_permits = self
            .shared
            .semaphore
            .acquire_many(bytes)
            .await
            .map_err(acquire_closed)?;
        flow_permits.forget();
        shared_permits.forget();
        Ok(())
    }

    pub fn close(&self) {
        self.semaphore.close();
    }
}

fn acquire_closed(_: AcquireError) -> Error {
    Error::aborted("credit pool closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debit_blocks_until_both_pools_have_credit() {
        let shared = SharedCredit::new(10);
        let flow = FlowCredit::new(4, shared.clone());
        flow.debit(4).await.unwrap();

        let flow = Arc::new(flow);
        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.debit(4).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        flow.add(4);
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shared_exhaustion_blocks_even_with_flow_credit() {
        let shared = SharedCredit::new(2);
        let flow = FlowCredit::new(100, shared.clone());
        flow.debit(2).await.unwrap();

        let flow = Arc::new(flow);
        let waiter = {
            let flow = flow.clone();
            tokio::spawn(async move { flow.debit(2).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        shared.add(2);
        waiter.await.unwrap().unwrap();
    }
}
