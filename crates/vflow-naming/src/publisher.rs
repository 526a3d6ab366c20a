//! Mount-table publisher (spec §4.9, C9): owns a periodic remount loop
//! over every registered (name, endpoints) pair, `Mount`-ing additions
//! and `Unmount`-ing removals, and unmounts everything on `Stop`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use vflow_core::context::Cancellation;
use vflow_core::prelude::Endpoint;

use crate::client::MountTableClient;

struct Registered {
    endpoints: Vec<Endpoint>,
}

/// Drives the periodic mount loop described in spec §4.9. Construct
/// with [`Publisher::new`], call [`Publisher::run`] once to spawn the
/// background loop, then [`Publisher::add_name`]/[`Publisher::add_server`]
/// as servers come and go.
pub struct Publisher<C: MountTableClient> {
    client: Arc<C>,
    mount_tables: Vec<Endpoint>,
    period: Duration,
    ttl: Duration,
    names: Mutex<HashMap<String, Registered>>,
    stop: Cancellation,
    stopped: AtomicBool,
    stopped_notify: Notify,
}

impl<C: MountTableClient> Publisher<C> {
    pub fn new(client: Arc<C>, mount_tables: Vec<Endpoint>, period: Duration, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            mount_tables,
            period,
            ttl,
            names: Mutex::new(HashMap::new()),
            stop: Cancellation::new(),
            stopped: AtomicBool::new(false),
            stopped_notify: Notify::new(),
        })
    }

    /// Registers `name` for publishing with no servers yet (spec §4.9 `AddName`).
    pub fn add_name(&self, name: impl Into<String>) {
        self.names.lock().entry(name.into()).or_insert_with(|| Registered { endpoints: Vec::new() });
    }

    /// Associates `endpoint` with `name`; the next remount tick mounts
    /// it at every configured mount table (spec §4.9 `AddServer`).
    pub fn add_server(&self, name: impl Into<String>, endpoint: Endpoint) {
        let mut names = self.names.lock();
        let registered = names.entry(name.into()).or_insert_with(|| Registered { endpoints: Vec::new() });
        if !registered.endpoints.contains(&endpoint) {
            registered.endpoints.push(endpoint);
        }
    }

    /// Removes `endpoint` from `name`'s published set; the next
    /// remount tick unmounts it.
    pub fn remove_server(&self, name: &str, endpoint: &Endpoint) {
        if let Some(registered) = self.names.lock().get_mut(name) {
            registered.endpoints.retain(|e| e != endpoint);
        }
    }

    /// Spawns the background remount loop. The returned handle is also
    /// retained internally; callers do not need to hold onto it.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run_loop().await })
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    self.unmount_all().await;
                    self.stopped.store(true, Ordering::Release);
                    self.stopped_notify.notify_waiters();
                    return;
                }
                _ = tokio::time::sleep(self.period) => {
                    self.mount_all().await;
                }
            }
        }
    }

    async fn mount_all(&self) {
        let snapshot: Vec<(String, Vec<Endpoint>)> = self
            .names
            .lock()
            .iter()
            .map(|(name, r)| (name.clone(), r.endpoints.clone()))
            .collect();
        for (name, endpoints) in snapshot {
            for endpoint in &endpoints {
                for table in &self.mount_tables {
                    if let Err(err) = self.client.mount(table, &name, endpoint, self.ttl, true).await {
                        tracing::warn!(name = %name, table = %table.format(), error = %err, "mount-table publish failed");
                    }
                }
            }
        }
    }

    async fn unmount_all(&self) {
        let snapshot: Vec<String> = self.names.lock().keys().cloned().collect();
        for name in snapshot {
            for table in &self.mount_tables {
                if let Err(err) = self.client.unmount(table, &name, None).await {
                    tracing::warn!(name = %name, table = %table.format(), error = %err, "mount-table unpublish failed");
                }
            }
        }
    }

    /// Requests the remount loop stop: it unmounts every published name
    /// and then signals [`wait_for_stop`](Self::wait_for_stop) (spec §4.9 `Stop`).
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Resolves once the loop spawned by [`run`](Self::run) has fully
    /// unmounted and exited (spec §4.9 `WaitForStop`).
    pub async fn wait_for_stop(&self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let notified = self.stopped_notify.notified();
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PMutex;
    use vflow_core::error::Result;
    use vflow_core::ids::RoutingId;

    #[derive(Default)]
    struct RecordingClient {
        mounted: PMutex<Vec<String>>,
        unmounted: PMutex<Vec<String>>,
    }

    #[async_trait]
    impl MountTableClient for RecordingClient {
        async fn resolve_step(&self, _server: &Endpoint, _name: &str, _timeout: Duration) -> Result<vflow_core::mount::MountEntry> {
            unimplemented!()
        }

        async fn mount(&self, _server: &Endpoint, name: &str, _target: &Endpoint, _ttl: Duration, _replace: bool) -> Result<()> {
            self.mounted.lock().push(name.to_string());
            Ok(())
        }

        async fn unmount(&self, _server: &Endpoint, name: &str, _target: Option<&Endpoint>) -> Result<()> {
            self.unmounted.lock().push(name.to_string());
            Ok(())
        }
    }

    fn table() -> Endpoint {
        Endpoint::new("tcp", "127.0.0.1:1", RoutingId::new_random())
    }

    #[tokio::test]
    async fn stop_unmounts_every_published_name_and_resolves_wait_for_stop() {
        let client = Arc::new(RecordingClient::default());
        let publisher = Publisher::new(client.clone(), vec![table()], Duration::from_secs(3600), Duration::from_secs(60));
        publisher.add_server("a/b", Endpoint::new("tcp", "127.0.0.1:2", RoutingId::new_random()));
        let _handle = publisher.run();

        publisher.stop();
        publisher.wait_for_stop().await;

        assert_eq!(client.unmounted.lock().as_slice(), &["a/b".to_string()]);
    }

    #[tokio::test]
    async fn wait_for_stop_resolves_immediately_if_already_stopped() {
        let client = Arc::new(RecordingClient::default());
        let publisher = Publisher::new(client, vec![table()], Duration::from_secs(3600), Duration::from_secs(60));
        let _handle = publisher.run();
        publisher.stop();
        publisher.wait_for_stop().await;
        publisher.wait_for_stop().await;
    }
}
