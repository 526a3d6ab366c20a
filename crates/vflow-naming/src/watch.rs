//! Bridges a server's live endpoint set into a [`Publisher`]'s
//! registered servers (spec §4.7.4 roaming: "on `NewAddrs`/`RmAddrs`,
//! recompute endpoints... and publish additions/unpublish removals").
//!
//! `vflow-server` has no naming awareness, so this glue lives here: it
//! subscribes to a `tokio::sync::watch::Receiver<Vec<Endpoint>>` (what
//! `vflow_server::Server::watch_endpoints` returns) and diffs each
//! update against the previous snapshot.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use vflow_core::prelude::Endpoint;

use crate::client::MountTableClient;
use crate::publisher::Publisher;

/// Spawns a task that keeps `name`'s published servers on `publisher`
/// in sync with `endpoints_rx`'s updates for as long as the channel
/// stays open.
pub fn bridge_endpoints<C: MountTableClient>(
    publisher: Arc<Publisher<C>>,
    name: impl Into<String>,
    mut endpoints_rx: watch::Receiver<Vec<Endpoint>>,
) -> JoinHandle<()> {
    let name = name.into();
    publisher.add_name(name.clone());
    tokio::spawn(async move {
        let mut previous: Vec<Endpoint> = endpoints_rx.borrow().clone();
        for endpoint in &previous {
            publisher.add_server(name.clone(), endpoint.clone());
        }
        while endpoints_rx.changed().await.is_ok() {
            let current = endpoints_rx.borrow().clone();
            for endpoint in &previous {
                if !current.contains(endpoint) {
                    publisher.remove_server(&name, endpoint);
                }
            }
            for endpoint in &current {
                if !previous.contains(endpoint) {
                    publisher.add_server(name.clone(), endpoint.clone());
                }
            }
            previous = current;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PMutex;
    use std::time::Duration;
    use vflow_core::error::Result;
    use vflow_core::ids::RoutingId;
    use vflow_core::mount::MountEntry;

    #[derive(Default)]
    struct RecordingClient {
        mounted: PMutex<Vec<String>>,
    }

    #[async_trait]
    impl MountTableClient for RecordingClient {
        async fn resolve_step(&self, _server: &Endpoint, _name: &str, _timeout: Duration) -> Result<MountEntry> {
            unimplemented!()
        }
        async fn mount(&self, _server: &Endpoint, name: &str, target: &Endpoint, _ttl: Duration, _replace: bool) -> Result<()> {
            self.mounted.lock().push(format!("{name}->{}", target.format()));
            Ok(())
        }
        async fn unmount(&self, _server: &Endpoint, _name: &str, _target: Option<&Endpoint>) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn roaming_update_publishes_the_new_endpoint() {
        let client = Arc::new(RecordingClient::default());
        let publisher = Publisher::new(
            client.clone(),
            vec![Endpoint::new("tcp", "127.0.0.1:1", RoutingId::new_random())],
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        let ep1 = Endpoint::new("tcp", "10.0.0.1:100", RoutingId::new_random());
        let (tx, rx) = watch::channel(vec![ep1.clone()]);
        let _bridge = bridge_endpoints(publisher.clone(), "a/b", rx);
        let _run = publisher.run();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.mounted.lock().iter().any(|m| m.contains(&ep1.format())));

        let ep2 = Endpoint::new("tcp", "10.0.0.2:100", RoutingId::new_random());
        tx.send(vec![ep2.clone()]).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(client.mounted.lock().iter().any(|m| m.contains(&ep2.format())));

        publisher.stop();
        publisher.wait_for_stop().await;
    }
}
