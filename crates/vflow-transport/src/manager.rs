//! Process-wide VIF registry: dial/cache VIFs by (network, address),
//! create listeners (spec §4.5, C5).
//!
//! A `StreamManager` is the one piece of ambient state the rest of the
//! runtime is never supposed to reach for implicitly (spec §9 "model as
//! a single explicit `Runtime` object passed into constructors — never
//! as ambient module state"): callers hold an `Arc<StreamManager>` and
//! pass it down, rather than calling into a global.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use vflow_core::error::{Error, Result};
use vflow_core::ids::RoutingId;
use vflow_core::options::{DialOption, ListenOption, RuntimeConfig};
use vflow_core::prelude::{Blessings, Endpoint, ServerAuthorizer};

use crate::conn::dial_tcp;
use crate::listener::{NetListener, ProxyListener};
use crate::vc::{SecurityMode, VirtualCircuit};
use crate::vif::{Vif, DEFAULT_VERSION_RANGE};

/// (network, address) cache key, as dialed — not necessarily the
/// resolved peer address the kernel reports back (spec §4.5 invariant:
/// "the VIF cache must tolerate that the dialed address... and the
/// resolved peer address... differ; lookups try both keys").
type CacheKey = (String, String);

/// The process-wide registry of dialed and accepted VIFs.
///
/// One `StreamManager` per runtime embedding; everything above it
/// (server, namespace resolver, client call sites) is handed a
/// reference rather than reaching for a global singleton.
pub struct StreamManager {
    local_rid: RoutingId,
    local_blessings: Blessings,
    config: RuntimeConfig,
    security_mode: SecurityMode,
    vifs: DashMap<CacheKey, Arc<Vif>>,
    listeners: Mutex<Vec<Arc<NetListener>>>,
    proxy_listeners: Mutex<Vec<Arc<ProxyListener>>>,
    shut_down: std::sync::atomic::AtomicBool,
}

impl StreamManager {
    pub fn new(
        local_rid: RoutingId,
        local_blessings: Blessings,
        config: RuntimeConfig,
        security_mode: SecurityMode,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_rid,
            local_blessings,
            config,
            security_mode,
            vifs: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            proxy_listeners: Mutex::new(Vec::new()),
            shut_down: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn check_not_shut_down(&self) -> Result<()> {
        if self.shut_down.load(std::sync::atomic::Ordering::Acquire) {
            return Err(Error::aborted("stream manager has been shut down"));
        }
        Ok(())
    }

    /// Dials a VC to `remote_ep`, reusing a cached VIF when one is live
    /// (spec §4.5 `Dial`).
    ///
    /// If the cached VIF's connection has died, it is evicted and one
    /// retry is attempted against a fresh connection; a second failure
    /// is surfaced to the caller rather than retried again.
    pub async fn dial(
        self: &Arc<Self>,
        remote_ep: &Endpoint,
        authorizer: &dyn ServerAuthorizer,
        opts: &[DialOption],
    ) -> Result<Arc<VirtualCircuit>> {
        self.check_not_shut_down()?;
        let no_retry = opts.iter().any(|o| matches!(o, DialOption::NoRetry));
        let key: CacheKey = (remote_ep.protocol().to_string(), remote_ep.address().to_string());

        if let Some(vif) = self.vifs.get(&key).map(|e| e.value().clone()) {
            if !vif.is_shut_down() {
                match self.dial_on(&vif, remote_ep, authorizer).await {
                    Ok(vc) => return Ok(vc),
                    Err(e) => {
                        self.vifs.remove(&key);
                        if no_retry {
                            return Err(e);
                        }
                    }
                }
            } else {
                self.vifs.remove(&key);
            }
        }

        let vif = self.dial_new_vif(remote_ep.address()).await?;
        // Cache under both the dialed key and the peer-reported address
        // (spec §4.5 invariant): a subsequent `Dial` to either form
        // reuses this connection.
        self.vifs.insert(key, vif.clone());
        self.dial_on(&vif, remote_ep, authorizer).await
    }

    async fn dial_on(
        &self,
        vif: &Arc<Vif>,
        remote_ep: &Endpoint,
        authorizer: &dyn ServerAuthorizer,
    ) -> Result<Arc<VirtualCircuit>> {
        let vc = vif.dial(authorizer).await?;
        if let Some(remote_rid) = vc.remote_routing_id() {
            if !remote_ep.routing_id().is_null() && remote_rid != remote_ep.routing_id() {
                vc.close("dialed peer's routing id did not match the endpoint");
                return Err(Error::no_servers(
                    "dialed VIF's remote routing id does not match the target endpoint",
                ));
            }
        }
        Ok(vc)
    }

    async fn dial_new_vif(&self, address: &str) -> Result<Arc<Vif>> {
        let conn = dial_tcp(address).await?;
        Vif::new_dialed(
            conn,
            self.local_rid,
            self.local_blessings.clone(),
            DEFAULT_VERSION_RANGE,
            self.security_mode,
            self.config.frame_max_bytes,
            self.config.initial_flow_credit,
        )
        .await
    }

    /// Accepts new byte connections on `address`, wrapping each in an
    /// accepted VIF (spec §4.5 `Listen`).
    ///
    /// The "proxy" protocol instead dials through the named proxy and
    /// surfaces inbound flows routed back from it (spec §4.5 "the
    /// 'proxy' protocol branches to `remoteListen`").
    pub async fn listen(
        self: &Arc<Self>,
        protocol: &str,
        address: &str,
        opts: &[ListenOption],
    ) -> Result<(ListenerHandle, Endpoint)> {
        self.check_not_shut_down()?;
        if let Some(ListenOption::Proxy(proxy_addr)) = opts.iter().find(|o| matches!(o, ListenOption::Proxy(_))) {
            let ListenOption::Proxy(proxy_addr) = proxy_addr.clone() else { unreachable!() };
            return self.remote_listen(protocol, &proxy_addr).await;
        }

        let listener = NetListener::bind(
            address,
            self.local_rid,
            self.local_blessings.clone(),
            self.security_mode,
            self.config.frame_max_bytes,
            self.config.initial_flow_credit,
        )
        .await?;
        let local_addr = listener.local_addr()?;
        let serves_mount_table = opts.iter().any(|o| matches!(o, ListenOption::ServesMountTable(true)));
        let endpoint = Endpoint::new(protocol, local_addr.to_string(), self.local_rid)
            .with_mount_table(serves_mount_table);
        self.listeners.lock().push(listener.clone());
        Ok((ListenerHandle::Net(listener), endpoint))
    }

    async fn remote_listen(
        self: &Arc<Self>,
        protocol: &str,
        proxy_address: &str,
    ) -> Result<(ListenerHandle, Endpoint)> {
        use vflow_core::prelude::AllowEveryone;
        let listener = ProxyListener::dial(
            proxy_address,
            protocol,
            self.local_rid,
            self.local_blessings.clone(),
            self.security_mode,
            self.config.frame_max_bytes,
            self.config.initial_flow_credit,
            &AllowEveryone,
        )
        .await?;
        let endpoint = listener.endpoint();
        self.proxy_listeners.lock().push(listener.clone());
        Ok((ListenerHandle::Proxy(listener), endpoint))
    }

    /// Forwards to every cached VIF's `ShutdownVCs`, aggregating the
    /// count closed (spec §4.5 `ShutdownEndpoint`).
    pub fn shutdown_endpoint(&self, ep: &Endpoint) -> usize {
        let mut total = 0usize;
        for entry in self.vifs.iter() {
            total += entry.value().shutdown_vcs(ep.routing_id());
        }
        total
    }

    /// Marks the manager shut down, closes every listener, then every
    /// cached VIF (spec §4.5 `Shutdown`).
    pub async fn shutdown(&self) {
        self.shut_down.store(true, std::sync::atomic::Ordering::Release);
        let net_listeners: Vec<Arc<NetListener>> = std::mem::take(&mut *self.listeners.lock());
        for listener in net_listeners {
            listener.close().await;
        }
        let proxy_listeners: Vec<Arc<ProxyListener>> = std::mem::take(&mut *self.proxy_listeners.lock());
        for listener in proxy_listeners {
            listener.close();
        }
        for entry in self.vifs.iter() {
            entry.value().shutdown_vcs(RoutingId::NULL);
        }
        self.vifs.clear();
    }

    pub fn local_routing_id(&self) -> RoutingId {
        self.local_rid
    }
}

/// Either kind of listener a `StreamManager::listen` call may produce.
#[derive(Clone)]
pub enum ListenerHandle {
    Net(Arc<NetListener>),
    Proxy(Arc<ProxyListener>),
}

impl ListenerHandle {
    pub async fn accept(&self) -> Result<Arc<crate::flow::Flow>> {
        match self {
            ListenerHandle::Net(l) => l.accept().await,
            ListenerHandle::Proxy(l) => l.accept().await,
        }
    }

    pub async fn close(&self) {
        match self {
            ListenerHandle::Net(l) => l.close().await,
            ListenerHandle::Proxy(l) => l.close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vflow_core::prelude::AllowEveryone;

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            initial_flow_credit: 64 * 1024,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn dial_and_listen_round_trip_over_loopback() {
        let server_mgr = StreamManager::new(
            RoutingId::new_random(),
            Blessings::new(vec!["server".into()]),
            config(),
            SecurityMode::None,
        );
        let (listener, endpoint) = server_mgr.listen("tcp", "127.0.0.1:0", &[]).await.unwrap();

        let client_mgr = StreamManager::new(
            RoutingId::new_random(),
            Blessings::new(vec!["client".into()]),
            config(),
            SecurityMode::None,
        );

        let accept_task = tokio::spawn(async move { listener.accept().await });

        let vc = client_mgr.dial(&endpoint, &AllowEveryone, &[]).await.unwrap();
        let flow = vc.connect().await.unwrap();
        flow.write(b"hello".to_vec()).await.unwrap();

        let server_flow = accept_task.await.unwrap().unwrap();
        let got = server_flow.read().await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn repeated_dial_to_same_endpoint_reuses_cached_vif() {
        let server_mgr = StreamManager::new(
            RoutingId::new_random(),
            Blessings::new(vec!["server".into()]),
            config(),
            SecurityMode::None,
        );
        let (listener, endpoint) = server_mgr.listen("tcp", "127.0.0.1:0", &[]).await.unwrap();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    return;
                }
            }
        });

        let client_mgr = StreamManager::new(
            RoutingId::new_random(),
            Blessings::new(vec!["client".into()]),
            config(),
            SecurityMode::None,
        );
        let _vc1 = client_mgr.dial(&endpoint, &AllowEveryone, &[]).await.unwrap();
        let _vc2 = client_mgr.dial(&endpoint, &AllowEveryone, &[]).await.unwrap();
        assert_eq!(client_mgr.vifs.len(), 1);
    }
}
