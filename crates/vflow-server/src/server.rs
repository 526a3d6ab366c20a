//! The server: `Listen`/`Serve`/roaming/`Stop` and the per-flow request
//! loop (spec §4.7.2-§4.7.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;
use vflow_core::context::{CallContext, Deadline};
use vflow_core::error::{Error, Result};
use vflow_core::options::{ListenOption, RuntimeConfig, ServerOption};
use vflow_core::prelude::Endpoint;
use vflow_transport::{Flow, ListenerHandle, StreamManager};

use crate::call::ServerStream;
use crate::dispatcher::{Authorizer, Dispatcher, RESERVED_NAME_PREFIX};
use crate::invoker::Invoker;
use crate::state::{ServerState, ServerStateMachine};
use crate::wire::{RequestHeader, ResponseHeader};

/// One requested (protocol, address) pair for [`Server::listen`].
#[derive(Clone, Debug)]
pub struct ListenSpec {
    pub protocol: String,
    pub address: String,
}

impl ListenSpec {
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
        }
    }
}

/// A network-address change a settings watcher hands to
/// [`Server::run_roaming_loop`] (spec §4.7.4 "`NewAddrs`/`RmAddrs`
/// notifications from a settings publisher").
#[derive(Clone, Debug)]
pub enum AddrChange {
    New(Vec<String>),
    Removed(Vec<String>),
}

struct RoamingListener {
    protocol: String,
    port: String,
}

/// The dispatch server (spec §4.7, C7).
///
/// Deliberately holds no reference to a namespace publisher type: spec
/// C8/C9 (the namespace resolver/publisher) depends on this crate, not
/// the other way around, so roaming endpoint changes are handed out
/// over [`Server::endpoints`], a plain `watch` channel a publisher can
/// subscribe to rather than a direct call edge back into this crate.
pub struct Server {
    stream_manager: Arc<StreamManager>,
    dispatcher: Arc<dyn Dispatcher>,
    reserved_dispatcher: Arc<dyn Dispatcher>,
    config: RuntimeConfig,
    is_leaf: bool,
    state: ServerStateMachine,
    listeners: Mutex<Vec<ListenerHandle>>,
    roaming_listeners: Mutex<Vec<RoamingListener>>,
    endpoints: RwLock<Vec<Endpoint>>,
    endpoints_tx: watch::Sender<Vec<Endpoint>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopping: AtomicBool,
}

impl Server {
    pub fn new(
        stream_manager: Arc<StreamManager>,
        dispatcher: Arc<dyn Dispatcher>,
        reserved_dispatcher: Arc<dyn Dispatcher>,
        config: RuntimeConfig,
        options: &[ServerOption],
    ) -> Arc<Self> {
        let is_leaf = options.iter().any(|o| matches!(o, ServerOption::IsLeaf));
        let (endpoints_tx, _rx) = watch::channel(Vec::new());
        Arc::new(Self {
            stream_manager,
            dispatcher,
            reserved_dispatcher,
            config,
            is_leaf,
            state: ServerStateMachine::new(),
            listeners: Mutex::new(Vec::new()),
            roaming_listeners: Mutex::new(Vec::new()),
            endpoints: RwLock::new(Vec::new()),
            endpoints_tx,
            tasks: Mutex::new(Vec::new()),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> ServerState {
        self.state.current()
    }

    /// Currently published endpoints.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.read().clone()
    }

    /// Subscribes to endpoint-set changes — the channel
    /// `vflow-naming`'s publisher watches (see module docs).
    pub fn watch_endpoints(&self) -> watch::Receiver<Vec<Endpoint>> {
        self.endpoints_tx.subscribe()
    }

    fn publish_endpoints(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.write() = endpoints.clone();
        let _ = self.endpoints_tx.send(endpoints);
    }

    /// Spec §4.7.2 `Listen`: binds every requested (protocol, address),
    /// derives externally visible endpoints, and — if `proxy` names a
    /// proxy — starts the reconnect loop of §4.7.3.
    pub async fn listen(
        self: &Arc<Self>,
        specs: &[ListenSpec],
        proxy: Option<String>,
        serves_mount_table: bool,
    ) -> Result<Vec<Endpoint>> {
        self.state.transition(ServerState::Listening)?;

        let mut endpoints = Vec::new();
        for spec in specs {
            let opts = [ListenOption::ServesMountTable(serves_mount_table)];
            match self.stream_manager.listen(&spec.protocol, &spec.address, &opts).await {
                Ok((handle, endpoint)) => {
                    if is_unspecified_host(&spec.address) {
                        self.roaming_listeners.lock().push(RoamingListener {
                            protocol: spec.protocol.clone(),
                            port: port_of(endpoint.address()),
                        });
                    }
                    endpoints.push(endpoint);
                    self.listeners.lock().push(handle);
                }
                Err(e) => {
                    tracing::warn!(protocol = %spec.protocol, address = %spec.address, error = %e, "listen failed");
                }
            }
        }

        if let Some(proxy_address) = proxy {
            let protocol = specs.first().map(|s| s.protocol.as_str()).unwrap_or("tcp");
            let opts = [ListenOption::Proxy(proxy_address.clone())];
            let (handle, endpoint) = self.stream_manager.listen(protocol, "", &opts).await?;
            endpoints.push(endpoint);
            self.listeners.lock().push(handle);
            self.spawn_proxy_reconnect_loop(proxy_address);
        } else if endpoints.is_empty() {
            return Err(Error::bad_arg("Listen produced no usable listener and no proxy was configured"));
        }

        self.publish_endpoints(endpoints.clone());
        Ok(endpoints)
    }

    /// Spec §4.7.3: dial-register-publish; on control-flow loss,
    /// unpublish, back off exponentially between `proxy_backoff_min` and
    /// `proxy_backoff_max`, then re-dial. Stops only once the server
    /// starts stopping.
    fn spawn_proxy_reconnect_loop(self: &Arc<Self>, proxy_address: String) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut backoff = this.config.proxy_backoff_min;
            loop {
                if this.stopping.load(Ordering::Acquire) {
                    return;
                }
                match this
                    .stream_manager
                    .listen("proxy", &proxy_address, &[ListenOption::Proxy(proxy_address.clone())])
                    .await
                {
                    Ok((handle, endpoint)) => {
                        backoff = this.config.proxy_backoff_min;
                        let mut endpoints = this.endpoints.read().clone();
                        endpoints.push(endpoint.clone());
                        this.publish_endpoints(endpoints);
                        this.listeners.lock().push(handle.clone());
                        // Block until the proxy's control flow closes, signalled by
                        // `accept` finally returning an error (spec §4.6: the
                        // listener itself never retries).
                        loop {
                            if this.stopping.load(Ordering::Acquire) {
                                return;
                            }
                            if handle.accept().await.is_err() {
                                break;
                            }
                        }
                        let kept: Vec<Endpoint> = this
                            .endpoints
                            .read()
                            .iter()
                            .filter(|e| *e != endpoint)
                            .cloned()
                            .collect();
                        this.publish_endpoints(kept);
                    }
                    Err(e) => {
                        tracing::warn!(proxy = %proxy_address, error = %e, "proxy dial failed");
                    }
                }
                if this.stopping.load(Ordering::Acquire) {
                    return;
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(this.config.proxy_backoff_max);
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Spec §4.7.4 roaming: on an address-set change, recompute
    /// externally visible endpoints for every roaming listener and
    /// publish the delta.
    pub async fn run_roaming_loop(self: &Arc<Self>, mut changes: mpsc::Receiver<AddrChange>) {
        while let Some(change) = changes.recv().await {
            let roaming = self.roaming_listeners.lock();
            if roaming.is_empty() {
                continue;
            }
            let mut endpoints = self.endpoints.read().clone();
            match change {
                AddrChange::New(hosts) => {
                    for listener in roaming.iter() {
                        for host in &hosts {
                            let address = format!("{host}:{}", listener.port);
                            endpoints.push(
                                Endpoint::new(listener.protocol.clone(), address, self.stream_manager.local_routing_id()),
                            );
                        }
                    }
                }
                AddrChange::Removed(hosts) => {
                    endpoints.retain(|e| {
                        !hosts.iter().any(|h| e.address().starts_with(&format!("{h}:")))
                    });
                }
            }
            drop(roaming);
            self.publish_endpoints(endpoints);
        }
    }

    /// Spec §4.7.5: accepts flows off every bound listener and runs the
    /// per-flow request loop for each, independently.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        self.state.transition(ServerState::Serving)?;
        let listeners: Vec<ListenerHandle> = std::mem::take(&mut *self.listeners.lock());
        for listener in listeners {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok(flow) => {
                            let this = this.clone();
                            let task = tokio::spawn(async move {
                                this.flow_server_loop(flow).await;
                            });
                            this.tasks.lock().push(task);
                        }
                        Err(_) => return,
                    }
                }
            });
            self.tasks.lock().push(handle);
        }
        Ok(())
    }

    /// Transitions into `Publishing`; publishing itself is driven by the
    /// `vflow-naming` crate's `Publisher` reading [`Server::watch_endpoints`].
    pub fn begin_publishing(&self) -> Result<()> {
        self.state.transition(ServerState::Publishing)
    }

    /// Spec §4.7.5 steps 1-9, run independently per accepted flow.
    async fn flow_server_loop(self: Arc<Self>, flow: Arc<Flow>) {
        let start = Instant::now();
        // Step 1: bounded header decode.
        let header_bytes = match tokio::time::timeout(self.config.default_call_timeout, flow.read()).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "flow closed before request header arrived");
                return;
            }
            Err(_) => {
                self.respond_error(&flow, Error::bad_protocol("timed out waiting for request header")).await;
                return;
            }
        };
        let header = match RequestHeader::decode(header_bytes) {
            Ok(h) => h,
            Err(e) => {
                self.respond_error(&flow, e).await;
                return;
            }
        };

        // Step 2: tracing span plus deadline/cancellation scope. Entered
        // via `Instrument` below rather than held across awaits: an
        // `Entered` guard is `!Send` and this future is spawned onto a
        // multi-threaded executor.
        let span = tracing::info_span!("rpc", target = %format!("{}.{}", header.suffix, header.method));
        let deadline = if header.deadline_millis == 0 {
            Deadline::none()
        } else {
            Deadline::after(Duration::from_millis(header.deadline_millis))
        };
        let mut ctx = CallContext::new().with_deadline(deadline);
        if let Some(trace_id) = header.trace_id.clone() {
            ctx = ctx.with_trace_id(trace_id);
        }

        // Step 3: the VC has already authenticated by the time any user
        // flow exists, so the peer's granted blessings are read straight
        // off the flow rather than resolved from a wire-level cache
        // reference (see `Flow::peer_blessings`).
        let peer_blessings = flow.peer_blessings().clone();

        if let Err(e) = self
            .run_request(&ctx, &header, &peer_blessings, &flow)
            .instrument(span)
            .await
        {
            self.respond_error(&flow, e).await;
        }
        tracing::debug!(elapsed = ?start.elapsed(), method = %header.method, "request handled");
    }

    async fn run_request(
        &self,
        ctx: &CallContext,
        header: &RequestHeader,
        peer_blessings: &vflow_core::prelude::Blessings,
        flow: &Arc<Flow>,
    ) -> Result<()> {
        // Step 4: look up the invoker.
        let is_reserved =
            header.method.starts_with(RESERVED_NAME_PREFIX) || header.suffix.starts_with(RESERVED_NAME_PREFIX);
        let (invoker, authorizer): (Arc<dyn Invoker>, Arc<dyn Authorizer>) = if is_reserved {
            self.reserved_dispatcher
                .lookup(&header.suffix)?
                .ok_or_else(|| Error::unknown_suffix(format!("no reserved object at suffix {}", header.suffix)))?
        } else if self.is_leaf && !header.suffix.is_empty() {
            return Err(Error::unknown_suffix(format!(
                "leaf server does not export suffix {}",
                header.suffix
            )));
        } else {
            self.dispatcher
                .lookup(&header.suffix)?
                .ok_or_else(|| Error::unknown_suffix(format!("no object at suffix {}", header.suffix)))?
        };

        // Step 5: argument placeholders and tags.
        let prepare = invoker.prepare(&header.method)?;
        if prepare.num_args != header.num_args {
            for _ in 0..header.num_args {
                let _ = flow.read().await;
            }
            return Err(Error::bad_protocol(format!(
                "method {} expects {} args, request carried {}",
                header.method, prepare.num_args, header.num_args
            )));
        }

        // Step 6: decode each argument placeholder. The value codec
        // itself is external (spec §1); this loop only drains the
        // framed blobs it produced, one `Flow::read` per argument.
        let mut args = Vec::with_capacity(header.num_args as usize);
        for _ in 0..header.num_args {
            let bytes = flow
                .read()
                .await
                .map_err(|e| Error::bad_arg("failed to read argument placeholder").with_source(e))?;
            args.push(Bytes::from(bytes));
        }

        // Step 7: authorization.
        authorizer.authorize(ctx, peer_blessings)?;

        // Step 8: invoke.
        let stream = ServerStream::new(flow.clone());
        let results = tokio::select! {
            _ = ctx.cancellation().cancelled() => return Err(Error::canceled("call cancelled")),
            r = invoker.invoke(ctx, &header.method, args, &stream) => r?,
        };

        // Step 9: response header, then each result.
        let response = ResponseHeader::ok(results.len() as u32);
        flow.write(response.encode()).await.map_err(|e| Error::bad_protocol("failed to write response header").with_source(e))?;
        for result in results {
            flow.write(result.to_vec())
                .await
                .map_err(|e| Error::bad_protocol("failed to write result value").with_source(e))?;
        }
        Ok(())
    }

    async fn respond_error(&self, flow: &Arc<Flow>, err: Error) {
        let response = ResponseHeader::from_error(&err);
        if flow.write(response.encode()).await.is_err() {
            tracing::debug!(error = %err, "could not deliver error response, flow already gone");
        }
    }

    /// Spec §4.7.6 `Stop`: transition to `Stopping` (idempotent),
    /// close every listener concurrently, wait up to
    /// `stop_grace_period` for in-flight request tasks, then
    /// `Stopped`. Unmounting names is `vflow-naming`'s `Publisher`'s
    /// job, driven off [`Server::watch_endpoints`] going empty.
    pub async fn stop(self: &Arc<Self>) -> Result<()> {
        if matches!(self.state.current(), ServerState::Stopping | ServerState::Stopped) {
            return Ok(());
        }
        self.state.transition(ServerState::Stopping)?;
        self.stopping.store(true, Ordering::Release);
        self.publish_endpoints(Vec::new());

        let listeners: Vec<ListenerHandle> = std::mem::take(&mut *self.listeners.lock());
        let closes = listeners.iter().map(|l| l.close());
        futures::future::join_all(closes).await;

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let grace = self.config.stop_grace_period;
        let _ = tokio::time::timeout(grace, futures::future::join_all(tasks)).await;

        self.state.transition(ServerState::Stopped)
    }
}

fn is_unspecified_host(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, _)) => host.is_empty() || host == "0.0.0.0" || host == "::",
        None => true,
    }
}

fn port_of(address: &str) -> String {
    address.rsplit_once(':').map(|(_, p)| p.to_string()).unwrap_or_default()
}
