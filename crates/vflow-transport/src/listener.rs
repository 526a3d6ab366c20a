//! Accept-side entry points: a plain network listener and a proxied one
//! (spec §4.6, C6).

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use vflow_core::error::{Error, Result};
use vflow_core::ids::RoutingId;
use vflow_core::prelude::{Blessings, Cancellation, Endpoint, ServerAuthorizer};

use crate::conn::{dial_tcp, TcpRawListener};
use crate::flow::Flow;
use crate::vc::SecurityMode;
use crate::vif::{Accepted, Vif, DEFAULT_VERSION_RANGE};

/// Owns one bound network listener; every accepted connection becomes an
/// accepted VIF whose flows are forwarded into this listener's accept
/// queue (spec §4.6 `netListener`).
pub struct NetListener {
    raw: Arc<TcpRawListener>,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<Arc<Flow>>>,
    shutdown: Cancellation,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NetListener {
    pub async fn bind(
        address: &str,
        local_rid: RoutingId,
        local_blessings: Blessings,
        security_mode: SecurityMode,
        frame_max: u32,
        initial_flow_credit: u32,
    ) -> Result<Arc<Self>> {
        let raw = Arc::new(TcpRawListener::bind(address).await?);
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shutdown = Cancellation::new();
        let listener = Arc::new(Self {
            raw: raw.clone(),
            accept_rx: AsyncMutex::new(accept_rx),
            shutdown: shutdown.clone(),
            tasks: Mutex::new(Vec::new()),
        });

        let tasks_for_loop = Arc::new(Mutex::new(Vec::<JoinHandle<()>>::new()));
        let handle = tokio::spawn(net_accept_loop(
            raw,
            accept_tx,
            local_rid,
            local_blessings,
            security_mode,
            frame_max,
            initial_flow_credit,
            shutdown,
            tasks_for_loop.clone(),
        ));
        listener.tasks.lock().push(handle);
        Ok(listener)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.raw.local_addr()
    }

    pub async fn accept(&self) -> Result<Arc<Flow>> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::aborted("listener closed"))
    }

    /// Stops accepting, shuts the accept queue, and waits for the accept
    /// loop and every per-VIF forwarder it spawned (spec §4.6 `Close`).
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn net_accept_loop(
    raw: Arc<TcpRawListener>,
    accept_tx: mpsc::UnboundedSender<Arc<Flow>>,
    local_rid: RoutingId,
    local_blessings: Blessings,
    security_mode: SecurityMode,
    frame_max: u32,
    initial_flow_credit: u32,
    shutdown: Cancellation,
    per_vif_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = raw.accept() => r,
        };
        let (conn, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        let accept_tx = accept_tx.clone();
        let local_blessings = local_blessings.clone();
        let handle = tokio::spawn(async move {
            let vif = match Vif::new_accepted(
                conn,
                local_rid,
                local_blessings,
                DEFAULT_VERSION_RANGE,
                security_mode,
                frame_max,
                initial_flow_credit,
            )
            .await
            {
                Ok(vif) => vif,
                Err(e) => {
                    tracing::warn!(error = %e, %peer, "VIF setup failed");
                    return;
                }
            };
            loop {
                match vif.accept().await {
                    Ok(Accepted::Flow(flow)) => {
                        if accept_tx.send(flow).is_err() {
                            return;
                        }
                    }
                    Ok(Accepted::NewVc(_)) => continue,
                    Err(_) => return,
                }
            }
        });
        per_vif_tasks.lock().push(handle);
    }
}

const PROXY_REQUEST_TAG: u8 = 1;
const PROXY_RESPONSE_TAG: u8 = 2;

struct ProxyResponse {
    endpoint: String,
}

fn encode_proxy_request() -> Vec<u8> {
    vec![PROXY_REQUEST_TAG]
}

fn decode_proxy_response(mut bytes: Bytes) -> Result<ProxyResponse> {
    if bytes.is_empty() || bytes.get_u8() != PROXY_RESPONSE_TAG {
        return Err(Error::bad_protocol("malformed proxy.Response"));
    }
    if bytes.len() < 4 {
        return Err(Error::bad_protocol("truncated proxy.Response"));
    }
    let len = bytes.get_u32() as usize;
    if bytes.len() < len {
        return Err(Error::bad_protocol("truncated proxy.Response endpoint"));
    }
    let endpoint = String::from_utf8(bytes.split_to(len).to_vec())
        .map_err(|e| Error::bad_protocol("proxy.Response endpoint is not utf-8").with_source(e))?;
    Ok(ProxyResponse { endpoint })
}

#[allow(dead_code)]
fn encode_proxy_response(endpoint: &str) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_u8(PROXY_RESPONSE_TAG);
    buf.put_u32(endpoint.len() as u32);
    buf.put_slice(endpoint.as_bytes());
    buf.to_vec()
}

/// Dials a VC to a proxy, registers over a control flow, and forwards
/// flows the proxy routes back in (spec §4.6 `proxyListener`).
///
/// Reconnection is explicitly not this type's job (spec §4.6: "the
/// *Server* is responsible for reconnection logic; the listener does not
/// retry") — once the control flow observes EOF or an error, this
/// listener marks itself closed and stays that way.
pub struct ProxyListener {
    control_flow: Arc<Flow>,
    endpoint: Endpoint,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<Arc<Flow>>>,
    shutdown: Cancellation,
}

impl ProxyListener {
    #[allow(clippy::too_many_arguments)]
    pub async fn dial(
        proxy_address: &str,
        local_protocol: &str,
        local_rid: RoutingId,
        local_blessings: Blessings,
        security_mode: SecurityMode,
        frame_max: u32,
        initial_flow_credit: u32,
        authorizer: &dyn ServerAuthorizer,
    ) -> Result<Arc<Self>> {
        let conn = dial_tcp(proxy_address).await?;
        let vif = Vif::new_dialed(
            conn,
            local_rid,
            local_blessings,
            DEFAULT_VERSION_RANGE,
            security_mode,
            frame_max,
            initial_flow_credit,
        )
        .await?;
        let vc = vif.dial(authorizer).await?;
        let control_flow = vc.connect().await?;
        control_flow.write(encode_proxy_request()).await?;
        let response_bytes = control_flow.read().await?;
        let response = decode_proxy_response(Bytes::from(response_bytes))?;
        let endpoint = Endpoint::new(local_protocol, response.endpoint, local_rid);

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shutdown = Cancellation::new();
        let listener = Arc::new(Self {
            control_flow: control_flow.clone(),
            endpoint,
            accept_rx: AsyncMutex::new(accept_rx),
            shutdown: shutdown.clone(),
        });

        let vif_for_flows = vif.clone();
        tokio::spawn(async move {
            loop {
                match vif_for_flows.accept().await {
                    Ok(Accepted::Flow(flow)) => {
                        if accept_tx.send(flow).is_err() {
                            return;
                        }
                    }
                    Ok(Accepted::NewVc(_)) => continue,
                    Err(_) => return,
                }
            }
        });

        let watched_flow = control_flow.clone();
        let watch_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                if watched_flow.read().await.is_err() {
                    watch_shutdown.cancel();
                    return;
                }
            }
        });

        Ok(listener)
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    pub async fn accept(&self) -> Result<Arc<Flow>> {
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Error::aborted("proxy control flow closed")),
            item = async { self.accept_rx.lock().await.recv().await } => {
                item.ok_or_else(|| Error::aborted("proxy listener closed"))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn close(&self) {
        self.shutdown.cancel();
        self.control_flow.close_write();
    }
}
