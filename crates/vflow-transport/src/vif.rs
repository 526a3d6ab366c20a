//! One multiplexed byte connection, hosting many [`VirtualCircuit`]s
//! (spec §4.3, C3).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use vflow_core::error::{Error, Result};
use vflow_core::ids::{FlowId, RoutingId, VcId};
use vflow_core::prelude::{Blessings, Cancellation, ServerAuthorizer};
use vflow_wire::cipher::{BoxCrypter, ControlCipher, NullCipher};
use vflow_wire::message::{Message, PublicKeyOffer, VersionRange, FLAG_END_OF_STREAM};
use vflow_wire::queue::Queue;
use vflow_wire::{read_from, write_to};

use crate::conn::BoxedConn;
use crate::flow::Flow;
use crate::vc::{SecurityMode, Side, VifSink, VirtualCircuit};

/// The protocol version range this build offers during Setup (spec
/// §4.3 "negotiates the protocol version"). A single fixed value today;
/// kept as a range because the wire format already carries one.
pub const DEFAULT_VERSION_RANGE: VersionRange = VersionRange { min: 5, max: 5 };

/// What `Vif::accept` hands the listener: either a flow on an
/// already-known VC, or a VC that just finished authenticating (spec
/// §4.3 "returning either a new flow... or a newly established VC...
/// for the listener to install").
pub enum Accepted {
    Flow(Arc<Flow>),
    NewVc(Arc<VirtualCircuit>),
}

/// A thin `Weak`-backed handle VCs use to reach their owning VIF,
/// breaking what would otherwise be a `Vif -> VC -> Vif` reference
/// cycle (the VIF owns its VCs directly; VCs only need to push frames
/// back, never to keep the VIF alive).
struct VifHandle(Weak<Vif>);

#[async_trait::async_trait]
impl VifSink for VifHandle {
    async fn send_control(&self, msg: Message) -> Result<()> {
        let vif = self.0.upgrade().ok_or_else(|| Error::aborted("VIF has been dropped"))?;
        vif.system_tx
            .send(msg)
            .map_err(|_| Error::aborted("VIF writer has shut down"))
    }

    fn register_flow_writer(&self, vc_id: VcId, flow_id: FlowId, queue: Arc<Queue>) {
        if let Some(vif) = self.0.upgrade() {
            vif.spawn_flow_forwarder(vc_id, flow_id, queue);
        }
    }
}

pub struct Vif {
    local_rid: RoutingId,
    security_mode: SecurityMode,
    local_blessings: Blessings,
    cipher: Arc<dyn ControlCipher>,
    frame_max: u32,
    initial_flow_credit: u32,
    vcs: DashMap<VcId, Arc<VirtualCircuit>>,
    next_vc_id: AtomicU64,
    system_tx: mpsc::UnboundedSender<Message>,
    user_tx: mpsc::UnboundedSender<Message>,
    accept_tx: mpsc::UnboundedSender<Accepted>,
    accept_rx: AsyncMutex<mpsc::UnboundedReceiver<Accepted>>,
    shutdown: Cancellation,
}

impl Vif {
    async fn setup_exchange(
        conn: &mut BoxedConn,
        version_range: VersionRange,
        security_mode: SecurityMode,
        frame_max: u32,
    ) -> Result<Arc<dyn ControlCipher>> {
        use rand::RngCore;
        let mut local_nonce = [0u8; 32];
        rand::rng().fill_bytes(&mut local_nonce);
        let hello = Message::Setup {
            versions: version_range,
            public_key: PublicKeyOffer(Bytes::copy_from_slice(&local_nonce)),
            auth_enabled: security_mode == SecurityMode::Authenticated,
        };
        write_to(conn, &hello, &NullCipher, frame_max).await?;
        let peer = read_from(conn, &NullCipher, frame_max).await?;
        let Message::Setup { public_key: peer_key, .. } = peer else {
            return Err(Error::bad_protocol("expected Setup frame"));
        };

        if security_mode == SecurityMode::None {
            return Ok(Arc::new(NullCipher));
        }

        let mut a = local_nonce.to_vec();
        let mut b = peer_key.0.to_vec();
        if a > b {
            std::mem::swap(&mut a, &mut b);
        }
        let mut hasher = Sha256::new();
        hasher.update(&a);
        hasher.update(&b);
        let key: [u8; 32] = hasher.finalize().into();
        Ok(Arc::new(BoxCrypter::new(key)))
    }

    async fn start(
        mut conn: BoxedConn,
        local_rid: RoutingId,
        local_blessings: Blessings,
        version_range: VersionRange,
        security_mode: SecurityMode,
        frame_max: u32,
        initial_flow_credit: u32,
    ) -> Result<Arc<Self>> {
        let cipher = Self::setup_exchange(&mut conn, version_range, security_mode, frame_max).await?;
        let (reader, writer) = tokio::io::split(conn);
        let (system_tx, system_rx) = mpsc::unbounded_channel();
        let (user_tx, user_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();

        let vif = Arc::new(Self {
            local_rid,
            security_mode,
            local_blessings,
            cipher: cipher.clone(),
            frame_max,
            initial_flow_credit,
            vcs: DashMap::new(),
            next_vc_id: AtomicU64::new(1),
            system_tx,
            user_tx,
            accept_tx,
            accept_rx: AsyncMutex::new(accept_rx),
            shutdown: Cancellation::new(),
        });

        tokio::spawn(writer_loop(writer, cipher, frame_max, system_rx, user_rx));
        tokio::spawn(read_loop(vif.clone(), reader));

        Ok(vif)
    }

    /// Creation from the dialing side (spec §4.3 `NewDialedVIF`).
    pub async fn new_dialed(
        conn: BoxedConn,
        local_rid: RoutingId,
        local_blessings: Blessings,
        version_range: VersionRange,
        security_mode: SecurityMode,
        frame_max: u32,
        initial_flow_credit: u32,
    ) -> Result<Arc<Self>> {
        Self::start(
            conn,
            local_rid,
            local_blessings,
            version_range,
            security_mode,
            frame_max,
            initial_flow_credit,
        )
        .await
    }

    /// Creation from the accepting side (spec §4.3 `NewAcceptedVIF`).
    pub async fn new_accepted(
        conn: BoxedConn,
        local_rid: RoutingId,
        local_blessings: Blessings,
        version_range: VersionRange,
        security_mode: SecurityMode,
        frame_max: u32,
        initial_flow_credit: u32,
    ) -> Result<Arc<Self>> {
        Self::start(
            conn,
            local_rid,
            local_blessings,
            version_range,
            security_mode,
            frame_max,
            initial_flow_credit,
        )
        .await
    }

    fn handle(self: &Arc<Self>) -> Arc<dyn VifSink> {
        Arc::new(VifHandle(Arc::downgrade(self)))
    }

    fn spawn_flow_forwarder(self: &Arc<Self>, vc_id: VcId, flow_id: FlowId, queue: Arc<Queue>) {
        let tx = if flow_id.is_reserved() {
            self.system_tx.clone()
        } else {
            self.user_tx.clone()
        };
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                match queue.get(&cancel).await {
                    Ok(bytes) => {
                        let msg = Message::Data {
                            vc_id,
                            flow_id,
                            flags: 0,
                            payload: Bytes::from(bytes),
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = tx.send(Message::data_end_of_stream(vc_id, flow_id));
                        break;
                    }
                }
            }
        });
    }

    /// Dials a new VC over this connection (spec §4.3 "Dial side").
    pub async fn dial(
        self: &Arc<Self>,
        authorizer: &dyn ServerAuthorizer,
    ) -> Result<Arc<VirtualCircuit>> {
        let vc_id = VcId::new(self.next_vc_id.fetch_add(1, Ordering::SeqCst));
        let vc = VirtualCircuit::new(
            vc_id,
            Side::Dial,
            self.local_rid,
            self.security_mode,
            self.initial_flow_credit,
            self.handle(),
        );
        self.vcs.insert(vc_id, vc.clone());
        if let Err(e) = vc.handshake_dialed(&self.local_blessings, authorizer).await {
            vc.close(e.to_string());
            self.vcs.remove(&vc_id);
            return Err(e);
        }
        Ok(vc)
    }

    /// Blocks on the accept queue (spec §4.3 "Accept side").
    pub async fn accept(&self) -> Result<Accepted> {
        self.accept_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::aborted("VIF accept queue closed"))
    }

    /// Closes every VC whose remote routing id matches (spec §4.3
    /// `ShutdownVCs`), returning the count closed.
    pub fn shutdown_vcs(&self, remote_routing_id: RoutingId) -> usize {
        let matching: Vec<VcId> = self
            .vcs
            .iter()
            .filter(|e| e.value().remote_routing_id() == Some(remote_routing_id))
            .map(|e| *e.key())
            .collect();
        for id in &matching {
            if let Some((_, vc)) = self.vcs.remove(id) {
                vc.close("ShutdownVCs: peer endpoint matched");
            }
        }
        matching.len()
    }

    fn close_all_vcs(&self, reason: &str) {
        for entry in self.vcs.iter() {
            entry.value().close(reason);
        }
        self.vcs.clear();
    }

    pub fn local_routing_id(&self) -> RoutingId {
        self.local_rid
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn writer_loop(
    mut writer: WriteHalf<BoxedConn>,
    cipher: Arc<dyn ControlCipher>,
    frame_max: u32,
    mut system_rx: mpsc::UnboundedReceiver<Message>,
    mut user_rx: mpsc::UnboundedReceiver<Message>,
) {
    loop {
        // Reserved system flows (handshake, auth, health checks, and
        // control frames) always drain ahead of user data (spec §4.4.4).
        while let Ok(msg) = system_rx.try_recv() {
            if write_to(&mut writer, &msg, cipher.as_ref(), frame_max).await.is_err() {
                return;
            }
        }
        tokio::select! {
            biased;
            Some(msg) = system_rx.recv() => {
                if write_to(&mut writer, &msg, cipher.as_ref(), frame_max).await.is_err() {
                    return;
                }
            }
            Some(msg) = user_rx.recv() => {
                if write_to(&mut writer, &msg, cipher.as_ref(), frame_max).await.is_err() {
                    return;
                }
            }
            else => return,
        }
    }
}

async fn read_loop(vif: Arc<Vif>, mut reader: ReadHalf<BoxedConn>) {
    loop {
        let msg = match read_from(&mut reader, vif.cipher.as_ref(), vif.frame_max).await {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "VIF read loop failed, closing all VCs");
                vif.close_all_vcs("network error");
                vif.shutdown.cancel();
                return;
            }
        };

        match msg {
            Message::Data {
                vc_id,
                flow_id,
                flags,
                payload,
            } => {
                let eof = flags & FLAG_END_OF_STREAM != 0;
                let vc = vif.vcs.get(&vc_id).map(|e| e.value().clone()).or_else(|| {
                    if flow_id == vflow_core::ids::FLOW_ID_HANDSHAKE {
                        Some(spawn_accepted_vc(&vif, vc_id))
                    } else {
                        None
                    }
                });
                match vc {
                    Some(vc) => vc.dispatch_payload(flow_id, payload, eof),
                    None => tracing::debug!(vc = %vc_id, "dropping payload for unknown VC"),
                }
            }
            Message::OpenFlow {
                vc_id,
                flow_id,
                initial_credit: _,
            } => {
                if let Some(vc) = vif.vcs.get(&vc_id).map(|e| e.value().clone()) {
                    let flow = vc.accept_flow(flow_id);
                    let _ = vif.accept_tx.send(Accepted::Flow(flow));
                } else {
                    tracing::debug!(vc = %vc_id, "OpenFlow for unknown VC");
                }
            }
            Message::AddReceiveBuffers {
                vc_id,
                flow_id,
                delta,
            } => {
                if let Some(vc) = vif.vcs.get(&vc_id) {
                    vc.release_counters(flow_id, delta);
                }
            }
            Message::Close {
                vc_id,
                flow_id: None,
            } => {
                if let Some((_, vc)) = vif.vcs.remove(&vc_id) {
                    vc.close("peer closed VC");
                }
            }
            Message::Close {
                vc_id,
                flow_id: Some(flow_id),
            } => {
                if let Some(vc) = vif.vcs.get(&vc_id) {
                    vc.dispatch_payload(flow_id, Bytes::new(), true);
                }
            }
            Message::HealthCheckRequest { vc_id } => {
                let _ = vif.system_tx.send(Message::HealthCheckResponse { vc_id });
            }
            Message::HealthCheckResponse { .. } => {}
            Message::Setup { .. } | Message::SetupStream { .. } => {
                tracing::warn!("unexpected setup frame after handshake; dropping");
            }
        }
    }
}

/// The accept side learns of a new VC the instant the peer's first
/// handshake frame for an unfamiliar VC id arrives (spec §4.4.2).
fn spawn_accepted_vc(vif: &Arc<Vif>, vc_id: VcId) -> Arc<VirtualCircuit> {
    let vc = VirtualCircuit::new(
        vc_id,
        Side::Accept,
        vif.local_rid,
        vif.security_mode,
        vif.initial_flow_credit,
        vif.handle(),
    );
    vif.vcs.insert(vc_id, vc.clone());
    let vif = vif.clone();
    let vc_task = vc.clone();
    tokio::spawn(async move {
        match vc_task.handshake_accepted(&vif.local_blessings).await {
            Ok(()) => {
                let _ = vif.accept_tx.send(Accepted::NewVc(vc_task));
            }
            Err(e) => {
                tracing::warn!(error = %e, vc = %vc_id, "accepted VC handshake failed");
                vc_task.close(e.to_string());
                vif.vcs.remove(&vc_id);
            }
        }
    });
    vc
}
