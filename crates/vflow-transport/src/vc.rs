//! The authenticated, flow-multiplexing sub-session (spec §4.4, C4).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use vflow_core::error::{Error, Result};
use vflow_core::ids::{FlowId, VcId, RoutingId, FLOW_ID_AUTH, FLOW_ID_HANDSHAKE, FLOW_ID_TYPE_ENCODER};
use vflow_core::prelude::{Blessings, ServerAuthorizer};
use vflow_wire::message::Message;
use vflow_wire::queue::Queue;

use crate::credit::{FlowCredit, SharedCredit};
use crate::flow::Flow;
use crate::handshake::{AuthMessage, HandshakeHello};

/// Which side of the handshake this VC is running.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Dial,
    Accept,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VcState {
    Handshaking,
    Authenticated,
    Closed,
}

/// Security mode negotiated for this VC (spec §4.4.1 step 2).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    None,
    Authenticated,
}

/// Callbacks a [`VirtualCircuit`] needs from its owning VIF: a way to
/// push control frames onto the connection, and a way to register a
/// newly created flow's outbound queue with the writer scheduler (spec
/// §4.3 duty 2 "a fair round-robin scheduler drains them").
#[async_trait::async_trait]
pub trait VifSink: Send + Sync + 'static {
    async fn send_control(&self, msg: Message) -> Result<()>;
    fn register_flow_writer(&self, vc_id: VcId, flow_id: FlowId, queue: Arc<Queue>);
}

struct FlowEntry {
    flow: Arc<Flow>,
}

/// One VC: a routing id, an authentication state, and the set of flows
/// multiplexed over it.
pub struct VirtualCircuit {
    vc_id: VcId,
    side: Side,
    local_routing_id: RoutingId,
    mode: SecurityMode,
    remote_routing_id: RwLock<Option<RoutingId>>,
    state: RwLock<VcState>,
    remote_blessings: RwLock<Blessings>,
    flows: DashMap<FlowId, FlowEntry>,
    next_user_flow: AtomicU64,
    shared_credit: SharedCredit,
    initial_flow_credit: u32,
    sink: Arc<dyn VifSink>,
    close_reason: RwLock<Option<String>>,
}

impl VirtualCircuit {
    /// Constructs a VC and eagerly allocates its reserved flows (spec
    /// §4.4.1 step 1 "allocate reserved flow ids for handshake, auth,
    /// and type exchange"). Doing this synchronously, before the VC is
    /// published into the VIF's routing table, means a handshake frame
    /// that arrives the instant the peer learns of this VC id can never
    /// race a lazy flow creation and be dropped as "unknown flow".
    pub fn new(
        vc_id: VcId,
        side: Side,
        local_routing_id: RoutingId,
        mode: SecurityMode,
        initial_flow_credit: u32,
        sink: Arc<dyn VifSink>,
    ) -> Arc<Self> {
        let parity = match side {
            Side::Dial => 0,
            Side::Accept => 1,
        };
        let vc = Arc::new(Self {
            vc_id,
            side,
            local_routing_id,
            mode,
            remote_routing_id: RwLock::new(None),
            state: RwLock::new(VcState::Handshaking),
            remote_blessings: RwLock::new(Blessings::default()),
            flows: DashMap::new(),
            next_user_flow: AtomicU64::new(FlowId::first_user_id(parity).value()),
            shared_credit: SharedCredit::new(initial_flow_credit),
            initial_flow_credit,
            sink,
            close_reason: RwLock::new(None),
        });
        vc.new_flow(FLOW_ID_HANDSHAKE);
        if mode == SecurityMode::Authenticated {
            vc.new_flow(FLOW_ID_AUTH);
            vc.new_flow(FLOW_ID_TYPE_ENCODER);
        }
        vc
    }

    pub fn vc_id(&self) -> VcId {
        self.vc_id
    }

    pub fn state(&self) -> VcState {
        *self.state.read()
    }

    pub fn remote_routing_id(&self) -> Option<RoutingId> {
        *self.remote_routing_id.read()
    }

    /// Zero value once the VC has been closed (spec §4.4.5 "thereafter
    /// return zero values").
    pub fn remote_blessings(&self) -> Blessings {
        if self.state() == VcState::Closed {
            return Blessings::default();
        }
        self.remote_blessings.read().clone()
    }

    fn new_flow(self: &Arc<Self>, flow_id: FlowId) -> Arc<Flow> {
        let outbound = Arc::new(Queue::default());
        let inbound = Arc::new(Queue::default());
        let credit = FlowCredit::new(self.initial_flow_credit, self.shared_credit.clone());
        let peer_blessings = self.remote_blessings.read().clone();
        let flow = Arc::new(Flow::new(
            self.vc_id,
            flow_id,
            credit,
            outbound.clone(),
            inbound,
            peer_blessings,
            self.sink.clone(),
        ));
        self.sink.register_flow_writer(self.vc_id, flow_id, outbound);
        self.flows.insert(flow_id, FlowEntry { flow: flow.clone() });
        flow
    }

    fn flow(&self, flow_id: FlowId) -> Arc<Flow> {
        self.flows
            .get(&flow_id)
            .expect("reserved flow allocated at construction")
            .flow
            .clone()
    }

    /// Runs the dialed side of the handshake (spec §4.4.1).
    pub async fn handshake_dialed(
        self: &Arc<Self>,
        local_blessings: &Blessings,
        authorizer: &dyn ServerAuthorizer,
    ) -> Result<()> {
        debug_assert!(self.side == Side::Dial);
        let handshake_flow = self.flow(FLOW_ID_HANDSHAKE);
        let hello = HandshakeHello {
            version: 1,
            routing_id: self.local_routing_id,
            public_key: Bytes::new(),
        };
        handshake_flow.write(hello.encode()).await?;
        let peer_bytes = handshake_flow.read().await?;
        let peer_hello = HandshakeHello::decode(Bytes::from(peer_bytes))?;
        *self.remote_routing_id.write() = Some(peer_hello.routing_id);

        if self.mode == SecurityMode::None {
            *self.state.write() = VcState::Authenticated;
            return Ok(());
        }

        let auth_flow = self.flow(FLOW_ID_AUTH);
        let our_auth = AuthMessage {
            signature: Bytes::new(),
            blessing_names: local_blessings.names().map(|s| s.to_string()).collect(),
        };
        auth_flow.write(our_auth.encode()).await?;
        let peer_bytes = auth_flow.read().await?;
        let peer_auth = AuthMessage::decode(Bytes::from(peer_bytes))?;
        let peer_blessings = Blessings::new(peer_auth.blessing_names);

        if !authorizer.authorize(&peer_blessings) {
            self.close("server not trusted");
            return Err(Error::not_trusted("server blessings rejected by ServerAuthorizer"));
        }
        *self.remote_blessings.write() = peer_blessings;

        *self.state.write() = VcState::Authenticated;
        Ok(())
    }

    /// Runs the accepted side of the handshake (spec §4.4.2).
    pub async fn handshake_accepted(self: &Arc<Self>, local_blessings: &Blessings) -> Result<()> {
        debug_assert!(self.side == Side::Accept);
        let handshake_flow = self.flow(FLOW_ID_HANDSHAKE);
        let peer_bytes = handshake_flow.read().await?;
        let peer_hello = HandshakeHello::decode(Bytes::from(peer_bytes))?;
        *self.remote_routing_id.write() = Some(peer_hello.routing_id);
        let hello = HandshakeHello {
            version: 1,
            routing_id: self.local_routing_id,
            public_key: Bytes::new(),
        };
        handshake_flow.write(hello.encode()).await?;

        if self.mode == SecurityMode::None {
            *self.state.write() = VcState::Authenticated;
            return Ok(());
        }

        let auth_flow = self.flow(FLOW_ID_AUTH);
        let peer_bytes = auth_flow.read().await?;
        let peer_auth = AuthMessage::decode(Bytes::from(peer_bytes))?;
        *self.remote_blessings.write() = Blessings::new(peer_auth.blessing_names);

        let our_auth = AuthMessage {
            signature: Bytes::new(),
            blessing_names: local_blessings.names().map(|s| s.to_string()).collect(),
        };
        auth_flow.write(our_auth.encode()).await?;

        *self.state.write() = VcState::Authenticated;
        Ok(())
    }

    /// Opens a new user flow and notifies the peer (spec §4.4.3 `Connect`).
    pub async fn connect(self: &Arc<Self>) -> Result<Arc<Flow>> {
        if self.state() == VcState::Closed {
            return Err(Error::aborted("VC is closed"));
        }
        let flow_id = FlowId::new(self.next_user_flow.fetch_add(2, Ordering::SeqCst));
        let flow = self.new_flow(flow_id);
        self.sink
            .send_control(Message::OpenFlow {
                vc_id: self.vc_id,
                flow_id,
                initial_credit: self.initial_flow_credit,
            })
            .await?;
        Ok(flow)
    }

    /// Accepts a flow the peer opened (spec §4.4.3 `AcceptFlow`).
    pub fn accept_flow(self: &Arc<Self>, flow_id: FlowId) -> Arc<Flow> {
        self.new_flow(flow_id)
    }

    /// Delivers payload bytes read off the wire to the named flow (spec
    /// §4.4.3 `DispatchPayload`).
    pub fn dispatch_payload(&self, flow_id: FlowId, payload: Bytes, end_of_stream: bool) {
        let Some(entry) = self.flows.get(&flow_id) else {
            tracing::debug!(vc = %self.vc_id, flow = %flow_id, "dropping payload for unknown flow");
            return;
        };
        if !payload.is_empty() {
            if entry.flow.inbound_queue().put(payload.to_vec()).is_err() {
                tracing::debug!(vc = %self.vc_id, flow = %flow_id, "payload dropped: flow reader closed");
            }
        }
        if end_of_stream {
            entry.flow.inbound_queue().close();
        }
    }

    /// Grants send credit (spec §4.4.3 `ReleaseCounters`, §4.4.4 "each
    /// `AddReceiveBuffers` frame credits both pools"). A frame addressed
    /// to the shared pseudo-flow credits only the shared pool; one
    /// addressed to a real flow credits that flow's own pool *and* the
    /// shared pool, matching how `FlowCredit::debit` draws down both on
    /// send.
    pub fn release_counters(&self, flow_id: FlowId, bytes: u32) {
        if flow_id.is_shared() {
            self.shared_credit.add(bytes);
            return;
        }
        if let Some(entry) = self.flows.get(&flow_id) {
            entry.flow.add_write_credit(bytes);
            self.shared_credit.add(bytes);
        }
    }

    /// Tears the VC down (spec §4.4.5 `Close`). Idempotent.
    pub fn close(&self, reason: impl Into<String>) {
        let mut state = self.state.write();
        if *state == VcState::Closed {
            return;
        }
        *state = VcState::Closed;
        drop(state);
        *self.close_reason.write() = Some(reason.into());
        for entry in self.flows.iter() {
            entry.flow.cancel_read();
            entry.flow.inbound_queue().shutdown();
            entry.flow.outbound_queue().shutdown();
        }
        self.flows.clear();
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.read().clone()
    }
}
