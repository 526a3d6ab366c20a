//! A single bidirectional, flow-controlled byte stream inside a VC
//! (spec §4.4.3 "Flow lifecycle").

use std::sync::Arc;

use vflow_core::error::Result;
use vflow_core::ids::{FlowId, VcId};
use vflow_core::prelude::Blessings;
use vflow_core::Cancellation;
use vflow_wire::message::Message;
use vflow_wire::queue::Queue;

use crate::credit::FlowCredit;
use crate::vc::VifSink;

/// One flow's read and write halves.
///
/// `Connect` on the VC side and `AcceptFlow` on the listener side both
/// produce one of these; from the caller's point of view the two are
/// indistinguishable once constructed.
pub struct Flow {
    vc_id: VcId,
    flow_id: FlowId,
    write_credit: FlowCredit,
    outbound: Arc<Queue>,
    inbound: Arc<Queue>,
    read_cancel: Cancellation,
    peer_blessings: Blessings,
    credit_sink: Arc<dyn VifSink>,
}

impl Flow {
    pub(crate) fn new(
        vc_id: VcId,
        flow_id: FlowId,
        write_credit: FlowCredit,
        outbound: Arc<Queue>,
        inbound: Arc<Queue>,
        peer_blessings: Blessings,
        credit_sink: Arc<dyn VifSink>,
    ) -> Self {
        Self {
            vc_id,
            flow_id,
            write_credit,
            outbound,
            inbound,
            read_cancel: Cancellation::new(),
            peer_blessings,
            credit_sink,
        }
    }

    pub fn vc_id(&self) -> VcId {
        self.vc_id
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    /// The blessings the owning VC's remote end presented during
    /// authentication, snapshotted at flow-construction time. Stands in
    /// for the wire "presented blessings by reference to a cache" of
    /// spec §3 (request header) — since this VC has already
    /// authenticated by the time a user flow exists, the server can
    /// read the presented identity straight off the flow instead of
    /// resolving a cache reference round-trip (spec §4.7.5 step 3).
    pub fn peer_blessings(&self) -> &Blessings {
        &self.peer_blessings
    }

    /// The queue the VIF's writer-scheduler drains to build `Data`
    /// frames; exposed so `vif` can wire it into the per-VC scheduler.
    pub(crate) fn outbound_queue(&self) -> &Arc<Queue> {
        &self.outbound
    }

    /// The queue `VirtualCircuit::dispatch_payload` feeds; exposed so
    /// `vc` can push received bytes without going through `Flow`'s own
    /// credit accounting (inbound bytes are the peer's send credit, not
    /// ours).
    pub(crate) fn inbound_queue(&self) -> &Arc<Queue> {
        &self.inbound
    }

    /// Debits write credit, then enqueues `payload` for the writer
    /// scheduler. Blocks until enough credit exists (spec §4.4.4).
    pub async fn write(&self, payload: Vec<u8>) -> Result<()> {
        self.write_credit.debit(payload.len() as u32).await?;
        self.outbound.put(payload)
    }

    /// Closes the write half: no more writes will be accepted, and
    /// pending ones drain normally (spec §4.2 `Close`).
    pub fn close_write(&self) {
        self.outbound.close();
    }

    /// Reads the next chunk written by the peer, or errors once the
    /// peer has signalled end-of-stream and all buffered data is
    /// consumed. Replenishes the peer's send credit for the bytes
    /// consumed (spec §4.4.4 "each `AddReceiveBuffers` frame credits
    /// both pools") — without this the peer's `FlowCredit::debit` would
    /// never see its permits restored and would block forever once the
    /// initial grant ran out.
    pub async fn read(&self) -> Result<Vec<u8>> {
        let bytes = self.inbound.get(&self.read_cancel).await?;
        if !bytes.is_empty() {
            let msg = Message::AddReceiveBuffers {
                vc_id: self.vc_id,
                flow_id: self.flow_id,
                delta: bytes.len() as u32,
            };
            if let Err(e) = self.credit_sink.send_control(msg).await {
                tracing::debug!(
                    error = %e,
                    vc = %self.vc_id,
                    flow = %self.flow_id,
                    "failed to send AddReceiveBuffers credit",
                );
            }
        }
        Ok(bytes)
    }

    /// Unblocks any in-flight `read` (used when the owning VC tears the
    /// flow down unilaterally, e.g. on `Close`).
    pub fn cancel_read(&self) {
        self.read_cancel.cancel();
    }

    /// Grants more send credit to this flow alone (spec §4.4.3
    /// `ReleaseCounters` for a non-zero flow id).
    pub(crate) fn add_write_credit(&self, bytes: u32) {
        self.write_credit.add(bytes);
    }
}
