//! The closed set of frame variants exchanged over a VIF's byte
//! connection (spec §4.1, §6 "Message framing on the wire").

use bytes::Bytes;
use vflow_core::ids::{FlowId, VcId};

/// Set on a [`Message::Data`] frame when the sender has no more bytes to
/// write on that flow (spec §3 "closing write sends an EOF marker").
pub const FLAG_END_OF_STREAM: u8 = 0x1;

/// One version of the setup protocol, expressed as an inclusive range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VersionRange {
    pub min: u32,
    pub max: u32,
}

/// A public-key offer made during the pre-cipher setup exchange. Opaque
/// to the framing layer: the handshake crypto library (spec §1, out of
/// scope) interprets the bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyOffer(pub Bytes);

/// The closed set of messages a VIF may read or write (spec §4.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Pre-cipher setup frame: version range plus a public-key offer and
    /// whether authentication is in force.
    Setup {
        versions: VersionRange,
        public_key: PublicKeyOffer,
        auth_enabled: bool,
    },
    /// Opaque bytes pipelining the inner (TLS-like) handshake, bounded to
    /// 8 KiB per spec §6.
    SetupStream { bytes: Bytes },
    /// A payload chunk for one flow.
    Data {
        vc_id: VcId,
        flow_id: FlowId,
        flags: u8,
        payload: Bytes,
    },
    /// Opens a new flow with an initial credit grant.
    OpenFlow {
        vc_id: VcId,
        flow_id: FlowId,
        initial_credit: u32,
    },
    /// Refills send credit for a (VC, flow) pair.
    AddReceiveBuffers {
        vc_id: VcId,
        flow_id: FlowId,
        delta: u32,
    },
    /// Tears down one flow, or (if `flow_id` is absent) the whole VC.
    Close {
        vc_id: VcId,
        flow_id: Option<FlowId>,
    },
    HealthCheckRequest { vc_id: VcId },
    HealthCheckResponse { vc_id: VcId },
}

impl Message {
    pub fn data_end_of_stream(vc_id: VcId, flow_id: FlowId) -> Self {
        Message::Data {
            vc_id,
            flow_id,
            flags: FLAG_END_OF_STREAM,
            payload: Bytes::new(),
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Message::Data { .. })
    }
}
