//! Identifiers used throughout the transport and dispatch layers (spec §3).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A 128-bit opaque routing identifier (spec §3 "RoutingID").
///
/// Stable over the lifetime of a VIF. Two endpoints with equal routing ids
/// MUST refer to the same logical server; the runtime never compares
/// routing ids for ordering, only equality.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingId([u8; 16]);

impl RoutingId {
    /// The reserved "null" routing id, used to address the VIF itself
    /// during setup before either side's real id is known.
    pub const NULL: RoutingId = RoutingId([0u8; 16]);

    pub fn new_random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        RoutingId(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        RoutingId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 16]
    }
}

impl fmt::Display for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RoutingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingId({})", hex::encode(self.0))
    }
}

impl FromStr for RoutingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let decoded =
            hex::decode(s).map_err(|e| Error::bad_arg("malformed routing id hex").with_source(e))?;
        let bytes: [u8; 16] = decoded
            .try_into()
            .map_err(|_| Error::bad_arg("routing id must be exactly 16 bytes"))?;
        Ok(RoutingId(bytes))
    }
}

/// A Virtual Circuit identifier, unique within one VIF.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VcId(u64);

impl VcId {
    pub const fn new(id: u64) -> Self {
        VcId(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vc:{}", self.0)
    }
}

impl fmt::Debug for VcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A flow identifier, unique within one VC.
///
/// Flow id zero is the "shared counters" pseudo-flow (spec §3). Ids below
/// [`NUM_RESERVED_FLOWS`] carry system traffic (handshake, auth, the
/// type-encoder flow) and are always served ahead of user flows for the
/// same credit (spec §4.4.4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u64);

/// Flow ids below this constant are reserved for system traffic.
pub const NUM_RESERVED_FLOWS: u64 = 8;

/// The shared-counters pseudo-flow (spec §3, §4.4.3 `ReleaseCounters`).
pub const SHARED_FLOW_ID: FlowId = FlowId(0);

/// Reserved system flow slots, allocated during VC handshake (spec §4.4.1).
pub const FLOW_ID_HANDSHAKE: FlowId = FlowId(1);
pub const FLOW_ID_AUTH: FlowId = FlowId(2);
pub const FLOW_ID_TYPE_ENCODER: FlowId = FlowId(3);

impl FlowId {
    pub const fn new(id: u64) -> Self {
        FlowId(id)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    /// Whether this id addresses the shared-counters pseudo-flow.
    pub fn is_shared(self) -> bool {
        self.0 == 0
    }

    /// Whether this id falls in the reserved system-flow range.
    pub fn is_reserved(self) -> bool {
        self.0 < NUM_RESERVED_FLOWS
    }

    /// First user-allocatable id of the given parity (`0` for ids
    /// allocated by the dial side, `1` for the accept side — spec §3:
    /// "flow ids allocated by the dial side are even").
    pub fn first_user_id(parity_bit: u64) -> FlowId {
        debug_assert!(parity_bit == 0 || parity_bit == 1);
        let base = NUM_RESERVED_FLOWS + (NUM_RESERVED_FLOWS % 2 != parity_bit) as u64;
        FlowId(base)
    }

    /// The next id of the same parity.
    pub fn next(self) -> FlowId {
        FlowId(self.0 + 2)
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow:{}", self.0)
    }
}

impl fmt::Debug for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_id_round_trips_through_hex() {
        let id = RoutingId::new_random();
        let parsed: RoutingId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn null_routing_id_is_recognized() {
        assert!(RoutingId::NULL.is_null());
        assert!(!RoutingId::new_random().is_null());
    }

    #[test]
    fn flow_id_parity_never_collides() {
        let dial_first = FlowId::first_user_id(0);
        let accept_first = FlowId::first_user_id(1);
        assert_eq!(dial_first.value() % 2, 0);
        assert_eq!(accept_first.value() % 2, 1);
        assert!(dial_first.next().value() % 2 == 0);
    }

    #[test]
    fn reserved_flows_are_below_threshold() {
        assert!(FLOW_ID_HANDSHAKE.is_reserved());
        assert!(FLOW_ID_AUTH.is_reserved());
        assert!(FLOW_ID_TYPE_ENCODER.is_reserved());
        assert!(!FlowId::first_user_id(0).is_reserved());
    }
}
