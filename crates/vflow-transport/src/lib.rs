//! `vflow-transport`: VIFs, VCs, flows, the stream manager and listeners
//! (spec C3-C6).
//!
//! Layering, bottom to top: [`conn`] is the raw byte connection; [`credit`]
//! is byte-level flow control; [`flow`] is one multiplexed stream; [`vc`]
//! is the authenticated sub-session that owns a set of flows; [`vif`] is
//! the connection-wide multiplexer that owns a set of VCs; [`manager`] and
//! [`listener`] sit above a VIF, handling dial caching and accept loops.

pub mod conn;
pub mod credit;
pub mod flow;
pub mod handshake;
pub mod listener;
pub mod manager;
pub mod vc;
pub mod vif;

pub use conn::{dial_tcp, mem_pair, BoxedConn, RawConn, TcpRawListener};
pub use flow::Flow;
pub use listener::{NetListener, ProxyListener};
pub use manager::{ListenerHandle, StreamManager};
pub use vc::{SecurityMode, Side, VcState, VirtualCircuit};
pub use vif::{Accepted, Vif, DEFAULT_VERSION_RANGE};

pub mod prelude {
    pub use crate::flow::Flow;
    pub use crate::manager::{ListenerHandle, StreamManager};
    pub use crate::vc::{SecurityMode, VcState, VirtualCircuit};
    pub use crate::vif::{Accepted, Vif};
}
