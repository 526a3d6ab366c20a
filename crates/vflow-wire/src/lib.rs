//! `vflow-wire`: frame codec and bounded byte-slice queue (spec C1/C2).
//!
//! This crate owns the two pieces of the transport that sit directly on
//! the byte connection: [`message::Message`] framing (read/write one
//! frame, sealed under a [`cipher::ControlCipher`]) and the [`queue::Queue`]
//! that buffers outgoing flow data between a flow's writer and the VIF's
//! writer-scheduler. It has no notion of VIFs, VCs, or flows beyond the
//! ids it frames — that state lives in `vflow-transport`.

pub mod cipher;
pub mod framing;
pub mod message;
pub mod queue;

pub use cipher::{BoxCrypter, ControlCipher, NullCipher};
pub use framing::{read_from, write_to, SETUP_STREAM_MAX_BYTES};
pub use message::{Message, PublicKeyOffer, VersionRange, FLAG_END_OF_STREAM};
pub use queue::Queue;

pub mod prelude {
    pub use crate::cipher::{ControlCipher, NullCipher};
    pub use crate::message::Message;
    pub use crate::queue::Queue;
    pub use crate::{read_from, write_to};
}
