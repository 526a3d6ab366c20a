//! `vflow-exec`: the parent/child exec handshake (spec §4.10, C10).
//!
//! A parent process shares a secret with a freshly spawned child and
//! learns whether the child became ready, over two dedicated pipes
//! rather than stdio — so the child's own stdout/stderr stay free for
//! ordinary logging. This crate has no transport dependency on the rest
//! of the workspace; it is used by the `vflow-server`/`vflow-transport`
//! process-manager layer one level up, never by the VIF/VC/server
//! themselves.

#[cfg(unix)]
mod child;
#[cfg(unix)]
mod framing;
#[cfg(unix)]
mod parent;
#[cfg(unix)]
mod pipe;
#[cfg(unix)]
mod status;

#[cfg(unix)]
pub use child::{ChildHandshake, Handshake};
#[cfg(unix)]
pub use parent::ParentHandshake;
#[cfg(unix)]
pub use status::{ChildStatus, EOF_CHAR};
