//! The child side of the exec handshake (spec §4.10).
//!
//! A process spawned by [`crate::parent::ParentHandshake::spawn`] calls
//! [`ChildHandshake::from_parent`] to open the two pipes the parent
//! installed at fixed descriptor numbers, reads the config/secret pair,
//! and — once it has done whatever setup those values enable — reports
//! `ready` or `failed` exactly once.

use vflow_core::error::{Error, Result};

use crate::framing::read_framed;
use crate::pipe;
use crate::status;

/// One handshake blob pair: the opaque config and the shared secret
/// (spec §4.10). The key-value codec for the config is external to this
/// crate (spec §1); callers decode `config` with whatever codec the
/// parent used to produce it.
pub struct Handshake {
    pub config: Vec<u8>,
    pub secret: Vec<u8>,
}

pub struct ChildHandshake {
    data_rx: pipe::Receiver,
    status_tx: pipe::Sender,
}

impl ChildHandshake {
    /// Opens the data and status pipes at the fixed descriptor numbers
    /// the parent `dup2`'d into this process before `exec`. Must only
    /// be called in a process actually spawned by
    /// [`crate::parent::ParentHandshake::spawn`] — elsewhere those
    /// descriptors are not open pipes and this fails.
    pub fn from_parent() -> Result<Self> {
        let data_rx = pipe::open_child_data().map_err(Error::from)?;
        let status_tx = pipe::open_child_status().map_err(Error::from)?;
        Ok(Self { data_rx, status_tx })
    }

    /// Reads the length-prefixed config, then the length-prefixed
    /// secret, in that order (spec §4.10).
    pub async fn read_handshake(&mut self) -> Result<Handshake> {
        let config = read_framed(&mut self.data_rx).await?;
        let secret = read_framed(&mut self.data_rx).await?;
        Ok(Handshake { config, secret })
    }

    /// Reports success. Consumes `self`: the spec expects exactly one
    /// status line ever, and the child is "expected to write its status
    /// and then become fully ready before reading/acting on further
    /// input" (spec §4.10) — there is nothing left to do with the
    /// status pipe afterward.
    pub async fn report_ready(mut self) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let line = status::encode_ready(std::process::id());
        self.status_tx.write_all(&line).await.map_err(Error::from)
    }

    pub async fn report_failed(mut self, reason: impl Into<String>) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let line = status::encode_failed(&reason.into());
        self.status_tx.write_all(&line).await.map_err(Error::from)
    }
}
