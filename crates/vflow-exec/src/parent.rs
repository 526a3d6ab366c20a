//! The parent side of the exec handshake (spec §4.10, §5 "`WaitForReady`
//! ... used by the parent").
//!
//! [`spawn_with_handshake`] starts the child with two extra pipes
//! already open at fixed descriptor numbers, writes the framed
//! config/secret pair, and returns a handle whose [`ParentHandshake::wait_for_ready`]
//! blocks (with timeout) for the child's status line.

use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Child;
use vflow_core::error::{Error, Result};

use crate::framing::write_framed;
use crate::pipe::{self, Sender, DATA_FD, STATUS_FD};
use crate::status::{self, ChildStatus};

/// A spawned child together with the parent-side ends of its two
/// handshake pipes.
///
/// Holds the [`Child`] itself so callers can still `wait()`/`kill()` it
/// through the ordinary Tokio API; this type only adds the handshake
/// exchange on top.
pub struct ParentHandshake {
    child: Child,
    status_rx: pipe::Receiver,
    /// The parent's own extra write handle on the status pipe, used
    /// only to force-unblock a stalled read (spec §9(b) `eofChar`).
    status_unblock_tx: Sender,
}

impl ParentHandshake {
    /// Spawns `program` with two pipes installed at fixed descriptor
    /// numbers before `exec` (spec §4.10 "two extra pipes... passed to
    /// the child as extra file descriptors"), then writes the
    /// length-prefixed `config` and `secret` blobs and closes the data
    /// pipe's write end so the child observes EOF after the second
    /// blob.
    pub async fn spawn(program: &str, args: &[String], config: &[u8], secret: &[u8]) -> Result<Self> {
        let (data_read, data_write) = pipe::pipe_pair().map_err(Error::from)?;
        let (status_read, status_write) = pipe::pipe_pair().map_err(Error::from)?;
        // The parent keeps a private dup of the status pipe's write end
        // so it can nudge its own blocked reader later; the original
        // `status_write` fd is the one handed to the child.
        let status_unblock_fd = pipe::dup(status_write.as_raw_fd()).map_err(Error::from)?;

        let data_read_fd = data_read.as_raw_fd();
        let status_write_fd = status_write.as_raw_fd();

        let mut std_cmd = std::process::Command::new(program);
        std_cmd
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        // SAFETY: the closure only calls async-signal-safe libc
        // functions (`dup2`) between fork and exec, and touches no
        // state shared with the parent beyond the two descriptors it
        // is explicitly handed.
        unsafe {
            std_cmd.pre_exec(move || {
                pipe::dup2_fixed(data_read_fd, DATA_FD)?;
                pipe::dup2_fixed(status_write_fd, STATUS_FD)?;
                Ok(())
            });
        }

        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.kill_on_drop(true);
        let child = cmd.spawn().map_err(Error::from)?;

        // The parent no longer needs its copies of the ends it handed
        // to the child; dropping them ensures the child's dup2'd
        // descriptors are the only ones referencing those pipe ends
        // from this process, so closing the parent's write end later
        // is observable by the child as EOF.
        drop(data_read);
        drop(status_write);

        let mut data_tx = pipe::sender_from_owned(data_write).map_err(Error::from)?;
        let status_rx = pipe::receiver_from_owned(status_read).map_err(Error::from)?;
        let status_unblock_tx = pipe::sender_from_owned(status_unblock_fd).map_err(Error::from)?;

        write_framed(&mut data_tx, config).await?;
        write_framed(&mut data_tx, secret).await?;
        drop(data_tx); // closes the data pipe; the child sees EOF.

        Ok(Self {
            child,
            status_rx,
            status_unblock_tx,
        })
    }

    /// Blocks for the child's `ready<pid>`/`failed<reason>` status line,
    /// subject to `timeout` (spec §4.10, §5 suspension points). On
    /// timeout, writes the `eofChar` sentinel into the parent's own
    /// status-pipe write handle before returning `Timeout` — mirroring
    /// the spec's described unblock mechanism even though a Tokio
    /// `timeout` future is already safe to drop on its own.
    pub async fn wait_for_ready(&mut self, timeout: Duration) -> Result<ChildStatus> {
        match tokio::time::timeout(timeout, read_status_line(&mut self.status_rx)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                let _ = self.status_unblock_tx.write_all(&[status::EOF_CHAR]).await;
                Err(Error::timeout(
                    "child did not report a ready/failed status before the handshake timeout",
                ))
            }
        }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

async fn read_status_line(rx: &mut pipe::Receiver) -> Result<ChildStatus> {
    use tokio::io::AsyncReadExt;

    let mut line = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = rx.read(&mut chunk).await.map_err(Error::from)?;
        if n == 0 {
            return Err(Error::aborted(
                "status pipe closed before a ready/failed status arrived",
            ));
        }
        for &byte in &chunk[..n] {
            if byte == status::EOF_CHAR {
                return Err(Error::timeout("status read force-unblocked"));
            }
            if byte == b'\n' {
                let text = String::from_utf8(std::mem::take(&mut line))
                    .map_err(|e| Error::bad_protocol("status line is not utf-8").with_source(e))?;
                return status::decode_status_line(&text);
            }
            line.push(byte);
        }
    }
}
