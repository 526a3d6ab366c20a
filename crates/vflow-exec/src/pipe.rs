//! Raw anonymous-pipe plumbing underneath the exec handshake.
//!
//! Unix-only: dup2-ing a descriptor onto a fixed number in a
//! post-fork, pre-exec child is inherently platform-specific, and the
//! reference stack's own exec handshake makes the same assumption.

use std::fs::File;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use tokio::net::unix::pipe;

pub(crate) type Receiver = pipe::Receiver;
pub(crate) type Sender = pipe::Sender;

/// The child's end of the data pipe (parent writes config + secret here)
/// and the child's end of the status pipe (child writes ready/failed
/// here) live at these fixed descriptor numbers post-exec. Chosen past
/// the conventional 0/1/2 stdio slots, matching the way the reference
/// exec package appends its handshake descriptors after `ExtraFiles`.
pub(crate) const DATA_FD: RawFd = 3;
pub(crate) const STATUS_FD: RawFd = 4;

/// Creates one anonymous pipe, returning `(read_end, write_end)`.
///
/// Both ends carry `O_CLOEXEC` so a concurrently-forked, unrelated child
/// never inherits them by accident; the handshake's own child receives
/// its ends explicitly via `dup2` in `pre_exec`, which always produces a
/// fresh descriptor without the close-on-exec flag.
pub(crate) fn pipe_pair() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as RawFd; 2];
    // SAFETY: `fds` is a valid, appropriately-sized buffer for pipe2 to
    // fill with two freshly allocated descriptors.
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 returned success, so both slots hold descriptors
    // this process uniquely owns.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Duplicates `fd`, returning a second descriptor pointing at the same
/// underlying pipe. Used to give the parent its own write handle on the
/// status pipe it otherwise only reads, so a stalled read can be forced
/// to return (spec §4.10, §9(b) `eofChar`).
pub(crate) fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    // SAFETY: `fd` is a descriptor this process owns at the time of the
    // call (verified by every call site below).
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: dup succeeded, so `new_fd` is a fresh, uniquely owned
    // descriptor.
    Ok(unsafe { OwnedFd::from_raw_fd(new_fd) })
}

/// Duplicates `fd` onto the fixed descriptor number `target`, replacing
/// whatever `target` used to name. Only sound to call between `fork`
/// and `exec` (i.e. from inside a `pre_exec` closure), where the
/// process image is still the parent's but no other thread is running.
pub(crate) fn dup2_fixed(fd: RawFd, target: RawFd) -> io::Result<()> {
    // SAFETY: caller contract above; `dup2` here only touches the
    // calling (post-fork) process's own descriptor table.
    if unsafe { libc::dup2(fd, target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub(crate) fn receiver_from_owned(fd: OwnedFd) -> io::Result<Receiver> {
    pipe::Receiver::from_file(File::from(fd))
}

pub(crate) fn sender_from_owned(fd: OwnedFd) -> io::Result<Sender> {
    pipe::Sender::from_file(File::from(fd))
}

/// Opens the data pipe at the fixed descriptor the parent `dup2`'d into
/// this process before `exec`. Only meaningful in a process spawned by
/// [`crate::parent::spawn_with_handshake`].
pub(crate) fn open_child_data() -> io::Result<Receiver> {
    // SAFETY: `DATA_FD` is only a valid open pipe descriptor in a child
    // spawned through this crate's own `spawn_with_handshake`; calling
    // this anywhere else is a programmer error the caller must avoid.
    let fd = unsafe { OwnedFd::from_raw_fd(DATA_FD) };
    receiver_from_owned(fd)
}

/// Opens the status pipe at the fixed descriptor the parent `dup2`'d
/// into this process before `exec`.
pub(crate) fn open_child_status() -> io::Result<Sender> {
    // SAFETY: see `open_child_data`.
    let fd = unsafe { OwnedFd::from_raw_fd(STATUS_FD) };
    sender_from_owned(fd)
}
