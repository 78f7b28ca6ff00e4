// SPDX-License-Identifier: MIT

//! General model for spawning TA contexts.

use std::ffi::OsString;
use std::os::fd::{AsFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::unistd::Pid;

use crate::comm::{frame, transport};
use crate::runtime::control::SharedParams;
use crate::runtime::decoder::OpenSessionRequest;
use crate::runtime::error::SpawnError;

/// Descriptor number at which a new TA host finds its bootstrap socket.
pub const HANDOFF_FD: RawFd = 3;

/// Describes how to launch a TA host process.
#[derive(Debug, Clone)]
pub struct LaunchEnv {
    pub cmd: PathBuf,
    pub args: Vec<OsString>,
    /// Make the new process a child of the launcher's parent (the manager)
    /// rather than of the launcher itself.
    pub reparent: bool,
}

/// Everything a new TA context is handed at spawn time.
pub struct SpawnContext<'a> {
    /// The TA's end of the channel whose other end went to the manager.
    pub channel: OwnedFd,
    /// Private copy of the shared parameters.
    pub shared: SharedParams,
    pub request: &'a OpenSessionRequest,
}

/// Creates the channel pair and the new execution context for a request.
pub trait TaSpawner {
    /// Create the connected stream-socket pair for one session.
    fn channel_pair(&mut self) -> Result<(OwnedFd, OwnedFd), std::io::Error> {
        let pair = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )?;
        Ok(pair)
    }

    /// Start the new context.  Whatever the result, the context's channel
    /// endpoint is closed in the launcher when this returns.
    fn spawn(&mut self, ctx: SpawnContext<'_>) -> Result<Pid, SpawnError>;
}

/// Send the handoff frame over a bootstrap socket: the encoded request,
/// with the channel endpoint followed by the auxiliary descriptors.
pub fn deliver_handoff(bootstrap: &UnixStream, ctx: SpawnContext<'_>) -> Result<(), SpawnError> {
    let payload = ctx.request.query().encode();
    let mut fds = Vec::with_capacity(1 + ctx.request.aux_fds.len());
    fds.push(ctx.channel.as_fd());
    fds.extend(ctx.request.aux_fds.borrowed());

    let sent = transport::send(bootstrap, &payload, &fds)?;
    if sent != frame::HEADER_LEN + payload.len() {
        return Err(SpawnError::Handoff(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "short handoff frame",
        )));
    }
    Ok(())
}
