// SPDX-License-Identifier: MIT

//! TA host side of the handoff.
//!
//! A TA host is started with its bootstrap socket at [`HANDOFF_FD`].  It
//! calls [`receive_handoff`] once to obtain its channel to the manager and
//! the open-session request, then enters its own execution loop.

use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use crate::comm::message::{MessageHeader, MessageKind, MessageName, OpenSessionQuery};
use crate::comm::transport::{self, Received};
use crate::runtime::cleanup::AuxFds;
use crate::runtime::control::SharedParams;
use crate::runtime::decoder::OpenSessionRequest;
use crate::runtime::error::LauncherError;

pub use crate::runtime::spawn::HANDOFF_FD;

/// What the launcher hands to a new TA context.
#[derive(Debug)]
pub struct Handoff {
    /// Direct channel to the manager.
    pub channel: UnixStream,
    pub request: OpenSessionRequest,
    /// The launcher's parameters, if they were present in the environment.
    pub shared: Option<SharedParams>,
}

/// Take ownership of the bootstrap socket installed by the launcher.
///
/// # Safety
///
/// Must be called at most once, and only in a process started by the
/// launcher, where [`HANDOFF_FD`] is the bootstrap socket.
pub unsafe fn bootstrap_socket() -> UnixStream {
    UnixStream::from(unsafe { OwnedFd::from_raw_fd(HANDOFF_FD) })
}

/// Read the single handoff frame from the bootstrap socket.
pub fn receive_handoff(bootstrap: &UnixStream) -> Result<Handoff, LauncherError> {
    let (payload, fds) = match transport::recv(bootstrap)? {
        Received::Message { payload, fds } => (payload, fds),
        Received::Discarded => {
            return Err(LauncherError::Protocol("handoff frame discarded".to_string()));
        }
    };
    let mut fds = fds.into_iter();
    let channel = fds
        .next()
        .ok_or_else(|| LauncherError::Protocol("handoff without a channel".to_string()))?;
    let aux_fds = AuxFds::admit(fds.collect());

    let header = MessageHeader::decode(&payload)?;
    if header.name != MessageName::OpenSession || header.kind != MessageKind::Query {
        return Err(LauncherError::Protocol(format!(
            "unexpected handoff message {:?}/{:?}",
            header.name, header.kind
        )));
    }
    let query = OpenSessionQuery::decode_body(&header, &payload)?;
    Ok(Handoff {
        channel: UnixStream::from(channel),
        request: OpenSessionRequest {
            session_id: query.session_id,
            ta_uuid: query.ta_uuid,
            params: query.params,
            aux_fds,
        },
        shared: SharedParams::from_lookup(|key| std::env::var(key).ok()),
    })
}
