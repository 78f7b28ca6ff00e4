//! The manager's side of the control channel.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use nix::errno::Errno;
use nix::sys::socket::{MsgFlags, recv};

use crate::comm::message::{MessageKind, MessageName, OpenSessionQuery, TaCreatedResponse};
use crate::comm::transport::{self, Received};

pub struct Manager {
    pub stream: UnixStream,
}

impl Manager {
    pub fn query(session_id: u64) -> OpenSessionQuery {
        OpenSessionQuery {
            session_id,
            ta_uuid: [0x5a; 16],
            params: format!("session-{session_id}").into_bytes(),
        }
    }

    /// Ask for a new session, passing `fds` as its auxiliary descriptors.
    pub fn open_session(&self, session_id: u64, fds: &[OwnedFd]) {
        self.send_as(session_id, MessageName::OpenSession, MessageKind::Query, fds);
    }

    /// Send a request with an arbitrary name and kind.
    pub fn send_as(&self, session_id: u64, name: MessageName, kind: MessageKind, fds: &[OwnedFd]) {
        let payload = Self::query(session_id).encode_as(name, kind);
        let borrowed: Vec<_> = fds.iter().map(|fd| fd.as_fd()).collect();
        transport::send(&self.stream, &payload, &borrowed).expect("manager send failed");
    }

    pub fn read_response(&self) -> TaCreatedResponse {
        match transport::recv(&self.stream).expect("manager receive failed") {
            Received::Message { payload, fds } => {
                assert!(fds.is_empty(), "response carried descriptors");
                TaCreatedResponse::decode(&payload).expect("not a created response")
            }
            Received::Discarded => panic!("response frame was discarded"),
        }
    }

    pub fn read_channel(&self) -> UnixStream {
        UnixStream::from(transport::recv_fd(&self.stream).expect("no channel descriptor"))
    }

    /// True when nothing is waiting to be read from the launcher.
    pub fn is_quiet(&self) -> bool {
        let mut buf = [0u8; 1];
        let res = recv(self.stream.as_raw_fd(), &mut buf, MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT);
        matches!(res, Err(Errno::EAGAIN))
    }
}
