// SPDX-License-Identifier: MIT

//! Turns one receive on the control channel into a validated open-session request.

use std::os::unix::net::UnixStream;

use crate::comm::message::{MessageHeader, MessageKind, MessageName, OpenSessionQuery, UUID_LEN};
use crate::comm::transport::{self, Received};
use crate::runtime::cleanup::AuxFds;

/// A validated open-session request, together with the auxiliary
/// descriptors that must be resolved before it goes away.
#[derive(Debug)]
pub struct OpenSessionRequest {
    pub session_id: u64,
    pub ta_uuid: [u8; UUID_LEN],
    pub params: Vec<u8>,
    pub aux_fds: AuxFds,
}

impl OpenSessionRequest {
    /// The request as it goes on the wire, without its descriptors.
    pub fn query(&self) -> OpenSessionQuery {
        OpenSessionQuery {
            session_id: self.session_id,
            ta_uuid: self.ta_uuid,
            params: self.params.clone(),
        }
    }

    /// Cleanup path: close the recorded descriptors and drop the request.
    pub fn release(self) -> usize {
        self.aux_fds.release()
    }
}

/// What a single receive produced.
#[derive(Debug)]
pub enum Decoded {
    /// The transport failed; whatever arrived has been released.
    Transient(std::io::Error),
    /// A frame arrived that carries nothing for the launcher.
    Ignored,
    /// A message that is not an open-session query.  No reply is owed;
    /// its descriptors were closed.
    Violation {
        header: Option<MessageHeader>,
        released: usize,
    },
    Request(OpenSessionRequest),
}

/// Receive and decode exactly one message from the control channel.
pub fn receive_request(control: &UnixStream) -> Decoded {
    decode(transport::recv(control))
}

/// Classify the result of a receive call.
pub fn decode(received: Result<Received, std::io::Error>) -> Decoded {
    let (payload, fds) = match received {
        Err(e) => return Decoded::Transient(e),
        Ok(Received::Discarded) => return Decoded::Ignored,
        Ok(Received::Message { payload, fds }) => (payload, fds),
    };
    let aux_fds = AuxFds::admit(fds);

    let header = match MessageHeader::decode(&payload) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!(error = %e, "undecodable message header");
            return violation(None, aux_fds);
        }
    };
    if header.name != MessageName::OpenSession || header.kind != MessageKind::Query {
        tracing::error!(
            name = ?header.name,
            kind = ?header.kind,
            session_id = header.session_id,
            "invalid message"
        );
        return violation(Some(header), aux_fds);
    }
    match OpenSessionQuery::decode_body(&header, &payload) {
        Ok(query) => Decoded::Request(OpenSessionRequest {
            session_id: query.session_id,
            ta_uuid: query.ta_uuid,
            params: query.params,
            aux_fds,
        }),
        Err(e) => {
            tracing::error!(session_id = header.session_id, error = %e, "malformed open session body");
            violation(Some(header), aux_fds)
        }
    }
}

fn violation(header: Option<MessageHeader>, aux_fds: AuxFds) -> Decoded {
    let released = aux_fds.release();
    Decoded::Violation { header, released }
}
