// SPDX-License-Identifier: MIT

//! Launcher message payloads.
//!
//! Each payload starts with a 16 octet header (name, kind, session id),
//! followed by a body specific to the message name.

use super::rwutil;

const _HEADER_NAME_START: usize = 0;
const _HEADER_NAME_END: usize = _HEADER_NAME_START + rwutil::U32_SIZE;
const _HEADER_KIND_START: usize = _HEADER_NAME_END;
const _HEADER_KIND_END: usize = _HEADER_KIND_START + rwutil::U32_SIZE;
const _HEADER_SESSION_START: usize = _HEADER_KIND_END;
const _HEADER_SESSION_END: usize = _HEADER_SESSION_START + rwutil::U64_SIZE;

/// Number of octets in the message header.
pub const HEADER_LEN: usize = _HEADER_SESSION_END;

/// Size of a TA UUID.
pub const UUID_LEN: usize = 16;

/// The process identifier value reporting that no TA was created.
pub const PID_SPAWN_FAILED: i32 = -1;

/// Payload of the single-fd transfer message.
pub const FD_TRANSFER_MARK: u8 = 0x46;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageName {
    CreatedTa,
    OpenSession,
    InvokeCommand,
    CloseSession,
    Unknown(u32),
}

impl From<u32> for MessageName {
    fn from(v: u32) -> Self {
        match v {
            0x01 => MessageName::CreatedTa,
            0x02 => MessageName::OpenSession,
            0x03 => MessageName::InvokeCommand,
            0x04 => MessageName::CloseSession,
            other => MessageName::Unknown(other),
        }
    }
}

impl From<MessageName> for u32 {
    fn from(v: MessageName) -> Self {
        match v {
            MessageName::CreatedTa => 0x01,
            MessageName::OpenSession => 0x02,
            MessageName::InvokeCommand => 0x03,
            MessageName::CloseSession => 0x04,
            MessageName::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Query,
    Response,
    Unknown(u32),
}

impl From<u32> for MessageKind {
    fn from(v: u32) -> Self {
        match v {
            0x01 => MessageKind::Query,
            0x02 => MessageKind::Response,
            other => MessageKind::Unknown(other),
        }
    }
}

impl From<MessageKind> for u32 {
    fn from(v: MessageKind) -> Self {
        match v {
            MessageKind::Query => 0x01,
            MessageKind::Response => 0x02,
            MessageKind::Unknown(other) => other,
        }
    }
}

/// Common header carried by every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: MessageName,
    pub kind: MessageKind,
    pub session_id: u64,
}

impl MessageHeader {
    pub fn decode(payload: &[u8]) -> Result<Self, std::io::Error> {
        if payload.len() < HEADER_LEN {
            return Err(invalid("payload shorter than message header"));
        }
        Ok(MessageHeader {
            name: rwutil::get_be_u32(&payload[_HEADER_NAME_START.._HEADER_NAME_END])?.into(),
            kind: rwutil::get_be_u32(&payload[_HEADER_KIND_START.._HEADER_KIND_END])?.into(),
            session_id: rwutil::get_be_u64(&payload[_HEADER_SESSION_START.._HEADER_SESSION_END])?,
        })
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u32::from(self.name).to_be_bytes());
        out.extend_from_slice(&u32::from(self.kind).to_be_bytes());
        out.extend_from_slice(&self.session_id.to_be_bytes());
    }
}

/// Open-session query sent by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSessionQuery {
    pub session_id: u64,
    pub ta_uuid: [u8; UUID_LEN],
    /// Opaque operation parameters, forwarded untouched to the TA.
    pub params: Vec<u8>,
}

impl OpenSessionQuery {
    /// Encode with an explicit header, which lets callers produce the wrong
    /// name or kind on purpose.
    pub fn encode_as(&self, name: MessageName, kind: MessageKind) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + UUID_LEN + rwutil::U32_SIZE + self.params.len());
        MessageHeader { name, kind, session_id: self.session_id }.encode_into(&mut out);
        out.extend_from_slice(&self.ta_uuid);
        out.extend_from_slice(&(self.params.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.params);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        self.encode_as(MessageName::OpenSession, MessageKind::Query)
    }

    /// Decode the body of a payload whose header has already been read.
    pub fn decode_body(header: &MessageHeader, payload: &[u8]) -> Result<Self, std::io::Error> {
        let body = payload
            .get(HEADER_LEN..)
            .ok_or_else(|| invalid("payload shorter than message header"))?;
        let params_start = UUID_LEN + rwutil::U32_SIZE;
        if body.len() < params_start {
            return Err(invalid("open session body truncated"));
        }
        let mut ta_uuid = [0u8; UUID_LEN];
        ta_uuid.copy_from_slice(&body[..UUID_LEN]);
        let params_len = rwutil::get_be_u32(&body[UUID_LEN..params_start])? as usize;
        if body.len() - params_start != params_len {
            return Err(invalid("open session parameter length mismatch"));
        }
        Ok(OpenSessionQuery {
            session_id: header.session_id,
            ta_uuid,
            params: body[params_start..].to_vec(),
        })
    }
}

/// Reply to the manager for an open-session query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaCreatedResponse {
    pub session_id: u64,
    /// The launcher's process id on success, `PID_SPAWN_FAILED` otherwise.
    pub pid: i32,
}

impl TaCreatedResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + rwutil::U32_SIZE);
        MessageHeader {
            name: MessageName::CreatedTa,
            kind: MessageKind::Response,
            session_id: self.session_id,
        }
        .encode_into(&mut out);
        out.extend_from_slice(&self.pid.to_be_bytes());
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, std::io::Error> {
        let header = MessageHeader::decode(payload)?;
        if header.name != MessageName::CreatedTa || header.kind != MessageKind::Response {
            return Err(invalid("not a TA created response"));
        }
        let pid = rwutil::get_be_i32(&payload[HEADER_LEN..])?;
        Ok(TaCreatedResponse { session_id: header.session_id, pid })
    }

    pub fn is_failure(&self) -> bool {
        self.pid == PID_SPAWN_FAILED
    }
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}
