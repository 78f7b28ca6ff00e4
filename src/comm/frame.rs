// SPDX-License-Identifier: MIT

//! Frame envelope for control-channel traffic.
//!
//! Every message on a launcher socket is wrapped in an 8 octet envelope:
//! a start mark followed by the payload length.  Ancillary file
//! descriptors, when present, ride along with the first bytes of the frame.

use super::rwutil;

/// Marks the start of a frame ("TEE1").
pub const START_MARK: u32 = 0x5445_4531;

const _HEADER_MARK_START: usize = 0;
const _HEADER_MARK_END: usize = _HEADER_MARK_START + rwutil::U32_SIZE;
const _HEADER_SIZE_START: usize = _HEADER_MARK_END;
const _HEADER_SIZE_END: usize = _HEADER_SIZE_START + rwutil::U32_SIZE;

/// Number of octets in the frame header.
pub const HEADER_LEN: usize = _HEADER_SIZE_END;

/// Largest payload the launcher accepts.  Anything larger is drained and dropped.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Decoded frame envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub start_mark: u32,
    pub size: usize,
}

impl FrameHeader {
    pub fn decode(buff: &[u8; HEADER_LEN]) -> Result<Self, std::io::Error> {
        Ok(FrameHeader {
            start_mark: rwutil::get_be_u32(&buff[_HEADER_MARK_START.._HEADER_MARK_END])?,
            size: rwutil::get_be_u32(&buff[_HEADER_SIZE_START.._HEADER_SIZE_END])? as usize,
        })
    }

    /// Whether the payload that follows this header should be handed to the caller.
    /// An oversized frame is still drained, using its size, to keep the stream aligned.
    pub fn is_acceptable(&self) -> bool {
        self.start_mark == START_MARK && self.size <= MAX_PAYLOAD_SIZE
    }
}

/// Wrap the payload in a frame envelope.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "payload size exceeded frame maximum",
        ));
    }
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&START_MARK.to_be_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}
