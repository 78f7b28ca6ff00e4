// SPDX-License-Identifier: MIT

//! Framed send and receive over Unix stream sockets, with file descriptors
//! passed as `SCM_RIGHTS` ancillary data.
//!
//! Descriptors always travel with the first bytes of a frame, so the
//! receiver collects them from the `recvmsg` call that reads the frame
//! header and then reads the rest of the frame with plain reads.

use std::io::{IoSlice, IoSliceMut, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags, recvmsg, sendmsg};

use super::{frame, message, rwutil};

/// Most descriptors collected from a single frame.  The kernel closes any
/// that do not fit in the control buffer.
pub const MAX_RECV_FDS: usize = 8;

const RECV_BUFFER_SIZE: usize = 8 * 1024;

/// Outcome of a successful receive call.
#[derive(Debug)]
pub enum Received {
    /// A complete, well-formed frame.
    Message { payload: Vec<u8>, fds: Vec<OwnedFd> },
    /// The frame was invalid or too large and was dropped along with its descriptors.
    Discarded,
}

/// Send one frame carrying `payload`, with `fds` attached to its first bytes.
///
/// Returns the number of frame octets written, header included.
pub fn send(stream: &UnixStream, payload: &[u8], fds: &[BorrowedFd<'_>]) -> Result<usize, std::io::Error> {
    let data = frame::encode(payload)?;
    let raw: Vec<RawFd> = fds.iter().map(|fd| fd.as_raw_fd()).collect();
    let sent = send_with_fds(stream.as_raw_fd(), &data, &raw)?;
    if sent == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "sendmsg wrote 0 bytes",
        ));
    }
    // The ancillary data went out with the first chunk; the remainder is plain data.
    if sent < data.len() {
        let mut out = stream;
        out.write_all(&data[sent..])?;
    }
    Ok(data.len())
}

/// Hand a single descriptor to the peer, outside of any frame.
pub fn send_fd(stream: &UnixStream, fd: BorrowedFd<'_>) -> Result<(), std::io::Error> {
    let sent = send_with_fds(stream.as_raw_fd(), &[message::FD_TRANSFER_MARK], &[fd.as_raw_fd()])?;
    if sent != 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::WriteZero,
            "descriptor transfer not sent",
        ));
    }
    Ok(())
}

/// Receive one frame.
///
/// Any descriptors received alongside a frame that fails part way through
/// are closed before the error is returned.
pub fn recv(stream: &UnixStream) -> Result<Received, std::io::Error> {
    let mut header = [0u8; frame::HEADER_LEN];
    let (filled, fds) = recv_with_fds(stream.as_raw_fd(), &mut header)?;
    if filled == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "peer closed the channel",
        ));
    }
    let mut source = stream;
    source.read_exact(&mut header[filled..])?;
    let header = frame::FrameHeader::decode(&header)?;

    let mut buff = [0u8; RECV_BUFFER_SIZE];
    if header.start_mark != frame::START_MARK {
        // The size is meaningless without a start mark, so drop everything
        // already queued.  A frame queued right behind the junk goes with it.
        drain_queued(stream, &mut buff)?;
        drop(fds);
        return Ok(Received::Discarded);
    }
    if !header.is_acceptable() {
        rwutil::discard_bytes(&mut source, header.size, &mut buff)?;
        drop(fds);
        return Ok(Received::Discarded);
    }
    let payload = rwutil::read_chunked_bytes(&mut source, header.size, &mut buff)?;
    Ok(Received::Message { payload, fds })
}

/// Receive a single descriptor sent with [`send_fd`].
pub fn recv_fd(stream: &UnixStream) -> Result<OwnedFd, std::io::Error> {
    let mut mark = [0u8; 1];
    let (filled, mut fds) = recv_with_fds(stream.as_raw_fd(), &mut mark)?;
    if filled != 1 || mark[0] != message::FD_TRANSFER_MARK || fds.len() != 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("expected one descriptor, received {} with {} bytes", fds.len(), filled),
        ));
    }
    fds.pop().ok_or_else(|| std::io::Error::other("descriptor vanished"))
}

fn send_with_fds(sock: RawFd, data: &[u8], fds: &[RawFd]) -> Result<usize, std::io::Error> {
    let iov = [IoSlice::new(data)];
    let rights = [ControlMessage::ScmRights(fds)];
    let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };
    // MSG_NOSIGNAL: a vanished peer must surface as EPIPE, not SIGPIPE.
    let sent = sendmsg::<()>(sock, &iov, cmsgs, MsgFlags::MSG_NOSIGNAL, None)?;
    Ok(sent)
}

fn recv_with_fds(sock: RawFd, buf: &mut [u8]) -> Result<(usize, Vec<OwnedFd>), std::io::Error> {
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_RECV_FDS]);
    let mut iov = [IoSliceMut::new(buf)];
    let msg = recvmsg::<()>(sock, &mut iov, Some(&mut cmsg_buffer), MsgFlags::MSG_CMSG_CLOEXEC)?;

    let mut fds = Vec::new();
    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            for fd in received {
                // Safety: the kernel just installed this descriptor for us and nothing else owns it.
                fds.push(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
    if msg.flags.contains(MsgFlags::MSG_CTRUNC) {
        tracing::warn!(kept = fds.len(), "ancillary data truncated; extra descriptors dropped by the kernel");
    }
    Ok((msg.bytes, fds))
}

fn drain_queued(stream: &UnixStream, buff: &mut [u8]) -> Result<(), std::io::Error> {
    loop {
        match nix::sys::socket::recv(stream.as_raw_fd(), buff, MsgFlags::MSG_DONTWAIT) {
            Ok(0) => return Ok(()),
            Ok(_) => continue,
            Err(nix::errno::Errno::EAGAIN) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}
