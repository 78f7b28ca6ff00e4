// SPDX-License-Identifier: MIT

//! Ownership of the auxiliary descriptors that arrive with a request.
//!
//! Every path out of request handling ends by releasing the request's
//! descriptors here.  The launcher only ever holds its own copies: a
//! descriptor forwarded to a TA is duplicated into that process by the
//! kernel, so the local copy is still closed exactly once.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

/// Most auxiliary (shared memory) descriptors admitted per request.
pub const MAX_AUX_FDS: usize = 4;

/// Move-only set of admitted auxiliary descriptors.
#[derive(Debug, Default)]
pub struct AuxFds {
    fds: Vec<OwnedFd>,
}

impl AuxFds {
    /// Admit up to `MAX_AUX_FDS` descriptors in arrival order.
    /// Anything beyond the limit is closed right away and never recorded.
    pub fn admit(received: Vec<OwnedFd>) -> Self {
        let mut fds = received;
        if fds.len() > MAX_AUX_FDS {
            let excess = fds.split_off(MAX_AUX_FDS);
            tracing::warn!(dropped = excess.len(), "too many auxiliary descriptors");
            drop(excess);
        }
        AuxFds { fds }
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Borrow the descriptors, in admission order, for forwarding.
    pub fn borrowed(&self) -> Vec<BorrowedFd<'_>> {
        self.fds.iter().map(|fd| fd.as_fd()).collect()
    }

    /// Close every descriptor, last admitted first.  Returns the number closed.
    pub fn release(mut self) -> usize {
        self.close_all()
    }

    fn close_all(&mut self) -> usize {
        let mut closed = 0;
        while let Some(fd) = self.fds.pop() {
            tracing::trace!(fd = fd.as_raw_fd(), remaining = self.fds.len(), "closing auxiliary descriptor");
            drop(fd);
            closed += 1;
        }
        closed
    }
}

impl Drop for AuxFds {
    fn drop(&mut self) {
        if !self.fds.is_empty() {
            tracing::debug!(count = self.fds.len(), "auxiliary descriptors released by drop");
            self.close_all();
        }
    }
}
