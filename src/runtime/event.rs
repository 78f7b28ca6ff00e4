// SPDX-License-Identifier: MIT

//! Event primitive: a thin epoll wrapper keyed by raw descriptor number.

use std::os::fd::{AsFd, AsRawFd};

use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};

/// Size of the per-wait event buffer.
pub const MAX_CURRENT_EVENTS: usize = 5;

/// Result of one wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// This many entries at the front of the buffer are valid.
    Ready(usize),
    /// A signal interrupted the wait before anything became ready.
    Interrupted,
}

pub struct EventSet {
    epoll: Epoll,
}

impl EventSet {
    pub fn new() -> Result<Self, nix::Error> {
        Ok(EventSet {
            epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
        })
    }

    /// Watch `fd` for `interest`.  Events for it carry the descriptor number
    /// as their token, see [`token`].
    pub fn register<F: AsFd>(&self, fd: F, interest: EpollFlags) -> Result<(), nix::Error> {
        let data = token(&fd);
        self.epoll.add(fd, EpollEvent::new(interest, data))
    }

    /// Block until at least one registered descriptor is ready.
    pub fn wait(&self, events: &mut [EpollEvent]) -> Result<WaitOutcome, nix::Error> {
        match self.epoll.wait(events, EpollTimeout::NONE) {
            Ok(count) => Ok(WaitOutcome::Ready(count)),
            Err(Errno::EINTR) => Ok(WaitOutcome::Interrupted),
            Err(e) => Err(e),
        }
    }
}

/// The token under which `fd` is registered.
pub fn token<F: AsFd>(fd: &F) -> u64 {
    fd.as_fd().as_raw_fd() as u64
}
