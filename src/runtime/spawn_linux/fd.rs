// SPDX-License-Identifier: MIT

//! Descriptor layout for a freshly cloned TA host.
//!
//! The new process keeps stdin, stdout and stderr, finds its bootstrap socket
//! at [`HANDOFF_FD`], and has nothing else open.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::libc;
use nix::sys::signal::{SigHandler, SigSet, SigmaskHow, Signal, pthread_sigmask, signal};

use crate::runtime::spawn::HANDOFF_FD;

/// Exit status of a child whose descriptors could not be arranged.
pub const EXIT_FD_SETUP: i32 = 253;

/// Fallback upper bound when the descriptor limit is unknown.
const DEFAULT_MAX_FD: libc::c_int = 1024;

pub struct BootstrapFd {
    /// The child's end of the bootstrap socket pair.
    child_end: OwnedFd,
    /// Everything the child needs is computed here, before the clone.
    max_fd: libc::c_int,
    clean_mask: SigSet,
}

impl BootstrapFd {
    pub fn new(child_end: OwnedFd) -> Self {
        let max_fd = match nix::unistd::sysconf(nix::unistd::SysconfVar::OPEN_MAX) {
            Ok(Some(n)) => n as libc::c_int,
            _ => DEFAULT_MAX_FD,
        };
        BootstrapFd { child_end, max_fd, clean_mask: SigSet::empty() }
    }

    /// Called in the child after the clone.  Errors cause an immediate exit,
    /// and nothing here allocates.
    pub fn child_after_clone(&self) {
        // The launcher runs its loop body with every signal blocked, and the
        // mask survives execve.
        if pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.clean_mask), None).is_err() {
            exit_with(EXIT_FD_SETUP);
        }
        // Same for an ignored disposition.
        if unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }.is_err() {
            exit_with(EXIT_FD_SETUP);
        }

        let res = unsafe { libc::dup2(self.child_end.as_raw_fd(), HANDOFF_FD) };
        if res < 0 {
            exit_with(EXIT_FD_SETUP);
        }
        // dup2 onto itself keeps the close-on-exec flag.
        if unsafe { libc::fcntl(HANDOFF_FD, libc::F_SETFD, 0) } < 0 {
            exit_with(EXIT_FD_SETUP);
        }

        close_fds_above(HANDOFF_FD, self.max_fd);
    }
}

/// Close every descriptor above `keep`.
///
/// Falls back to a close loop bounded by `max_fd` on kernels without
/// close_range.
fn close_fds_above(keep: libc::c_int, max_fd: libc::c_int) {
    let first = (keep + 1) as libc::c_uint;
    let res = unsafe { libc::syscall(libc::SYS_close_range, first, libc::c_uint::MAX, 0) };
    if res == 0 {
        return;
    }
    for fd in (keep + 1)..max_fd {
        // Already-closed descriptors are fine.
        let _ = unsafe { libc::close(fd) };
    }
}

fn exit_with(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}
