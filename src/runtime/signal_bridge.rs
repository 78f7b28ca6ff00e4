// SPDX-License-Identifier: MIT

//! Self-pipe signal bridge.
//!
//! The asynchronous handler does two async-signal-safe things: it sets a
//! bit in an atomic mask and writes one byte into a non-blocking pipe.  The
//! read end of the pipe sits in the dispatcher's event set, so signal
//! delivery wakes the same wait call that watches the control channel.
//! The bits are only interpreted on the main loop, after `reset`.

use std::fs::File;
use std::io::Read;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use bitflags::bitflags;
use nix::fcntl::OFlag;
use nix::libc;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

use crate::runtime::error::LauncherError;

bitflags! {
    /// Signals recorded by the handler since the last reset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PendingSignals: u32 {
        const TERM = 1 << 0;
        const HUP = 1 << 1;
        const INT = 1 << 2;
    }
}

/// A pollable source of pending-signal notifications.
pub trait SignalSource {
    /// The descriptor that becomes readable when signals are pending.
    fn as_fd(&self) -> BorrowedFd<'_>;

    /// Drain the notification descriptor and return, clearing, the pending bits.
    fn reset(&self) -> PendingSignals;
}

static PENDING: AtomicU32 = AtomicU32::new(0);
static WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static INSTALLED: AtomicBool = AtomicBool::new(false);

/// The process-wide bridge.  At most one may exist at a time.
pub struct SignalBridge {
    read: File,
    write: OwnedFd,
}

impl SignalBridge {
    /// Create the self-pipe and install the handlers for SIGTERM, SIGHUP and
    /// SIGINT.  SIGPIPE is ignored; SIGCHLD is left alone.
    pub fn install() -> Result<Self, LauncherError> {
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return Err(LauncherError::SignalBridge("already installed".to_string()));
        }
        match Self::setup() {
            Ok(bridge) => Ok(bridge),
            Err(e) => {
                WRITE_FD.store(-1, Ordering::SeqCst);
                INSTALLED.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn setup() -> Result<Self, LauncherError> {
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)?;
        WRITE_FD.store(write.as_raw_fd(), Ordering::SeqCst);
        PENDING.store(0, Ordering::SeqCst);

        // No SA_RESTART: an idle wait must return EINTR when a signal lands.
        let action = SigAction::new(
            SigHandler::Handler(on_signal),
            SaFlags::empty(),
            SigSet::all(),
        );
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        // Safety: the handler only touches atomics and calls write(2).
        unsafe {
            sigaction(Signal::SIGTERM, &action)?;
            sigaction(Signal::SIGHUP, &action)?;
            sigaction(Signal::SIGINT, &action)?;
            sigaction(Signal::SIGPIPE, &ignore)?;
        }
        tracing::debug!(read_fd = read.as_raw_fd(), write_fd = write.as_raw_fd(), "signal bridge installed");
        Ok(SignalBridge { read: File::from(read), write })
    }
}

impl SignalSource for SignalBridge {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.read.as_fd()
    }

    fn reset(&self) -> PendingSignals {
        drain(&self.read);
        PendingSignals::from_bits_truncate(PENDING.swap(0, Ordering::SeqCst))
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        // Handlers stay installed but stop writing into the soon-closed pipe.
        WRITE_FD.store(-1, Ordering::SeqCst);
        tracing::trace!(write_fd = self.write.as_raw_fd(), "signal bridge removed");
        INSTALLED.store(false, Ordering::SeqCst);
    }
}

/// Read everything queued in a non-blocking pipe.
pub(crate) fn drain(mut pipe: &File) {
    let mut buf = [0u8; 64];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return,
        }
    }
}

extern "C" fn on_signal(signum: libc::c_int) {
    let bit = match signum {
        libc::SIGTERM => PendingSignals::TERM,
        libc::SIGHUP => PendingSignals::HUP,
        libc::SIGINT => PendingSignals::INT,
        _ => return,
    };
    let saved = nix::errno::Errno::last_raw();
    PENDING.fetch_or(bit.bits(), Ordering::SeqCst);
    let fd = WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let byte = 1u8;
        // A full pipe already guarantees a wake-up, so the result is irrelevant.
        let _ = unsafe { libc::write(fd, &byte as *const u8 as *const libc::c_void, 1) };
    }
    nix::errno::Errno::set_raw(saved);
}
