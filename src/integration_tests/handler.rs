//! TaSpawner implementation for the tests.

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use nix::libc;
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::unistd::Pid;

use crate::runtime::error::SpawnError;
use crate::runtime::spawn::{SpawnContext, TaSpawner, deliver_handoff};
use crate::ta::{Handoff, receive_handoff};

/// Base of the fake process ids handed out by the recording spawner.
const FIRST_FAKE_PID: i32 = 40_000;

/// Plays the TA side in-process: each spawn delivers the handoff frame over
/// a fresh socket pair and keeps what a TA host would have received.
#[derive(Default)]
pub struct RecordingSpawner {
    /// Make `channel_pair` fail, as if the descriptor table were full.
    pub fail_channel_pair: bool,
    /// Make `spawn` fail without touching the context.
    pub fail_spawn: bool,
    pub spawned: Vec<Handoff>,
    pub attempts: usize,
}

impl RecordingSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_channel_pair() -> Self {
        RecordingSpawner { fail_channel_pair: true, ..Self::default() }
    }

    pub fn failing_spawn() -> Self {
        RecordingSpawner { fail_spawn: true, ..Self::default() }
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.spawned.iter().map(|h| h.request.session_id).collect()
    }
}

impl TaSpawner for RecordingSpawner {
    fn channel_pair(&mut self) -> Result<(OwnedFd, OwnedFd), std::io::Error> {
        if self.fail_channel_pair {
            return Err(std::io::Error::from_raw_os_error(libc::EMFILE));
        }
        Ok(socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC)?)
    }

    fn spawn(&mut self, ctx: SpawnContext<'_>) -> Result<Pid, SpawnError> {
        self.attempts += 1;
        if self.fail_spawn {
            return Err(SpawnError::Argument("spawning disabled for this test".to_string()));
        }
        let (launcher_end, ta_end) = UnixStream::pair()?;
        deliver_handoff(&launcher_end, ctx)?;
        drop(launcher_end);
        let handoff = receive_handoff(&ta_end).map_err(|e| SpawnError::Handoff(e.into()))?;
        self.spawned.push(handoff);
        Ok(Pid::from_raw(FIRST_FAKE_PID + self.spawned.len() as i32))
    }
}
