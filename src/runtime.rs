// SPDX-License-Identifier: MIT

//! The launcher runtime.
//!
//! `run_launcher` is the main entry point.  It takes over the control
//! channel inherited from the manager, installs the signal bridge, and runs
//! the dispatch loop.  Each open-session request from the manager turns into
//! a new TA host process with its own channel to the manager; the launcher
//! keeps nothing from a request once it has been served.

pub mod cleanup;
pub mod control;
pub mod decoder;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handoff;
pub mod signal_bridge;
pub mod spawn;

mod spawn_linux;

use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::libc;

pub use control::{ControlParams, SharedParams};
pub use dispatch::{ExitReason, Launcher};
pub use error::{LauncherError, SpawnError};
pub use signal_bridge::{SignalBridge, SignalSource};
pub use spawn::{LaunchEnv, SpawnContext, TaSpawner};
pub use spawn_linux::{EXIT_EXEC_FAILED, EXIT_FD_SETUP, ProcessSpawner};

use crate::config::LauncherConfig;

/// Run the launcher until a terminating signal or a fatal error.
pub fn run_launcher(config: LauncherConfig) -> Result<ExitReason, LauncherError> {
    let control = adopt_control_fd(config.control_fd)?;
    let signals = SignalBridge::install()?;
    let shared = SharedParams::new(nix::unistd::getpid().as_raw(), config.log.clone());
    let params = ControlParams::new(control, signals, shared);
    let spawner = ProcessSpawner::new(&config.launch)?;
    tracing::info!(
        control_fd = config.control_fd,
        ta_host = %config.launch.cmd.display(),
        reparent = config.launch.reparent,
        "launcher starting"
    );
    Launcher::new(params, spawner, config.graceful_termination)?.run()
}

/// Take ownership of the inherited control socket.
fn adopt_control_fd(fd: RawFd) -> Result<UnixStream, LauncherError> {
    if unsafe { libc::fcntl(fd, libc::F_GETFD) } < 0 {
        return Err(LauncherError::Setup(format!("control descriptor {fd} is not open")));
    }
    // Not inherited by anything this process starts.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(LauncherError::Setup(format!(
            "control descriptor {fd}: {}",
            std::io::Error::last_os_error()
        )));
    }
    // Safety: the descriptor is open and the manager handed it to this process alone.
    Ok(UnixStream::from(unsafe { OwnedFd::from_raw_fd(fd) }))
}
