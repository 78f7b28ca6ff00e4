//! Utility helpers for running the tests.

use std::fs::File;
use std::io::Read;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;

use nix::fcntl::OFlag;

use super::manager::Manager;
use super::state::ManualSignals;
use crate::logging::LogConfig;
use crate::runtime::control::{ControlParams, SharedParams};
use crate::runtime::dispatch::Launcher;
use crate::runtime::spawn::TaSpawner;

/// Control parameters whose channel is connected to a fresh manager.
pub fn control_params() -> (Manager, ControlParams<ManualSignals>) {
    let (manager_end, launcher_end) = UnixStream::pair().expect("control socket pair");
    let shared = SharedParams::new(
        nix::unistd::getpid().as_raw(),
        LogConfig { filter: "tee_launcher=debug".to_string(), json: false },
    );
    let params = ControlParams::new(launcher_end, ManualSignals::new(), shared);
    (Manager { stream: manager_end }, params)
}

/// Connect a launcher to a fresh manager.
pub fn launcher<T: TaSpawner>(spawner: T, graceful: bool) -> (Manager, Launcher<ManualSignals, T>) {
    let (manager, params) = control_params();
    let launcher = Launcher::new(params, spawner, graceful).expect("launcher setup");
    (manager, launcher)
}

/// Auxiliary descriptors whose lifetime the test can observe.
///
/// Each one is the write end of a pipe.  The read end reports EOF only
/// once every copy of the write end, in any process, is closed, so tests
/// using probes run as `#[parallel(fds)]` and never alongside the
/// `#[serial(fds)]` tests that clone or fork.
pub struct Probes {
    readers: Vec<File>,
}

impl Probes {
    pub fn new(count: usize) -> (Probes, Vec<OwnedFd>) {
        let mut readers = Vec::new();
        let mut writers = Vec::new();
        for _ in 0..count {
            let (r, w) =
                nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC).expect("failed to create pipe");
            readers.push(File::from(r));
            writers.push(w);
        }
        (Probes { readers }, writers)
    }

    /// Number of probes whose write end is still open somewhere.
    pub fn open_count(&self) -> usize {
        self.readers.iter().filter(|r| !is_closed(r)).count()
    }
}

fn is_closed(mut reader: &File) -> bool {
    let mut buf = [0u8; 1];
    match reader.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => false,
        Err(e) => panic!("probe read failed: {e}"),
    }
}
