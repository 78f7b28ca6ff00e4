//! Real TA host processes, played by the system shell.

use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use nix::libc;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use serial_test::serial;

use super::util;
use crate::logging::LogConfig;
use crate::runtime::cleanup::AuxFds;
use crate::runtime::control::SharedParams;
use crate::runtime::decoder::OpenSessionRequest;
use crate::runtime::handoff::HandoffOutcome;
use crate::runtime::spawn::{LaunchEnv, SpawnContext, TaSpawner};
use crate::runtime::ProcessSpawner;

/// Checks the bootstrap socket and the launcher pid, then reads the handoff
/// frame until the launcher closes its end.
const HOST_SCRIPT: &str = r#"test -S /proc/self/fd/3 || exit 1
test "$TEE_LAUNCHER_PID" = "$1" || exit 2
cat <&3 >/dev/null
exit 7"#;

const HOST_EXIT: i32 = 7;

fn shell_host() -> LaunchEnv {
    let pid = nix::unistd::getpid().as_raw().to_string();
    LaunchEnv {
        cmd: PathBuf::from("sh"),
        args: vec![
            OsString::from("-c"),
            OsString::from(HOST_SCRIPT),
            OsString::from("ta-host"),
            OsString::from(pid),
        ],
        // The test reaps the host itself.
        reparent: false,
    }
}

fn assert_host_exit(pid: Pid) {
    match waitpid(pid, None).expect("waitpid failed") {
        WaitStatus::Exited(_, code) => assert_eq!(code, HOST_EXIT, "host exited with {code}"),
        ws => {
            unsafe { libc::kill(pid.as_raw(), libc::SIGKILL) };
            panic!("unexpected wait status: {ws:?}")
        }
    }
}

#[test]
#[serial(fds)]
fn host_starts_with_the_bootstrap_socket() {
    let mut spawner = ProcessSpawner::new(&shell_host()).expect("no shell found");
    let (_manager_end, ta_end) = UnixStream::pair().unwrap();
    let request = OpenSessionRequest {
        session_id: 1,
        ta_uuid: [1; 16],
        params: vec![],
        aux_fds: AuxFds::default(),
    };
    let ctx = SpawnContext {
        channel: OwnedFd::from(ta_end),
        shared: SharedParams::new(
            nix::unistd::getpid().as_raw(),
            LogConfig { filter: "info".to_string(), json: false },
        ),
        request: &request,
    };
    let pid = spawner.spawn(ctx).expect("spawn failed");
    assert_host_exit(pid);
}

/// The whole path: manager request, response, channel transfer, host process.
#[test]
#[serial(fds)]
fn launcher_starts_a_host_per_request() {
    let spawner = ProcessSpawner::new(&shell_host()).expect("no shell found");
    let (manager, mut launcher) = util::launcher(spawner, false);
    manager.open_session(30, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);

    let response = manager.read_response();
    assert_eq!(response.session_id, 30);
    assert!(!response.is_failure());
    let _channel = manager.read_channel();

    match launcher.last_outcome() {
        Some(HandoffOutcome::Spawned(pid)) => assert_host_exit(pid),
        other => panic!("unexpected outcome {other:?}"),
    }
}
