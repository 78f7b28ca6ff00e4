//! Request handling through the dispatch loop.

use std::io::{Read, Write};
use std::net::Shutdown;

use serial_test::parallel;

use super::handler::RecordingSpawner;
use super::manager::Manager;
use super::util::{self, Probes};
use crate::comm::message::{MessageKind, MessageName, PID_SPAWN_FAILED};
use crate::runtime::cleanup::AuxFds;
use crate::runtime::decoder::OpenSessionRequest;
use crate::runtime::dispatch::ExitReason;
use crate::runtime::error::LauncherError;
use crate::runtime::event::WaitOutcome;
use crate::runtime::handoff::{self, HandoffOutcome};
use crate::runtime::signal_bridge::PendingSignals;

fn own_pid() -> i32 {
    nix::unistd::getpid().as_raw()
}

/// A valid request is answered with the launcher's pid, followed by the
/// manager's end of a channel whose other end the new context holds.
#[test]
#[parallel(fds)]
fn open_session_hands_out_a_connected_channel() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    manager.open_session(21, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);

    let response = manager.read_response();
    assert_eq!(response.session_id, 21);
    assert_eq!(response.pid, own_pid());
    let mut channel = manager.read_channel();
    assert!(manager.is_quiet());

    let spawner = launcher.spawner();
    assert_eq!(spawner.session_ids(), vec![21]);
    let ta = &spawner.spawned[0];
    assert_eq!(ta.request.ta_uuid, [0x5a; 16]);
    assert_eq!(ta.request.params, b"session-21");
    assert!(ta.request.aux_fds.is_empty());

    channel.write_all(b"ping").unwrap();
    let mut buf = [0u8; 4];
    (&ta.channel).read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    assert!(matches!(launcher.last_outcome(), Some(HandoffOutcome::Spawned(_))));
    assert_eq!(launcher.stats().spawned(), 1);
}

/// Without a channel pair there is nothing to transfer or spawn; the
/// manager only gets the failure pid.
#[test]
#[parallel(fds)]
fn channel_failure_is_reported_with_the_sentinel_pid() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::failing_channel_pair(), false);
    let (probes, fds) = Probes::new(2);
    manager.open_session(5, &fds);
    drop(fds);
    assert_eq!(launcher.poll_once().unwrap(), None);

    let response = manager.read_response();
    assert_eq!(response.session_id, 5);
    assert_eq!(response.pid, PID_SPAWN_FAILED);
    assert!(manager.is_quiet());

    assert_eq!(launcher.spawner().attempts, 0);
    assert_eq!(probes.open_count(), 0);
    assert_eq!(launcher.last_outcome(), Some(HandoffOutcome::ChannelFailed));
}

/// Anything but an open-session query gets no reply, and its descriptors
/// are closed.  The loop keeps serving.
#[test]
#[parallel(fds)]
fn wrong_message_is_dropped_without_reply() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    let (probes, fds) = Probes::new(3);
    manager.send_as(9, MessageName::CloseSession, MessageKind::Query, &fds);
    drop(fds);
    assert_eq!(launcher.poll_once().unwrap(), None);

    assert!(manager.is_quiet());
    assert_eq!(probes.open_count(), 0);
    assert_eq!(launcher.spawner().attempts, 0);
    assert_eq!(launcher.stats().violations(), 1);

    manager.send_as(10, MessageName::OpenSession, MessageKind::Response, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert!(manager.is_quiet());
    assert_eq!(launcher.stats().violations(), 2);

    manager.open_session(11, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert_eq!(manager.read_response().session_id, 11);
    assert_eq!(launcher.stats().requests(), 1);
}

/// Auxiliary descriptors travel to the new context; the launcher keeps no copy.
#[test]
#[parallel(fds)]
fn aux_descriptors_follow_the_request() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    let (probes, fds) = Probes::new(2);
    manager.open_session(3, &fds);
    drop(fds);
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert_eq!(manager.read_response().pid, own_pid());
    let _channel = manager.read_channel();

    // Only the context holds them now.
    assert_eq!(probes.open_count(), 2);
    let ta = launcher.spawner_mut().spawned.pop().expect("no context recorded");
    assert_eq!(ta.request.aux_fds.len(), 2);
    drop(ta);
    assert_eq!(probes.open_count(), 0);
}

/// More than four auxiliary descriptors: the first four are forwarded, the
/// rest are closed on arrival.
#[test]
#[parallel(fds)]
fn excess_aux_descriptors_are_closed() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    let (probes, fds) = Probes::new(6);
    manager.open_session(4, &fds);
    drop(fds);
    assert_eq!(launcher.poll_once().unwrap(), None);
    manager.read_response();
    let _channel = manager.read_channel();

    assert_eq!(probes.open_count(), 4);
    let ta = launcher.spawner_mut().spawned.pop().expect("no context recorded");
    assert_eq!(ta.request.aux_fds.len(), 4);
    drop(ta);
    assert_eq!(probes.open_count(), 0);
}

/// A spawn that fails after the transfer is only logged: the manager
/// holds a channel whose far end is already gone.
#[test]
#[parallel(fds)]
fn spawn_failure_leaves_the_manager_with_a_dead_channel() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::failing_spawn(), false);
    let (probes, fds) = Probes::new(1);
    manager.open_session(8, &fds);
    drop(fds);
    assert_eq!(launcher.poll_once().unwrap(), None);

    let response = manager.read_response();
    assert!(!response.is_failure());
    let channel = manager.read_channel();
    let mut buf = [0u8; 1];
    assert_eq!((&channel).read(&mut buf).unwrap(), 0);

    assert_eq!(probes.open_count(), 0);
    assert_eq!(launcher.spawner().attempts, 1);
    assert_eq!(launcher.last_outcome(), Some(HandoffOutcome::SpawnFailed));
    assert_eq!(launcher.stats().failed(), 1);
}

/// If the response cannot be sent, nothing else is attempted.
#[test]
#[parallel(fds)]
fn response_failure_stops_the_handoff() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    let (probes, fds) = Probes::new(2);
    manager.open_session(44, &fds);
    drop(fds);
    manager.stream.shutdown(Shutdown::Read).unwrap();
    assert_eq!(launcher.poll_once().unwrap(), None);

    assert_eq!(launcher.last_outcome(), Some(HandoffOutcome::ResponseFailed));
    assert_eq!(launcher.spawner().attempts, 0);
    assert_eq!(probes.open_count(), 0);
    assert_eq!(launcher.stats().failed(), 1);
}

/// A failed transfer is only logged: the response stands, no compensating
/// message follows, and nothing is spawned.
#[test]
#[parallel(fds)]
fn transfer_failure_is_best_effort() {
    let (manager, params) = util::control_params();
    let mut spawner = RecordingSpawner::new();
    let (probes, fds) = Probes::new(2);
    let request = OpenSessionRequest {
        session_id: 45,
        ta_uuid: Manager::query(45).ta_uuid,
        params: Manager::query(45).params,
        aux_fds: AuxFds::admit(fds),
    };
    let outcome = handoff::open_session_with(&params, &mut spawner, request, |_, _| {
        Err(std::io::Error::from_raw_os_error(nix::libc::ETOOMANYREFS))
    });
    assert_eq!(outcome, HandoffOutcome::TransferFailed);

    let response = manager.read_response();
    assert_eq!(response.session_id, 45);
    assert_eq!(response.pid, own_pid());
    assert!(manager.is_quiet());

    assert_eq!(spawner.attempts, 0);
    assert_eq!(probes.open_count(), 0);
}

/// Junk on the control channel is discarded and the next frame still parses.
#[test]
#[parallel(fds)]
fn unframed_bytes_are_ignored() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    (&manager.stream).write_all(&[0u8; 12]).unwrap();
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert!(manager.is_quiet());
    assert_eq!(launcher.stats().ignored(), 1);

    manager.open_session(2, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert_eq!(manager.read_response().session_id, 2);
}

/// Requests are served one at a time, in the order they arrived.
#[test]
#[parallel(fds)]
fn requests_are_served_in_arrival_order() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    for id in 1..=3 {
        manager.open_session(id, &[]);
    }
    for _ in 1..=3 {
        assert_eq!(launcher.poll_once().unwrap(), None);
    }
    for id in 1..=3 {
        assert_eq!(manager.read_response().session_id, id);
        let _channel = manager.read_channel();
    }
    assert!(manager.is_quiet());
    assert_eq!(launcher.spawner().session_ids(), vec![1, 2, 3]);
}

/// An interrupted wait looks at the signal bits and does nothing else.
#[test]
#[parallel(fds)]
fn interrupted_wait_has_no_side_effects() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    assert_eq!(launcher.dispatch(WaitOutcome::Interrupted).unwrap(), None);
    assert_eq!(launcher.params().signals().resets(), 1);
    assert!(manager.is_quiet());
    assert_eq!(launcher.stats().requests(), 0);
    assert_eq!(launcher.spawner().attempts, 0);
}

#[test]
#[parallel(fds)]
fn terminate_ends_the_loop() {
    let (_manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    launcher.params().signals().raise(PendingSignals::TERM);
    assert_eq!(launcher.poll_once().unwrap(), Some(ExitReason::Terminated));
}

#[test]
#[parallel(fds)]
fn hang_up_is_ignored() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    launcher.params().signals().raise(PendingSignals::HUP);
    assert_eq!(launcher.poll_once().unwrap(), None);

    manager.open_session(12, &[]);
    assert_eq!(launcher.poll_once().unwrap(), None);
    assert_eq!(manager.read_response().session_id, 12);
}

#[test]
#[parallel(fds)]
fn interrupt_ends_a_graceful_run() {
    let (_manager, launcher) = util::launcher(RecordingSpawner::new(), true);
    launcher.params().signals().raise(PendingSignals::INT);
    assert_eq!(launcher.run().unwrap(), ExitReason::Interrupted);
}

/// Losing the manager is fatal.
#[test]
#[parallel(fds)]
fn control_hang_up_is_fatal() {
    let (manager, mut launcher) = util::launcher(RecordingSpawner::new(), false);
    drop(manager);
    assert!(matches!(
        launcher.poll_once(),
        Err(LauncherError::ControlChannelLost(_))
    ));
}
