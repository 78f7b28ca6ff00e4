// SPDX-License-Identifier: MIT

//! Serving one open-session request: create the channel pair, answer the
//! manager, pass it its channel end, and start the TA context with the other.
//!
//! The order is fixed.  The creation response always goes out before the
//! descriptor transfer, and the spawn only happens after both succeeded.
//! A failed transfer is logged and nothing else is sent; the manager only
//! relies on the pid field of the response.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::net::UnixStream;

use nix::unistd::Pid;

use crate::comm::message::{PID_SPAWN_FAILED, TaCreatedResponse};
use crate::comm::{frame, transport};
use crate::runtime::control::ControlParams;
use crate::runtime::decoder::OpenSessionRequest;
use crate::runtime::signal_bridge::SignalSource;
use crate::runtime::spawn::{SpawnContext, TaSpawner};

/// How far the handoff of one request got.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// The TA context was started.
    Spawned(Pid),
    /// The channel pair could not be created; a failure response was attempted.
    ChannelFailed,
    /// The creation response could not be sent in full.
    ResponseFailed,
    /// The response went out but the manager's channel end did not.
    TransferFailed,
    /// Response and transfer succeeded but the context did not start.
    SpawnFailed,
}

/// Serve `request`, then release it through the cleanup path.
pub fn open_session<S, T>(
    params: &ControlParams<S>,
    spawner: &mut T,
    request: OpenSessionRequest,
) -> HandoffOutcome
where
    S: SignalSource,
    T: TaSpawner,
{
    open_session_with(params, spawner, request, transport::send_fd)
}

/// [`open_session`] with the manager's channel end passed on by `transfer`.
pub(crate) fn open_session_with<S, T, X>(
    params: &ControlParams<S>,
    spawner: &mut T,
    request: OpenSessionRequest,
    transfer: X,
) -> HandoffOutcome
where
    S: SignalSource,
    T: TaSpawner,
    X: FnOnce(&UnixStream, BorrowedFd<'_>) -> Result<(), std::io::Error>,
{
    let outcome = hand_off(params, spawner, &request, transfer);
    let session_id = request.session_id;
    let closed = request.release();
    tracing::debug!(session_id, ?outcome, aux_closed = closed, "request finished");
    outcome
}

fn hand_off<S, T, X>(
    params: &ControlParams<S>,
    spawner: &mut T,
    request: &OpenSessionRequest,
    transfer: X,
) -> HandoffOutcome
where
    S: SignalSource,
    T: TaSpawner,
    X: FnOnce(&UnixStream, BorrowedFd<'_>) -> Result<(), std::io::Error>,
{
    let session_id = request.session_id;
    let mut response = TaCreatedResponse { session_id, pid: PID_SPAWN_FAILED };

    let (manager_end, ta_end) = match spawner.channel_pair() {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(session_id, error = %e, "failed to create a socket pair");
            send_failure(params.control(), &response);
            return HandoffOutcome::ChannelFailed;
        }
    };

    // The pid field carries the launcher's own pid; the TA does not exist yet.
    response.pid = nix::unistd::getpid().as_raw();
    if !send_response(params.control(), &response) {
        return HandoffOutcome::ResponseFailed;
    }

    if let Err(e) = transfer(params.control(), manager_end.as_fd()) {
        tracing::error!(session_id, fd = manager_end.as_raw_fd(), error = %e, "failed to send TA socket");
        return HandoffOutcome::TransferFailed;
    }
    drop(manager_end);

    let ctx = SpawnContext {
        channel: ta_end,
        shared: params.shared().clone(),
        request,
    };
    match spawner.spawn(ctx) {
        Ok(pid) => {
            tracing::info!(session_id, pid = pid.as_raw(), "TA context started");
            HandoffOutcome::Spawned(pid)
        }
        Err(e) => {
            tracing::error!(session_id, error = %e, "failed to start TA context");
            HandoffOutcome::SpawnFailed
        }
    }
}

/// Send `response`, reporting whether the whole frame went out.
fn send_response(control: &UnixStream, response: &TaCreatedResponse) -> bool {
    let payload = response.encode();
    let expected = frame::HEADER_LEN + payload.len();
    match transport::send(control, &payload, &[]) {
        Ok(sent) if sent == expected => true,
        Ok(sent) => {
            tracing::error!(session_id = response.session_id, sent, expected, "short response message");
            false
        }
        Err(e) => {
            tracing::error!(session_id = response.session_id, error = %e, "failed to send response message");
            false
        }
    }
}

/// No dedicated error message exists; the sentinel pid reports the failure.
fn send_failure(control: &UnixStream, response: &TaCreatedResponse) {
    let failure = TaCreatedResponse { session_id: response.session_id, pid: PID_SPAWN_FAILED };
    if !send_response(control, &failure) {
        tracing::error!(session_id = response.session_id, "failed to report spawn failure");
    }
}
