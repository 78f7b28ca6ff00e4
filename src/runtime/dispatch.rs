// SPDX-License-Identifier: MIT

//! The launcher's dispatch loop.
//!
//! One thread waits on two descriptors: the manager's control channel and
//! the signal bridge.  Signals are unblocked only while waiting, so they can
//! interrupt an idle wait but never a request in progress.  Requests are
//! served one at a time, in arrival order.

use std::cell::Cell;
use std::rc::Rc;

use nix::sys::epoll::{EpollEvent, EpollFlags};
use nix::sys::signal::{SigSet, SigmaskHow, pthread_sigmask};

use crate::runtime::control::ControlParams;
use crate::runtime::decoder::{self, Decoded};
use crate::runtime::error::LauncherError;
use crate::runtime::event::{self, EventSet, MAX_CURRENT_EVENTS, WaitOutcome};
use crate::runtime::handoff::{self, HandoffOutcome};
use crate::runtime::signal_bridge::{PendingSignals, SignalSource};
use crate::runtime::spawn::TaSpawner;

/// Why the loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    Terminated,
    Interrupted,
}

/// Counters kept across the lifetime of the loop.
#[derive(Debug, Default)]
pub struct LoopStats {
    requests: Cell<u64>,
    spawned: Cell<u64>,
    failed: Cell<u64>,
    ignored: Cell<u64>,
    violations: Cell<u64>,
    transient: Cell<u64>,
}

impl LoopStats {
    /// Requests that reached the spawner, whatever the outcome.
    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.get()
    }

    pub fn failed(&self) -> u64 {
        self.failed.get()
    }

    /// Frames dropped by the transport.
    pub fn ignored(&self) -> u64 {
        self.ignored.get()
    }

    pub fn violations(&self) -> u64 {
        self.violations.get()
    }

    pub fn transient(&self) -> u64 {
        self.transient.get()
    }

    fn bump(counter: &Cell<u64>) {
        counter.set(counter.get() + 1);
    }

    fn record(&self, outcome: HandoffOutcome) {
        Self::bump(&self.requests);
        match outcome {
            HandoffOutcome::Spawned(_) => Self::bump(&self.spawned),
            _ => Self::bump(&self.failed),
        }
    }

    fn log_summary(&self) {
        tracing::info!(
            requests = self.requests.get(),
            spawned = self.spawned.get(),
            failed = self.failed.get(),
            ignored = self.ignored.get(),
            violations = self.violations.get(),
            transient = self.transient.get(),
            "launcher shutting down"
        );
    }
}

pub struct Launcher<S: SignalSource, T: TaSpawner> {
    params: ControlParams<S>,
    spawner: T,
    events: EventSet,
    buffer: [EpollEvent; MAX_CURRENT_EVENTS],
    idle_mask: SigSet,
    busy_mask: SigSet,
    signal_token: u64,
    stats: Rc<LoopStats>,
    last_outcome: Option<HandoffOutcome>,
}

impl<S: SignalSource, T: TaSpawner> Launcher<S, T> {
    /// Set up the event set.  Any failure here is fatal for the process.
    pub fn new(
        mut params: ControlParams<S>,
        spawner: T,
        graceful_termination: bool,
    ) -> Result<Self, LauncherError> {
        let idle_mask = SigSet::empty();
        let busy_mask = SigSet::all();

        let events = EventSet::new()
            .map_err(|e| LauncherError::Setup(format!("epoll init failure: {e}")))?;
        events
            .register(params.control(), EpollFlags::EPOLLIN | EpollFlags::EPOLLRDHUP)
            .map_err(|e| LauncherError::Setup(format!("failed to register manager socket: {e}")))?;
        events
            .register(params.signals().as_fd(), EpollFlags::EPOLLIN)
            .map_err(|e| LauncherError::Setup(format!("failed to register signal bridge: {e}")))?;
        let signal_token = event::token(&params.signals().as_fd());

        let stats = Rc::new(LoopStats::default());
        if graceful_termination {
            let summary = stats.clone();
            params.register_cleanup(Box::new(move || summary.log_summary()));
        }

        tracing::info!("entering the launcher main loop");
        Ok(Launcher {
            params,
            spawner,
            events,
            buffer: [EpollEvent::empty(); MAX_CURRENT_EVENTS],
            idle_mask,
            busy_mask,
            signal_token,
            stats,
            last_outcome: None,
        })
    }

    /// Serve requests until a terminating signal arrives or the control
    /// channel is lost.
    pub fn run(mut self) -> Result<ExitReason, LauncherError> {
        loop {
            if let Some(reason) = self.poll_once()? {
                self.params.run_cleanup();
                return Ok(reason);
            }
        }
    }

    /// One loop iteration: wait with signals open, then handle the ready
    /// events with every signal blocked.
    pub fn poll_once(&mut self) -> Result<Option<ExitReason>, LauncherError> {
        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.idle_mask), None) {
            tracing::error!(error = %e, "problem with signal mask setting");
            return Ok(None);
        }

        let waited = self.events.wait(&mut self.buffer);

        if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.busy_mask), None) {
            tracing::error!(error = %e, "problem with signal mask setting");
            return Ok(None);
        }

        match waited {
            Ok(outcome) => self.dispatch(outcome),
            Err(e) => {
                // Nothing to recover; the next wait gets another chance.
                tracing::error!(error = %e, "failed return from epoll_wait");
                Ok(None)
            }
        }
    }

    pub(crate) fn dispatch(&mut self, outcome: WaitOutcome) -> Result<Option<ExitReason>, LauncherError> {
        let count = match outcome {
            WaitOutcome::Interrupted => return Ok(self.check_signals()),
            WaitOutcome::Ready(count) => count,
        };

        for i in 0..count {
            let ready = self.buffer[i];
            if ready.data() == self.signal_token {
                if ready.events().contains(EpollFlags::EPOLLERR) {
                    return Err(LauncherError::SignalBridge("error condition on self pipe".to_string()));
                }
                if let Some(reason) = self.check_signals() {
                    return Ok(Some(reason));
                }
                continue;
            }

            // Only two descriptors are registered; this one is the manager's.
            if ready
                .events()
                .intersects(EpollFlags::EPOLLERR | EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP)
            {
                tracing::error!(events = ?ready.events(), "manager socket error");
                return Err(LauncherError::ControlChannelLost(format!(
                    "manager socket reported {:?}",
                    ready.events()
                )));
            }
            self.serve_control();
        }
        Ok(None)
    }

    fn serve_control(&mut self) {
        match decoder::receive_request(self.params.control()) {
            Decoded::Transient(e) => {
                LoopStats::bump(&self.stats.transient);
                tracing::warn!(error = %e, "failed to receive from manager");
            }
            Decoded::Ignored => {
                LoopStats::bump(&self.stats.ignored);
                tracing::debug!("ignoring discarded message");
            }
            Decoded::Violation { header, released } => {
                LoopStats::bump(&self.stats.violations);
                tracing::debug!(?header, released, "protocol violation cleaned up");
            }
            Decoded::Request(request) => {
                tracing::debug!(
                    session_id = request.session_id,
                    aux_fds = request.aux_fds.len(),
                    "open session request"
                );
                let outcome = handoff::open_session(&self.params, &mut self.spawner, request);
                self.stats.record(outcome);
                self.last_outcome = Some(outcome);
            }
        }
    }

    fn check_signals(&self) -> Option<ExitReason> {
        let pending = self.params.signals().reset();
        if pending.contains(PendingSignals::TERM) {
            tracing::info!("terminate signal received");
            return Some(ExitReason::Terminated);
        }
        if pending.contains(PendingSignals::HUP) {
            // Reserved.
            tracing::debug!("hang-up signal ignored");
        }
        if pending.contains(PendingSignals::INT) {
            tracing::info!("interrupt signal received");
            return Some(ExitReason::Interrupted);
        }
        None
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Outcome of the most recent request that reached the spawner.
    pub fn last_outcome(&self) -> Option<HandoffOutcome> {
        self.last_outcome
    }

    pub(crate) fn params(&self) -> &ControlParams<S> {
        &self.params
    }

    pub(crate) fn spawner(&self) -> &T {
        &self.spawner
    }

    pub(crate) fn spawner_mut(&mut self) -> &mut T {
        &mut self.spawner
    }
}
