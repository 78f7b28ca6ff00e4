// SPDX-License-Identifier: MIT

//! Control parameters owned by the dispatch loop.

use std::ffi::OsString;
use std::os::unix::net::UnixStream;

use crate::logging::LogConfig;
use crate::runtime::signal_bridge::SignalSource;

pub const ENV_LAUNCHER_PID: &str = "TEE_LAUNCHER_PID";
pub const ENV_LOG_FILTER: &str = "TEE_LOG_FILTER";
pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Parameters every new TA context receives a private copy of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedParams {
    pub launcher_pid: i32,
    pub log: LogConfig,
}

impl SharedParams {
    pub fn new(launcher_pid: i32, log: LogConfig) -> Self {
        SharedParams { launcher_pid, log }
    }

    /// The variables that carry these parameters into a new process.
    pub fn to_env(&self) -> Vec<(OsString, OsString)> {
        let mut env = vec![
            (ENV_LAUNCHER_PID.into(), self.launcher_pid.to_string().into()),
            (ENV_LOG_FILTER.into(), self.log.filter.clone().into()),
        ];
        if self.log.json {
            env.push((ENV_LOG_FORMAT.into(), "json".into()));
        }
        env
    }

    /// Rebuild the parameters inside a TA host process.
    pub fn from_lookup<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let launcher_pid = lookup(ENV_LAUNCHER_PID)?.parse().ok()?;
        let filter = lookup(ENV_LOG_FILTER).unwrap_or_else(|| "info".to_string());
        let json = lookup(ENV_LOG_FORMAT).as_deref() == Some("json");
        Some(SharedParams { launcher_pid, log: LogConfig { filter, json } })
    }
}

/// The launcher's process-wide state: the manager channel, the signal
/// bridge, the parameters shared with new contexts, and an optional
/// cleanup hook run on graceful exit.
pub struct ControlParams<S: SignalSource> {
    control: UnixStream,
    signals: S,
    shared: SharedParams,
    cleanup: Option<Box<dyn FnOnce()>>,
}

impl<S: SignalSource> ControlParams<S> {
    pub fn new(control: UnixStream, signals: S, shared: SharedParams) -> Self {
        ControlParams { control, signals, shared, cleanup: None }
    }

    pub fn control(&self) -> &UnixStream {
        &self.control
    }

    pub fn signals(&self) -> &S {
        &self.signals
    }

    pub fn shared(&self) -> &SharedParams {
        &self.shared
    }

    /// Register the hook to run on graceful termination, replacing any earlier one.
    pub fn register_cleanup(&mut self, hook: Box<dyn FnOnce()>) {
        self.cleanup = Some(hook);
    }

    /// Run the registered hook, if any.  It runs at most once.
    pub fn run_cleanup(&mut self) -> bool {
        match self.cleanup.take() {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }
}
