// SPDX-License-Identifier: MIT

//! Launcher configuration, read from the environment the manager starts us with.

use std::ffi::OsString;
use std::os::fd::RawFd;
use std::path::PathBuf;

use crate::logging::LogConfig;
use crate::runtime::error::LauncherError;
use crate::runtime::spawn::LaunchEnv;

pub const ENV_CONTROL_FD: &str = "TEE_LAUNCHER_CONTROL_FD";
pub const ENV_TA_HOST: &str = "TEE_LAUNCHER_TA_HOST";
pub const ENV_TA_ARGS: &str = "TEE_LAUNCHER_TA_ARGS";
pub const ENV_REPARENT: &str = "TEE_LAUNCHER_REPARENT";
pub const ENV_GRACEFUL: &str = "TEE_LAUNCHER_GRACEFUL";

const DEFAULT_CONTROL_FD: RawFd = 3;
const DEFAULT_TA_HOST: &str = "tee-ta-host";

#[derive(Debug, Clone)]
pub struct LauncherConfig {
    /// Descriptor number of the manager's control socket, inherited at startup.
    pub control_fd: RawFd,
    /// How TA host processes are started.
    pub launch: LaunchEnv,
    /// Run the loop's cleanup hook before a signal-initiated exit.
    pub graceful_termination: bool,
    pub log: LogConfig,
}

impl LauncherConfig {
    pub fn from_env() -> Result<Self, LauncherError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, LauncherError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let control_fd = match lookup(ENV_CONTROL_FD) {
            None => DEFAULT_CONTROL_FD,
            Some(v) => v.trim().parse::<RawFd>().map_err(|e| {
                LauncherError::Config(format!("{ENV_CONTROL_FD}={v}: {e}"))
            })?,
        };
        if control_fd < 3 {
            return Err(LauncherError::Config(format!(
                "{ENV_CONTROL_FD} must not be a standard stream, got {control_fd}"
            )));
        }

        let cmd = lookup(ENV_TA_HOST)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TA_HOST.to_string());
        let args = lookup(ENV_TA_ARGS)
            .map(|v| v.split_whitespace().map(OsString::from).collect())
            .unwrap_or_default();

        Ok(LauncherConfig {
            control_fd,
            launch: LaunchEnv {
                cmd: PathBuf::from(cmd),
                args,
                reparent: flag(&lookup, ENV_REPARENT, true)?,
            },
            graceful_termination: flag(&lookup, ENV_GRACEFUL, false)?,
            log: LogConfig::from_lookup(&lookup),
        })
    }
}

fn flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, LauncherError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(LauncherError::Config(format!("{key}={v}: expected a boolean"))),
        },
    }
}
