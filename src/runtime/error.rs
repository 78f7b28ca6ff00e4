//! Common error type.
//!

use std::ffi::NulError;

#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),

    #[error("launcher setup failed: {0}")]
    Setup(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("control channel lost: {0}")]
    ControlChannelLost(String),

    #[error("signal bridge failure: {0}")]
    SignalBridge(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),
}

/// Failures while starting a new TA context.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("failed to start process: {0}")]
    Process(#[from] nix::Error),

    #[error("failed to deliver handoff: {0}")]
    Handoff(#[from] std::io::Error),

    #[error("invalid spawn argument: {0}")]
    Argument(String),
}

impl From<which::Error> for LauncherError {
    fn from(e: which::Error) -> Self {
        LauncherError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, e))
    }
}

impl From<NulError> for LauncherError {
    fn from(e: NulError) -> Self {
        LauncherError::Io(std::io::Error::new(std::io::ErrorKind::InvalidFilename, e))
    }
}

impl From<NulError> for SpawnError {
    fn from(e: NulError) -> Self {
        SpawnError::Argument(e.to_string())
    }
}

impl From<LauncherError> for std::io::Error {
    fn from(e: LauncherError) -> Self {
        match e {
            LauncherError::Io(e) => e,
            LauncherError::Sys(e) => e.into(),
            LauncherError::Setup(e) => std::io::Error::other(e),
            LauncherError::Config(e) => std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            LauncherError::ControlChannelLost(e) => {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, e)
            }
            LauncherError::SignalBridge(e) => std::io::Error::other(e),
            LauncherError::Protocol(e) => std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            LauncherError::Spawn(e) => std::io::Error::other(e),
        }
    }
}
