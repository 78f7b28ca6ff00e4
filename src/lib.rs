//! # tee-launcher
//!
//! Starts trusted-application contexts on behalf of a TEE manager.
//!
//! The manager talks to the launcher over one control socket.  For each
//! open-session request the launcher creates a socket pair, passes one end
//! back to the manager, and starts a TA host process holding the other.

#[cfg(not(target_os = "linux"))]
compile_error!("tee-launcher only supports Linux");

pub mod comm;
pub mod config;
pub mod logging;
pub mod runtime;
pub mod ta;


pub use config::LauncherConfig;
pub use runtime::{ExitReason, LauncherError, run_launcher};
