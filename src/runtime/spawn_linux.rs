// SPDX-License-Identifier: MIT

//! Spawns TA host processes.
//! Specific to Linux.  Uses clone(2) so a host can be parented to the manager.

mod fd;
mod launch;

pub use fd::EXIT_FD_SETUP;
pub use launch::{EXIT_EXEC_FAILED, ProcessSpawner};
