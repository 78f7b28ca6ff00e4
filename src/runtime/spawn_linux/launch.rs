// SPDX-License-Identifier: MIT

//! Launch a TA host process.

use std::ffi::{CString, OsString};
use std::os::unix::ffi::OsStrExt as _;
use std::os::unix::net::UnixStream;

use nix::libc;
use nix::sched::{CloneFlags, clone};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use nix::unistd::Pid;

use crate::runtime::control::SharedParams;
use crate::runtime::error::{LauncherError, SpawnError};
use crate::runtime::spawn::{LaunchEnv, SpawnContext, TaSpawner, deliver_handoff};
use crate::runtime::spawn_linux::fd::BootstrapFd;

/// Exit status of a child whose execve failed.
pub const EXIT_EXEC_FAILED: i32 = 254;

/// Stack for the cloned child.  It only runs until execve.
const CHILD_STACK_SIZE: usize = 64 * 1024;

/// Starts one TA host process per request.
///
/// The host starts from its entry point: a fresh process image, a clean
/// signal state, and only the bootstrap socket beyond the standard streams.
/// Everything it needs arrives over that socket as a handoff frame.
pub struct ProcessSpawner {
    exec_path: CString,
    argv: Vec<CString>,
    reparent: bool,
    stack: Vec<u8>,
}

impl ProcessSpawner {
    /// Resolve the host command and prepare its argument vector.
    pub fn new(env: &LaunchEnv) -> Result<Self, LauncherError> {
        let exec_path = which::which(&env.cmd)?;
        let name = exec_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| exec_path.as_os_str().to_os_string());
        let mut argv = vec![CString::new(name.as_bytes())?];
        for arg in &env.args {
            argv.push(CString::new(arg.as_bytes())?);
        }
        tracing::debug!(path = %exec_path.display(), reparent = env.reparent, "TA host resolved");
        Ok(ProcessSpawner {
            exec_path: CString::new(exec_path.as_os_str().as_bytes())?,
            argv,
            reparent: env.reparent,
            stack: vec![0u8; CHILD_STACK_SIZE],
        })
    }

    /// The launcher's environment, with the shared parameters layered on top.
    fn environ(shared: &SharedParams) -> Result<Vec<CString>, SpawnError> {
        let overrides = shared.to_env();
        let inherited = std::env::vars_os().filter(|(key, _)| !overrides.iter().any(|(k, _)| k == key));
        let mut environ = Vec::new();
        for (key, val) in inherited.chain(overrides.iter().cloned()) {
            let mut entry: OsString = key;
            entry.push("=");
            entry.push(val);
            environ.push(CString::new(entry.as_bytes())?);
        }
        Ok(environ)
    }
}

impl TaSpawner for ProcessSpawner {
    fn spawn(&mut self, ctx: SpawnContext<'_>) -> Result<Pid, SpawnError> {
        let environ = Self::environ(&ctx.shared)?;
        let (parent_end, child_end) =
            socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC)?;
        let bootstrap = BootstrapFd::new(child_end);

        let flags = if self.reparent { CloneFlags::CLONE_PARENT } else { CloneFlags::empty() };
        let exec_path = self.exec_path.as_c_str();
        let argv = self.argv.as_slice();
        let environ = environ.as_slice();

        // The child gets a copy of the address space, as with fork.  Until
        // execve it only touches data prepared above.
        let pid = unsafe {
            clone(
                Box::new(|| -> isize {
                    bootstrap.child_after_clone();
                    let _ = nix::unistd::execve(exec_path, argv, environ);
                    libc::_exit(EXIT_EXEC_FAILED)
                }),
                &mut self.stack,
                flags,
                Some(libc::SIGCHLD),
            )
        }?;

        drop(bootstrap);
        deliver_handoff(&UnixStream::from(parent_end), ctx)?;
        Ok(pid)
    }
}
