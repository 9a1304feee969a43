//! Asynchronous environment setup in a helper process.
//!
//! A supervising process must not contaminate its own mount namespace, so
//! it forks a helper over a socketpair: the child creates the namespace,
//! runs assembly, opens `/proc/self/ns/mnt` and sends the fd back via
//! SCM_RIGHTS, then exits. The parent associates the received fd with the
//! environment. At most one setup may be pending per environment; a
//! second request while one is in flight is a protocol error.

use std::collections::HashMap;
use std::io::IoSlice;
use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use burrow_common::{BurrowError, BurrowResult, ChildStatus};
use nix::sys::socket::{
    recvmsg, sendmsg, socketpair, AddressFamily, ControlMessage, ControlMessageOwned, MsgFlags,
    SockFlag, SockType,
};
use nix::unistd::{fork, ForkResult, Pid};

/// One in-flight helper.
#[derive(Debug)]
pub struct PendingSetup {
    /// The helper process.
    pub pid: Pid,
    /// Our end of the socketpair; the namespace fd arrives here.
    pub socket: OwnedFd,
}

/// Table of in-flight setups, keyed by environment name.
#[derive(Debug, Default)]
pub struct SetupSupervisor {
    pending: HashMap<String, PendingSetup>,
}

impl SetupSupervisor {
    /// An empty supervisor.
    #[must_use]
    pub fn new() -> Self {
        SetupSupervisor::default()
    }

    /// Is a setup in flight for this environment?
    #[must_use]
    pub fn is_pending(&self, env_name: &str) -> bool {
        self.pending.contains_key(env_name)
    }

    /// Fork a helper that runs `setup` and sends back its mount-namespace
    /// fd. In the parent, records the pending entry; the child never
    /// returns.
    pub fn begin(
        &mut self,
        env_name: &str,
        setup: impl FnOnce() -> BurrowResult<()>,
    ) -> BurrowResult<&PendingSetup> {
        if self.is_pending(env_name) {
            return Err(BurrowError::Internal {
                message: format!("Async setup for environment {env_name} already in progress"),
            });
        }

        let (parent_fd, child_fd) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .map_err(|err| BurrowError::Internal {
            message: format!("socketpair failed: {err}"),
        })?;

        // Safety: the child only runs async-signal-safe work plus the
        // setup closure, then exits without returning.
        match unsafe { fork() }.map_err(|err| BurrowError::Internal {
            message: format!("fork failed: {err}"),
        })? {
            ForkResult::Parent { child } => {
                drop(child_fd);
                tracing::debug!(environment = env_name, pid = %child, "Started setup helper");
                let entry = PendingSetup {
                    pid: child,
                    socket: parent_fd,
                };
                Ok(self.pending.entry(env_name.to_string()).or_insert(entry))
            }
            ForkResult::Child => {
                drop(parent_fd);
                let code = match run_helper(child_fd, setup) {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(environment = env_name, error = %err, "Setup helper failed");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    /// Receive the namespace fd for a pending environment. Blocks until
    /// the helper sends it or closes the socket.
    pub fn receive_fd(&mut self, env_name: &str) -> BurrowResult<OwnedFd> {
        let entry = self
            .pending
            .get(env_name)
            .ok_or_else(|| BurrowError::Internal {
                message: format!("No pending setup for environment {env_name}"),
            })?;

        let mut data = [0u8; 1];
        let mut iov = [IoSliceMut::new(&mut data)];
        let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);

        let msg = recvmsg::<()>(
            entry.socket.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg_buffer),
            MsgFlags::empty(),
        )
        .map_err(|err| BurrowError::Internal {
            message: format!("recvmsg failed: {err}"),
        })?;

        for cmsg in msg.cmsgs().map_err(|err| BurrowError::Internal {
            message: format!("control message decode failed: {err}"),
        })? {
            if let ControlMessageOwned::ScmRights(fds) = cmsg {
                if let Some(&fd) = fds.first() {
                    // Safety: the fd was just passed to us and is ours.
                    return Ok(unsafe { OwnedFd::from_raw_fd(fd) });
                }
            }
        }

        Err(BurrowError::Internal {
            message: format!("missing file descriptor from setup helper for {env_name}"),
        })
    }

    /// A helper exited; drop its pending entry and report the environment
    /// it belonged to. Returns `None` for unrelated children.
    pub fn complete(&mut self, pid: Pid, status: ChildStatus) -> Option<(String, bool)> {
        let env_name = self
            .pending
            .iter()
            .find(|(_, entry)| entry.pid == pid)
            .map(|(name, _)| name.clone())?;

        self.pending.remove(&env_name);

        let ok = status.success();
        if ok {
            tracing::debug!(environment = env_name, "Setup helper complete");
        } else {
            tracing::error!(environment = env_name, %status, "Setup helper failed");
        }
        Some((env_name, ok))
    }

    #[cfg(test)]
    fn insert_fake(&mut self, env_name: &str, pid: Pid, socket: OwnedFd) {
        self.pending.insert(
            env_name.to_string(),
            PendingSetup { pid, socket },
        );
    }
}

/// Child side: assemble, then hand the namespace fd to the parent.
fn run_helper(socket: OwnedFd, setup: impl FnOnce() -> BurrowResult<()>) -> BurrowResult<()> {
    setup()?;

    let nsfd = std::fs::File::open("/proc/self/ns/mnt")?;

    let data = [0u8; 1];
    let iov = [IoSlice::new(&data)];
    let fds = [nsfd.as_raw_fd()];
    let cmsg = [ControlMessage::ScmRights(&fds)];

    sendmsg::<()>(
        socket.as_raw_fd(),
        &iov,
        &cmsg,
        MsgFlags::empty(),
        None,
    )
    .map_err(|err| BurrowError::Internal {
        message: format!("unable to send namespace fd to parent: {err}"),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_socket() -> OwnedFd {
        let (a, _b) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .unwrap();
        a
    }

    #[test]
    fn duplicate_setup_rejected() {
        let mut supervisor = SetupSupervisor::new();
        supervisor.insert_fake("env", Pid::from_raw(4242), dummy_socket());

        assert!(supervisor.is_pending("env"));
        let err = supervisor.begin("env", || Ok(())).unwrap_err();
        assert!(err.to_string().contains("already in progress"));
    }

    #[test]
    fn complete_reaps_by_pid() {
        let mut supervisor = SetupSupervisor::new();
        supervisor.insert_fake("env", Pid::from_raw(4242), dummy_socket());

        assert_eq!(
            supervisor.complete(Pid::from_raw(9), ChildStatus::Exited(0)),
            None
        );
        let (name, ok) = supervisor
            .complete(Pid::from_raw(4242), ChildStatus::Exited(0))
            .unwrap();
        assert_eq!(name, "env");
        assert!(ok);
        assert!(!supervisor.is_pending("env"));
    }
}
