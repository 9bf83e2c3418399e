//! Child process lifetime management.

use tokio::process::{Child, Command};

/// Kills a child process (and its process group on Unix) on drop.
///
/// Wrap a spawned child immediately after `spawn()` so that a cancelled or timed-out
/// run does not leak it. Call [`disarm`](Self::disarm) once the process has exited.
pub struct ChildGuard {
    child: Child,
    armed: bool,
}

impl ChildGuard {
    #[must_use]
    pub fn new(child: Child) -> Self {
        Self { child, armed: true }
    }

    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Kill the process tree and reap the child.
    pub async fn terminate(&mut self) {
        if let Some(pid) = self.child.id() {
            match try_kill_process_group(pid) {
                Ok(outcome) => tracing::debug!(pid, ?outcome, "Killed process group"),
                Err(e) => {
                    tracing::debug!(pid, "Process group kill failed, killing child: {e}");
                    if let Err(e) = self.child.start_kill() {
                        tracing::debug!(pid, "Child kill failed: {e}");
                    }
                }
            }
        }
        if let Err(e) = self.child.wait().await {
            tracing::warn!("Failed to reap terminated child: {e}");
        }
        self.armed = false;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(pid) = self.child.id()
            && try_kill_process_group(pid).is_err()
        {
            let _ = self.child.start_kill();
        }
        let _ = self.child.try_wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    NotRunning,
    Killed,
}

/// Terminate a process group best-effort.
///
/// Children spawned by [`RunUtil`](crate::RunUtil) lead their own session, so the
/// pid doubles as the process group id.
pub fn try_kill_process_group(pid: u32) -> std::io::Result<KillOutcome> {
    #[cfg(unix)]
    {
        let Ok(pgid) = libc::pid_t::try_from(pid) else {
            return Ok(KillOutcome::NotRunning);
        };
        // SAFETY: killpg has no memory-safety preconditions.
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } == -1 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(KillOutcome::NotRunning);
            }
            return Err(err);
        }
        Ok(KillOutcome::Killed)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "process groups are unix-only",
        ))
    }
}

/// Put the child in its own session so its whole tree can be killed with `killpg`.
#[cfg(unix)]
pub fn set_new_session(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: the closure only calls async-signal-safe libc functions.
    unsafe {
        cmd.as_std_mut().pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            // Linux-only: the child dies with the harness.
            #[cfg(target_os = "linux")]
            if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub fn set_new_session(_cmd: &mut Command) {}
