//! Process management utilities

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use tracing::debug;

use tether_host_api::{HostError, HostResult};

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ProcessExit {
    fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Child process leading its own process group
pub struct ManagedProcess {
    pub child: Child,
    pub pid: u32,
    pub pgid: u32,
}

impl ManagedProcess {
    /// Spawn `argv` in a new session so the whole group can be signalled
    pub fn spawn(
        argv: &[String],
        env: &HashMap<String, String>,
        cwd: Option<&PathBuf>,
    ) -> HostResult<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(HostError::LaunchFailed("Empty argv".into()));
        };

        let mut cmd = Command::new(program);
        cmd.args(args);

        // Inherit the session environment, then apply per-app overrides
        for (k, v) in env {
            cmd.env(k, v);
        }

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        // SAFETY: setsid is async-signal-safe
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::other)?;
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| HostError::LaunchFailed(format!("Failed to spawn {}: {}", program, e)))?;

        let pid = child.id();
        // After setsid, pid == pgid
        let pgid = pid;

        debug!(pid, pgid, program = %program, "Process spawned");

        Ok(Self { child, pid, pgid })
    }

    /// Signal the whole process group
    pub fn signal_group(&self, sig: Signal) -> HostResult<()> {
        let pgid = Pid::from_raw(-(self.pgid as i32));

        match signal::kill(pgid, sig) {
            Ok(()) => {
                debug!(pgid = self.pgid, signal = ?sig, "Signalled process group");
                Ok(())
            }
            // already gone
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(HostError::StopFailed(format!("Failed to send {}: {}", sig, e))),
        }
    }

    pub fn terminate(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGTERM)
    }

    pub fn kill(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGKILL)
    }

    pub fn freeze(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGSTOP)
    }

    pub fn thaw(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGCONT)
    }

    /// Non-blocking exit check
    pub fn try_wait(&mut self) -> HostResult<Option<ProcessExit>> {
        match self.child.try_wait() {
            Ok(status) => Ok(status.map(ProcessExit::from_status)),
            Err(e) => Err(HostError::Internal(format!("Wait failed: {}", e))),
        }
    }

    pub fn wait(&mut self) -> HostResult<ProcessExit> {
        self.child
            .wait()
            .map(ProcessExit::from_status)
            .map_err(|e| HostError::Internal(format!("Wait failed: {}", e)))
    }

    /// Whether `pid` is this process or a member of its group
    pub fn owns(&self, pid: u32) -> bool {
        if pid == self.pid {
            return true;
        }
        nix::unistd::getpgid(Some(Pid::from_raw(pid as i32)))
            .is_ok_and(|pgid| pgid.as_raw() as u32 == self.pgid)
    }
}

/// Send SIGTERM to a process we did not spawn, and to its group when it
/// leads one
pub fn terminate_pid(pid: u32) -> HostResult<()> {
    let target = Pid::from_raw(pid as i32);
    if nix::unistd::getpgid(Some(target)).is_ok_and(|pgid| pgid == target) {
        match signal::kill(Pid::from_raw(-(pid as i32)), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pgid = pid, "Signalled process group");
                return Ok(());
            }
            Err(e) => debug!(pgid = pid, error = %e, "Group signal failed, trying the process"),
        }
    }

    match signal::kill(target, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => Err(HostError::NoSuchProcess(pid)),
        Err(nix::errno::Errno::EPERM) => Err(HostError::PermissionDenied(format!(
            "Not allowed to signal {}",
            pid
        ))),
        Err(e) => Err(HostError::StopFailed(format!("Failed to send SIGTERM: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn spawn_simple_process() {
        let mut proc = ManagedProcess::spawn(&["true".to_string()], &HashMap::new(), None).unwrap();
        assert!(proc.wait().unwrap().is_success());
    }

    #[test]
    fn failing_process_reports_code() {
        let mut proc =
            ManagedProcess::spawn(&["false".to_string()], &HashMap::new(), None).unwrap();
        let exit = proc.wait().unwrap();
        assert!(!exit.is_success());
        assert_eq!(exit.code, Some(1));
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(ManagedProcess::spawn(&[], &HashMap::new(), None).is_err());
    }

    #[test]
    fn terminate_sleeping_process() {
        let argv = vec!["sleep".to_string(), "60".to_string()];
        let mut proc = ManagedProcess::spawn(&argv, &HashMap::new(), None).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert!(proc.owns(proc.pid));
        proc.terminate().unwrap();

        let exit = proc.wait().unwrap();
        assert_eq!(exit.signal, Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn terminate_pid_reaches_group_leader() {
        let argv = vec!["sleep".to_string(), "60".to_string()];
        let mut proc = ManagedProcess::spawn(&argv, &HashMap::new(), None).unwrap();
        std::thread::sleep(Duration::from_millis(50));

        terminate_pid(proc.pid).unwrap();
        let exit = proc.wait().unwrap();
        assert_eq!(exit.signal, Some(Signal::SIGTERM as i32));
    }

    #[test]
    fn frozen_process_can_be_thawed() {
        let argv = vec!["sleep".to_string(), "60".to_string()];
        let mut proc = ManagedProcess::spawn(&argv, &HashMap::new(), None).unwrap();

        proc.freeze().unwrap();
        proc.thaw().unwrap();
        assert_eq!(proc.try_wait().unwrap(), None);

        proc.kill().unwrap();
        proc.wait().unwrap();
    }
}
