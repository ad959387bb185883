//! System wakelock backends

use std::collections::HashMap;
use tether_host_api::{HostError, HostResult, SystemWakelock, WakelockProvider};
use tracing::{debug, info, warn};

use crate::process::ManagedProcess;

/// Holds the wakelock by keeping an inhibitor process alive, e.g.
/// `systemd-inhibit ... sleep infinity`.
#[derive(Debug, Clone)]
pub struct InhibitWakelockProvider {
    command: Vec<String>,
}

impl InhibitWakelockProvider {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

struct InhibitLock {
    process: ManagedProcess,
}

impl std::fmt::Debug for InhibitLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InhibitLock")
            .field("pid", &self.process.pid)
            .finish()
    }
}

impl SystemWakelock for InhibitLock {
    fn release(self: Box<Self>) {
        let mut process = self.process;
        info!(pid = process.pid, "Releasing system wakelock");

        if let Err(e) = process.terminate() {
            warn!(pid = process.pid, error = %e, "Failed to stop inhibitor");
            return;
        }
        // reap off the lifecycle thread
        std::thread::spawn(move || match process.wait() {
            Ok(exit) => debug!(exit = ?exit, "Inhibitor exited"),
            Err(e) => warn!(error = %e, "Failed to reap inhibitor"),
        });
    }
}

impl WakelockProvider for InhibitWakelockProvider {
    fn acquire(&self) -> HostResult<Box<dyn SystemWakelock>> {
        let mut process = ManagedProcess::spawn(&self.command, &HashMap::new(), None)
            .map_err(|e| HostError::WakelockUnavailable(e.to_string()))?;

        // an inhibitor that exits at once did not take the lock
        std::thread::sleep(std::time::Duration::from_millis(50));
        if let Some(exit) = process.try_wait()? {
            return Err(HostError::WakelockUnavailable(format!(
                "{} exited immediately ({:?})",
                self.command.join(" "),
                exit
            )));
        }

        info!(pid = process.pid, "System wakelock acquired");
        Ok(Box::new(InhibitLock { process }))
    }
}

/// Used when the wakelock is disabled in configuration
#[derive(Debug, Clone, Default)]
pub struct NoopWakelockProvider;

#[derive(Debug)]
struct NoopLock;

impl SystemWakelock for NoopLock {
    fn release(self: Box<Self>) {}
}

impl WakelockProvider for NoopWakelockProvider {
    fn acquire(&self) -> HostResult<Box<dyn SystemWakelock>> {
        debug!("Wakelock disabled, not inhibiting sleep");
        Ok(Box::new(NoopLock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleeper() -> InhibitWakelockProvider {
        InhibitWakelockProvider::new(vec!["sleep".into(), "60".into()])
    }

    #[test]
    fn acquire_and_release() {
        let lock = sleeper().acquire().unwrap();
        lock.release();
    }

    #[test]
    fn inhibitor_exiting_immediately_fails() {
        let provider = InhibitWakelockProvider::new(vec!["true".into()]);
        assert!(matches!(
            provider.acquire(),
            Err(HostError::WakelockUnavailable(_))
        ));
    }

    #[test]
    fn missing_binary_fails() {
        let provider = InhibitWakelockProvider::new(vec!["/nonexistent/inhibit".into()]);
        assert!(provider.acquire().is_err());
    }

    #[test]
    fn noop_provider() {
        NoopWakelockProvider.acquire().unwrap().release();
    }
}
