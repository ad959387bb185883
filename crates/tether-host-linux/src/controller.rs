//! Linux process controller

use nix::sys::signal::Signal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tether_host_api::{
    AppDescriptor, HostError, HostResult, ProcessController, ProcessEvent,
};
use tether_util::{AppId, MonotonicInstant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::process::{terminate_pid, ManagedProcess, ProcessExit};

/// Poll period of the exit monitor
const MONITOR_INTERVAL: Duration = Duration::from_millis(100);

struct Tracked {
    process: ManagedProcess,
    started: MonotonicInstant,
    /// We asked it to stop, so any exit counts as a clean stop
    stopping: bool,
}

type ProcessTable = Arc<Mutex<HashMap<AppId, Tracked>>>;

fn lock(table: &ProcessTable) -> MutexGuard<'_, HashMap<AppId, Tracked>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Launches catalog applications as process-group leaders and reports
/// their exits.
pub struct LinuxProcessController {
    catalog: HashMap<AppId, AppDescriptor>,
    processes: ProcessTable,
    startup_grace: Duration,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ProcessEvent>>>>,
}

impl LinuxProcessController {
    pub fn new(applications: Vec<AppDescriptor>, startup_grace: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            catalog: applications
                .into_iter()
                .map(|a| (a.app_id.clone(), a))
                .collect(),
            processes: Arc::new(Mutex::new(HashMap::new())),
            startup_grace,
            event_tx: tx,
            event_rx: Arc::new(Mutex::new(Some(rx))),
        }
    }

    /// Start the background exit monitor
    pub fn start_monitor(&self) -> tokio::task::JoinHandle<()> {
        let processes = self.processes.clone();
        let event_tx = self.event_tx.clone();
        let grace = self.startup_grace;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MONITOR_INTERVAL);
            loop {
                ticker.tick().await;
                for event in reap_exited(&processes, grace) {
                    if event_tx.send(event).is_err() {
                        debug!("Process event receiver gone, stopping monitor");
                        return;
                    }
                }
            }
        })
    }

    #[cfg(test)]
    fn pid_of(&self, app_id: &AppId) -> Option<u32> {
        lock(&self.processes).get(app_id).map(|t| t.process.pid)
    }

    fn signal(&self, app_id: &AppId, what: &str, f: impl FnOnce(&ManagedProcess) -> HostResult<()>) {
        match lock(&self.processes).get(app_id) {
            Some(tracked) => {
                if let Err(e) = f(&tracked.process) {
                    warn!(app_id = %app_id, error = %e, "Failed to {} process", what);
                }
            }
            None => debug!(app_id = %app_id, "No process to {}", what),
        }
    }
}

/// Collect exited children and translate them into process events
fn reap_exited(processes: &ProcessTable, grace: Duration) -> Vec<ProcessEvent> {
    let mut exited = Vec::new();
    {
        let mut procs = lock(processes);
        for (app_id, tracked) in procs.iter_mut() {
            match tracked.process.try_wait() {
                Ok(Some(exit)) => exited.push((app_id.clone(), exit)),
                Ok(None) => {}
                Err(e) => warn!(app_id = %app_id, error = %e, "Error checking process status"),
            }
        }

        exited
            .into_iter()
            .filter_map(|(app_id, exit)| {
                let tracked = procs.remove(&app_id)?;
                Some(exit_event(app_id, exit, &tracked, grace))
            })
            .collect()
    }
}

fn exit_event(app_id: AppId, exit: ProcessExit, tracked: &Tracked, grace: Duration) -> ProcessEvent {
    let uptime = tracked.started.elapsed();
    info!(
        app_id = %app_id,
        pid = tracked.process.pid,
        exit = ?exit,
        uptime = %tether_util::format_duration(uptime),
        "Process exited"
    );

    if tracked.stopping || exit.is_success() {
        ProcessEvent::Stopped { app_id }
    } else {
        ProcessEvent::Failed {
            app_id,
            during_startup: uptime < grace,
        }
    }
}

impl ProcessController for LinuxProcessController {
    fn start(&self, app_id: &AppId, args: &[String]) -> HostResult<()> {
        let descriptor = self
            .catalog
            .get(app_id)
            .ok_or_else(|| HostError::UnknownApplication(app_id.clone()))?;

        let mut procs = lock(&self.processes);
        if let Some(existing) = procs.get(app_id) {
            return Err(HostError::LaunchFailed(format!(
                "{} already has process {}",
                app_id, existing.process.pid
            )));
        }

        let argv = descriptor.argv(args);
        let process = ManagedProcess::spawn(&argv, &descriptor.env, descriptor.cwd.as_ref())?;
        info!(app_id = %app_id, pid = process.pid, argv = ?argv, "Spawned application");

        procs.insert(
            app_id.clone(),
            Tracked {
                process,
                started: MonotonicInstant::now(),
                stopping: false,
            },
        );
        drop(procs);

        let _ = self.event_tx.send(ProcessEvent::Starting {
            app_id: app_id.clone(),
        });
        Ok(())
    }

    fn stop(&self, app_id: &AppId) -> HostResult<()> {
        let mut procs = lock(&self.processes);
        let tracked = procs
            .get_mut(app_id)
            .ok_or_else(|| HostError::StopFailed(format!("No process for {}", app_id)))?;

        tracked.stopping = true;
        // a stopped group ignores SIGTERM until continued
        tracked.process.thaw()?;
        tracked.process.terminate()?;
        info!(app_id = %app_id, pid = tracked.process.pid, "Sent SIGTERM to application");
        Ok(())
    }

    fn suspend(&self, app_id: &AppId) {
        let mut suspended = false;
        self.signal(app_id, "suspend", |p| {
            p.freeze()?;
            suspended = true;
            Ok(())
        });
        if suspended {
            let _ = self.event_tx.send(ProcessEvent::Suspended {
                app_id: app_id.clone(),
            });
        }
    }

    fn resume(&self, app_id: &AppId) {
        self.signal(app_id, "resume", ManagedProcess::thaw);
    }

    fn has_process(&self, app_id: &AppId, pid: u32) -> bool {
        lock(&self.processes)
            .get(app_id)
            .is_some_and(|t| t.process.owns(pid))
    }

    fn find_metadata(&self, app_id: &AppId) -> Option<AppDescriptor> {
        self.catalog.get(app_id).cloned()
    }

    fn terminate(&self, pid: u32) -> HostResult<()> {
        warn!(pid, signal = ?Signal::SIGTERM, "Terminating process directly");
        terminate_pid(pid)
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        self.event_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .expect("subscribe() can only be called once")
    }
}
