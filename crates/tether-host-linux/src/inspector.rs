//! Command line inspection through procfs

use std::path::PathBuf;
use tether_host_api::{CommandLine, HostError, HostResult, ProcessInspector};
use tracing::debug;

/// Reads `/proc/<pid>/cmdline`
#[derive(Debug, Clone)]
pub struct ProcInspector {
    root: PathBuf,
}

impl ProcInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Inspect a procfs mounted somewhere else
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for ProcInspector {
    fn command_line(&self, pid: u32) -> HostResult<CommandLine> {
        let path = self.root.join(pid.to_string()).join("cmdline");
        let raw = std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HostError::NoSuchProcess(pid),
            _ => HostError::Io(e),
        })?;

        let command_line = CommandLine::from_nul_separated(&raw);
        debug!(pid, command = %command_line.joined(), "Read process command line");

        // kernel threads and zombies have an empty cmdline
        if command_line.is_empty() {
            return Err(HostError::NoSuchProcess(pid));
        }
        Ok(command_line)
    }
}
