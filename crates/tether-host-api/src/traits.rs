//! Collaborator traits

use std::fmt;
use tether_api::SessionState;
use tether_util::{AppId, SessionId};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{AppDescriptor, CommandLine};

/// Errors from collaborator operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Unknown application: {0}")]
    UnknownApplication(AppId),

    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    #[error("Wakelock unavailable: {0}")]
    WakelockUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Events reported by the process controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A process for the app is starting (launched by us or by someone else)
    Starting { app_id: AppId },

    /// The process exited cleanly or was terminated
    Stopped { app_id: AppId },

    /// The process crashed; `during_startup` if it never got going
    Failed { app_id: AppId, during_startup: bool },

    /// The process was suspended at our request
    Suspended { app_id: AppId },

    /// Someone outside the shell asked for the app to be focused
    FocusRequested { app_id: AppId },

    /// Someone outside the shell asked for the app to be resumed
    ResumeRequested { app_id: AppId },
}

impl ProcessEvent {
    pub fn app_id(&self) -> &AppId {
        match self {
            ProcessEvent::Starting { app_id }
            | ProcessEvent::Stopped { app_id }
            | ProcessEvent::Failed { app_id, .. }
            | ProcessEvent::Suspended { app_id }
            | ProcessEvent::FocusRequested { app_id }
            | ProcessEvent::ResumeRequested { app_id } => app_id,
        }
    }
}

/// Launches, signals and observes application processes.
///
/// All calls are made from the lifecycle owner loop and must not block on
/// the process itself; outcomes are reported later through [`subscribe`].
///
/// [`subscribe`]: ProcessController::subscribe
pub trait ProcessController: Send + Sync {
    /// Launch the application with extra arguments
    fn start(&self, app_id: &AppId, args: &[String]) -> HostResult<()>;

    /// Ask the application's processes to terminate
    fn stop(&self, app_id: &AppId) -> HostResult<()>;

    fn suspend(&self, app_id: &AppId);

    fn resume(&self, app_id: &AppId);

    /// Whether `pid` belongs to the application's process tree
    fn has_process(&self, app_id: &AppId, pid: u32) -> bool;

    /// Load the descriptor (name, exec line, stages) for an application
    fn find_metadata(&self, app_id: &AppId) -> Option<AppDescriptor>;

    /// Last-resort termination of a process the controller could not stop
    fn terminate(&self, pid: u32) -> HostResult<()>;

    /// Subscribe to process events (may only be called once)
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent>;
}

/// A graphical session opened by a compositor on behalf of an application.
///
/// Requests are fire-and-forget; the session reports back through
/// state-change and close-completed events on the lifecycle queue.
pub trait SessionHandle: Send + Sync + fmt::Debug {
    fn id(&self) -> SessionId;

    /// Process that owns the session
    fn pid(&self) -> u32;

    /// Last state the session reported
    fn state(&self) -> SessionState;

    fn suspend(&self);

    fn resume(&self);

    fn close(&self);

    fn stop(&self);
}

/// Reads the command line of foreign processes asking for a session
pub trait ProcessInspector: Send + Sync {
    fn command_line(&self, pid: u32) -> HostResult<CommandLine>;
}

/// A held system wakelock. Released explicitly, never by accident.
pub trait SystemWakelock: Send + fmt::Debug {
    fn release(self: Box<Self>);
}

/// Backend that can take the system wakelock
pub trait WakelockProvider: Send + Sync {
    fn acquire(&self) -> HostResult<Box<dyn SystemWakelock>>;
}
