//! Lifecycle error taxonomy

use tether_api::Stage;
use tether_util::AppId;
use thiserror::Error;

/// Errors returned by registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("Application already running: {0}")]
    AlreadyRunning(AppId),

    #[error("Failed to launch {app_id}: {reason}")]
    LaunchFailed { app_id: AppId, reason: String },

    #[error("No valid metadata for application: {0}")]
    InvalidMetadata(AppId),

    #[error("No such application: {0}")]
    NotFound(AppId),

    #[error("Process {pid} is not authorized to open a session")]
    Unauthorized { pid: u32 },

    #[error("Application {app_id} does not support the {stage:?} stage")]
    UnsupportedStage { app_id: AppId, stage: Stage },

    #[error("Lifecycle loop is not running")]
    LoopClosed,
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;
