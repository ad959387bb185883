//! Command types for the tetherd protocol

use serde::{Deserialize, Serialize};
use tether_util::{AppId, ClientId, SessionId};

use crate::{ApplicationView, ClientRole, HealthStatus, SessionState, Stage, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    AlreadyRunning,
    LaunchFailed,
    InvalidMetadata,
    NotFound,
    Unauthorized,
    UnsupportedStage,
    PermissionDenied,
    RateLimited,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// List tracked applications in focus order (front first)
    ListApplications,

    GetApplication { app_id: AppId },

    /// Launch an application from the catalog
    StartApplication {
        app_id: AppId,
        #[serde(default)]
        args: Vec<String>,
    },

    /// Close an application gracefully (forced after the close timeout)
    StopApplication { app_id: AppId },

    /// Move an application to the front of the focus order
    FocusApplication { app_id: AppId },

    SuspendApplication { app_id: AppId },

    ResumeApplication { app_id: AppId },

    SetExemptFromLifecycle { app_id: AppId, exempt: bool },

    SetStage { app_id: AppId, stage: Stage },

    /// Invalidate the cached screenshot of an application
    UpdateScreenshot { app_id: AppId },

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    GetHealth,

    // Compositor commands

    /// Decide whether the process `pid` may open a graphical session.
    AuthorizeSession { pid: u32 },

    /// A session was created by an authorized process
    SessionStarting { session_id: SessionId, pid: u32 },

    SessionStateChanged {
        session_id: SessionId,
        state: SessionState,
    },

    SessionCloseCompleted { session_id: SessionId },

    /// Ping for keepalive
    Ping,
}

impl Command {
    /// Commands that need the compositor role
    pub fn is_compositor_command(&self) -> bool {
        matches!(
            self,
            Command::AuthorizeSession { .. }
                | Command::SessionStarting { .. }
                | Command::SessionStateChanged { .. }
                | Command::SessionCloseCompleted { .. }
        )
    }

    /// Commands that change application lifecycle state
    pub fn is_control_command(&self) -> bool {
        matches!(
            self,
            Command::StartApplication { .. }
                | Command::StopApplication { .. }
                | Command::FocusApplication { .. }
                | Command::SuspendApplication { .. }
                | Command::ResumeApplication { .. }
                | Command::SetExemptFromLifecycle { .. }
                | Command::SetStage { .. }
                | Command::UpdateScreenshot { .. }
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Focus order, front first
    Applications { applications: Vec<ApplicationView> },
    Application(ApplicationView),
    Started(ApplicationView),
    /// Outcome of a request that only succeeds or is declined
    Accepted { accepted: bool },
    Authorization { approved: bool },
    SessionAttached { app_id: AppId },
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Health(HealthStatus),
    Ack,
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
    /// Unix PID of the peer if available
    pub pid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
            pid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }
}
