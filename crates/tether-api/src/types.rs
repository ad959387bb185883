//! Shared types for the tetherd API

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tether_util::AppId;

/// Fine-grained lifecycle state of an application record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalState {
    Starting,
    Running,
    /// Exempt from lifecycle: "suspended" without actually stopping the process
    RunningInBackground,
    /// Waiting for the session to confirm it has suspended
    SuspendingWaitSession,
    /// Waiting for the process controller to confirm the process is suspended
    SuspendingWaitProcess,
    Suspended,
    /// Session asked to close; bounded by the close timer
    Closing,
    /// Process gone but the app can be relaunched in place
    StoppedResumable,
    Stopped,
}

impl InternalState {
    /// Project onto the simplified public state
    pub fn public(self) -> ApplicationState {
        match self {
            InternalState::Starting => ApplicationState::Starting,
            InternalState::Running
            | InternalState::RunningInBackground
            | InternalState::SuspendingWaitSession
            | InternalState::SuspendingWaitProcess
            | InternalState::Closing => ApplicationState::Running,
            InternalState::Suspended => ApplicationState::Suspended,
            InternalState::StoppedResumable | InternalState::Stopped => ApplicationState::Stopped,
        }
    }

    /// States during which the app keeps the device awake
    pub fn holds_wakelock(self) -> bool {
        matches!(
            self,
            InternalState::Starting | InternalState::Running | InternalState::Closing
        )
    }
}

/// Public (simplified) application state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    Starting,
    Running,
    Suspended,
    Stopped,
}

/// Run/suspend intent declared by the shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestedState {
    Running,
    Suspended,
}

/// Last-known OS process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    #[default]
    Unknown,
    Running,
    Suspended,
    Failed,
    Stopped,
}

/// State reported by a graphical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Running,
    Suspending,
    Suspended,
    Stopped,
}

/// Something the daemon asks a compositor to do with one of its sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionAction {
    Suspend,
    Resume,
    Close,
    Stop,
}

/// Screen stage an application is placed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Main,
    Side,
}

impl Stage {
    pub fn flag(self) -> SupportedStages {
        match self {
            Stage::Main => SupportedStages::MAIN,
            Stage::Side => SupportedStages::SIDE,
        }
    }
}

bitflags! {
    /// Stages an application declares support for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SupportedStages: u8 {
        const MAIN = 0b01;
        const SIDE = 0b10;
    }
}

impl SupportedStages {
    pub fn supports(self, stage: Stage) -> bool {
        self.contains(stage.flag())
    }

    pub fn to_stages(self) -> Vec<Stage> {
        [Stage::Main, Stage::Side]
            .into_iter()
            .filter(|s| self.supports(*s))
            .collect()
    }

    pub fn from_stages<'a>(stages: impl IntoIterator<Item = &'a Stage>) -> Self {
        stages
            .into_iter()
            .fold(SupportedStages::empty(), |acc, s| acc | s.flag())
    }
}

impl Default for SupportedStages {
    fn default() -> Self {
        SupportedStages::MAIN
    }
}

bitflags! {
    /// Screen orientations an application can be shown in.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SupportedOrientations: u8 {
        const PORTRAIT = 0b0001;
        const LANDSCAPE = 0b0010;
        const INVERTED_PORTRAIT = 0b0100;
        const INVERTED_LANDSCAPE = 0b1000;
    }
}

impl SupportedOrientations {
    pub fn to_orientations(self) -> Vec<Orientation> {
        Orientation::ALL
            .into_iter()
            .filter(|o| self.contains(o.flag()))
            .collect()
    }

    pub fn from_orientations<'a>(orientations: impl IntoIterator<Item = &'a Orientation>) -> Self {
        orientations
            .into_iter()
            .fold(SupportedOrientations::empty(), |acc, o| acc | o.flag())
    }
}

impl Default for SupportedOrientations {
    fn default() -> Self {
        SupportedOrientations::all()
    }
}

/// Single screen orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
    InvertedPortrait,
    InvertedLandscape,
}

impl Orientation {
    pub const ALL: [Orientation; 4] = [
        Orientation::Portrait,
        Orientation::Landscape,
        Orientation::InvertedPortrait,
        Orientation::InvertedLandscape,
    ];

    pub fn flag(self) -> SupportedOrientations {
        match self {
            Orientation::Portrait => SupportedOrientations::PORTRAIT,
            Orientation::Landscape => SupportedOrientations::LANDSCAPE,
            Orientation::InvertedPortrait => SupportedOrientations::INVERTED_PORTRAIT,
            Orientation::InvertedLandscape => SupportedOrientations::INVERTED_LANDSCAPE,
        }
    }
}

/// Per-application field whose value changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelField {
    State,
    RequestedState,
    Focused,
    Stage,
    Screenshot,
    ExemptFromLifecycle,
}

/// View of an application for shells and observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationView {
    pub app_id: AppId,
    pub name: String,
    pub comment: Option<String>,
    pub icon: Option<String>,
    pub state: ApplicationState,
    pub internal_state: InternalState,
    pub requested_state: RequestedState,
    pub process_state: ProcessState,
    pub pid: u32,
    pub focused: bool,
    pub stage: Stage,
    pub supported_stages: Vec<Stage>,
    #[serde(default)]
    pub supported_orientations: Vec<Orientation>,
    pub exempt_from_lifecycle: bool,
    pub can_be_resumed: bool,
    pub screenshot_generation: u64,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Shell UI - can start, stop, focus, suspend and resume applications
    Shell,
    /// Compositor - owns graphical sessions and asks for authorization
    Compositor,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_control(&self) -> bool {
        matches!(self, ClientRole::Shell)
    }

    pub fn can_manage_sessions(&self) -> bool {
        matches!(self, ClientRole::Compositor)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub application_count: usize,
    pub wakelock_held: bool,
}
