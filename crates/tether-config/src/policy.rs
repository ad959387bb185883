//! Validated policy structures

use crate::schema::{RawApplication, RawAuthorization, RawConfig, RawDaemonConfig, RawLifecycle, RawWakelock};
use crate::validation::{parse_orientation, parse_stage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tether_api::{Stage, SupportedOrientations, SupportedStages};
use tether_host_api::AppDescriptor;
use tether_util::{default_data_dir, default_log_dir, socket_path_without_env, AppId};

/// Default graceful close timeout
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(3000);

/// Validated policy ready for use by the daemon
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub daemon: DaemonConfig,
    pub lifecycle: LifecyclePolicy,
    pub authorization: AuthorizationPolicy,
    pub wakelock: WakelockConfig,
    pub applications: Vec<AppDescriptor>,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            daemon: DaemonConfig::from_raw(raw.daemon),
            lifecycle: LifecyclePolicy::from_raw(raw.lifecycle),
            authorization: AuthorizationPolicy::from_raw(raw.authorization),
            wakelock: WakelockConfig::from_raw(raw.wakelock),
            applications: raw.applications.into_iter().map(convert_application).collect(),
        }
    }

    /// Get catalog entry by ID
    pub fn get_application(&self, id: &AppId) -> Option<&AppDescriptor> {
        self.applications.iter().find(|a| &a.app_id == id)
    }
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub compositor_socket_path: PathBuf,
    pub log_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl DaemonConfig {
    fn from_raw(raw: RawDaemonConfig) -> Self {
        let defaults = Self::default();
        let socket_path = raw.socket_path.unwrap_or(defaults.socket_path);
        Self {
            compositor_socket_path: raw
                .compositor_socket_path
                .unwrap_or_else(|| compositor_socket_beside(&socket_path)),
            socket_path,
            log_dir: raw.log_dir.unwrap_or(defaults.log_dir),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let socket_path = socket_path_without_env();
        Self {
            compositor_socket_path: compositor_socket_beside(&socket_path),
            socket_path,
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
        }
    }
}

/// `.../tetherd.sock` -> `.../compositor.sock`
pub fn compositor_socket_beside(socket_path: &Path) -> PathBuf {
    socket_path.with_file_name("compositor.sock")
}

/// Lifecycle timing and exemptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub close_timeout: Duration,
    pub tick_interval: Duration,
    pub startup_grace: Duration,
    pub exemptions: Vec<String>,
}

impl LifecyclePolicy {
    fn from_raw(raw: RawLifecycle) -> Self {
        let defaults = Self::default();
        Self {
            close_timeout: raw
                .close_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.close_timeout),
            tick_interval: raw
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            startup_grace: raw
                .startup_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.startup_grace),
            exemptions: raw.exemptions.unwrap_or(defaults.exemptions),
        }
    }

    /// Exemptions match the full id or its package section
    pub fn is_exempt(&self, app_id: &AppId) -> bool {
        self.exemptions
            .iter()
            .any(|e| e == app_id.as_str() || e == app_id.package())
    }
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            tick_interval: Duration::from_millis(100),
            startup_grace: Duration::from_secs(2),
            exemptions: vec!["unity8-dash".into()],
        }
    }
}

/// How foreign processes asking for a session are identified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    pub trusted_prefixes: Vec<String>,
    pub trusted_substrings: Vec<String>,
    pub desktop_file_hint: String,
    pub stage_hint: String,
}

impl AuthorizationPolicy {
    fn from_raw(raw: RawAuthorization) -> Self {
        let defaults = Self::default();
        Self {
            trusted_prefixes: raw.trusted_prefixes.unwrap_or(defaults.trusted_prefixes),
            trusted_substrings: raw.trusted_substrings.unwrap_or(defaults.trusted_substrings),
            desktop_file_hint: raw.desktop_file_hint.unwrap_or(defaults.desktop_file_hint),
            stage_hint: raw.stage_hint.unwrap_or(defaults.stage_hint),
        }
    }
}

impl Default for AuthorizationPolicy {
    fn default() -> Self {
        Self {
            trusted_prefixes: vec!["maliit-server".into()],
            trusted_substrings: vec!["qt5/libexec/QtWebProcess".into()],
            desktop_file_hint: "--desktop_file_hint=".into(),
            stage_hint: "--stage_hint=".into(),
        }
    }
}

/// System wakelock backend settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakelockConfig {
    pub enabled: bool,
    pub command: Vec<String>,
}

impl WakelockConfig {
    fn from_raw(raw: RawWakelock) -> Self {
        let defaults = Self::default();
        Self {
            enabled: raw.enabled.unwrap_or(defaults.enabled),
            command: raw.command.unwrap_or(defaults.command),
        }
    }
}

impl Default for WakelockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: [
                "systemd-inhibit",
                "--what=sleep:idle",
                "--who=tetherd",
                "--why=Application is active",
                "--mode=block",
                "sleep",
                "infinity",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

fn convert_application(raw: RawApplication) -> AppDescriptor {
    // Stages were validated already
    let stage = raw
        .stage
        .as_deref()
        .and_then(|s| parse_stage(s).ok())
        .unwrap_or(Stage::Main);
    let supported = raw
        .supported_stages
        .as_ref()
        .map(|names| {
            let stages: Vec<Stage> = names.iter().filter_map(|n| parse_stage(n).ok()).collect();
            SupportedStages::from_stages(&stages)
        })
        .unwrap_or_else(|| stage.flag());

    let orientations = raw
        .supported_orientations
        .as_ref()
        .map(|names| {
            let parsed: Vec<_> = names.iter().filter_map(|n| parse_orientation(n).ok()).collect();
            SupportedOrientations::from_orientations(&parsed)
        })
        .unwrap_or_default();

    AppDescriptor {
        app_id: AppId::normalized(&raw.id),
        name: raw.name,
        comment: raw.comment,
        icon: raw.icon,
        exec: raw.exec,
        env: raw.env,
        cwd: raw.cwd,
        stage,
        supported_stages: supported,
        supported_orientations: orientations,
    }
}
