//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    #[serde(default)]
    pub daemon: RawDaemonConfig,

    #[serde(default)]
    pub lifecycle: RawLifecycle,

    #[serde(default)]
    pub authorization: RawAuthorization,

    #[serde(default)]
    pub wakelock: RawWakelock,

    /// Application catalog
    #[serde(default)]
    pub applications: Vec<RawApplication>,
}

/// Daemon-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawDaemonConfig {
    pub socket_path: Option<PathBuf>,
    /// Socket on which compositors connect; defaults next to `socket_path`
    pub compositor_socket_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
}

/// Lifecycle timing and exemptions
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawLifecycle {
    /// Grace period between asking a session to close and killing it
    pub close_timeout_ms: Option<u64>,

    /// How often deadlines are checked
    pub tick_interval_ms: Option<u64>,

    /// A process dying sooner than this after launch failed during startup
    pub startup_grace_ms: Option<u64>,

    /// App ids or package names never suspended and never holding the wakelock
    pub exemptions: Option<Vec<String>>,
}

/// How foreign processes asking for a session are identified
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuthorization {
    /// Programs always allowed a session (matched against argv[0] prefix)
    pub trusted_prefixes: Option<Vec<String>>,

    /// Programs always allowed a session (matched anywhere in the command line)
    pub trusted_substrings: Option<Vec<String>>,

    /// Argument prefix naming the desktop file of a self-launched app
    pub desktop_file_hint: Option<String>,

    /// Argument prefix requesting a stage for a self-launched app
    pub stage_hint: Option<String>,
}

/// System wakelock backend
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawWakelock {
    pub enabled: Option<bool>,

    /// Command that holds the wakelock for as long as it runs
    pub command: Option<Vec<String>>,
}

/// Catalog entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawApplication {
    pub id: String,
    pub name: String,
    pub exec: Vec<String>,
    pub comment: Option<String>,
    pub icon: Option<String>,
    /// "main" or "side"
    pub stage: Option<String>,
    pub supported_stages: Option<Vec<String>>,
    /// "portrait", "landscape", "inverted_portrait", "inverted_landscape"
    pub supported_orientations: Option<Vec<String>>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_application_entry() {
        let toml_str = r#"
            config_version = 1

            [lifecycle]
            close_timeout_ms = 5000

            [[applications]]
            id = "gallery-app"
            name = "Gallery"
            exec = ["gallery-app", "--fullscreen"]
            stage = "side"
            supported_stages = ["main", "side"]
            supported_orientations = ["portrait", "landscape"]
        "#;

        let config: RawConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.applications.len(), 1);
        assert_eq!(config.applications[0].exec.len(), 2);
        assert_eq!(
            config.applications[0].supported_orientations.as_deref(),
            Some(&["portrait".to_string(), "landscape".to_string()][..])
        );
        assert_eq!(config.lifecycle.close_timeout_ms, Some(5000));
        assert!(config.authorization.trusted_prefixes.is_none());
    }
}
