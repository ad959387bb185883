//! Application descriptor

use std::collections::HashMap;
use std::path::PathBuf;
use tether_api::{Stage, SupportedOrientations, SupportedStages};
use tether_util::AppId;

/// Static metadata for an application, the part of a desktop entry the
/// lifecycle core cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub app_id: AppId,
    pub name: String,
    pub comment: Option<String>,
    pub icon: Option<String>,
    /// Program and base arguments
    pub exec: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub stage: Stage,
    pub supported_stages: SupportedStages,
    pub supported_orientations: SupportedOrientations,
}

impl AppDescriptor {
    /// Minimal descriptor for an app launched as `exec`
    pub fn new(app_id: impl Into<AppId>, name: impl Into<String>, exec: Vec<String>) -> Self {
        Self {
            app_id: app_id.into(),
            name: name.into(),
            comment: None,
            icon: None,
            exec,
            env: HashMap::new(),
            cwd: None,
            stage: Stage::Main,
            supported_stages: SupportedStages::MAIN,
            supported_orientations: SupportedOrientations::default(),
        }
    }

    pub fn with_stages(mut self, stage: Stage, supported: SupportedStages) -> Self {
        self.stage = stage;
        self.supported_stages = supported | stage.flag();
        self
    }

    /// Full argv: base exec line plus per-launch arguments
    pub fn argv(&self, extra: &[String]) -> Vec<String> {
        self.exec.iter().chain(extra.iter()).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_appends_extra_arguments() {
        let desc = AppDescriptor::new("notes", "Notes", vec!["notes-app".into(), "--x".into()]);
        assert_eq!(
            desc.argv(&["file.txt".into()]),
            vec!["notes-app".to_string(), "--x".into(), "file.txt".into()]
        );
    }

    #[test]
    fn with_stages_always_supports_default_stage() {
        let desc = AppDescriptor::new("notes", "Notes", vec!["notes-app".into()])
            .with_stages(Stage::Side, SupportedStages::empty());
        assert!(desc.supported_stages.supports(Stage::Side));
        assert!(!desc.supported_stages.supports(Stage::Main));
    }
}
