//! Configuration validation

use crate::schema::{RawApplication, RawConfig};
use std::collections::HashSet;
use tether_api::{Orientation, Stage};
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Application '{app_id}': {message}")]
    ApplicationError { app_id: String, message: String },

    #[error("Duplicate application ID: {0}")]
    DuplicateAppId(String),

    #[error("Invalid stage '{0}' (expected \"main\" or \"side\")")]
    InvalidStage(String),

    #[error("Invalid orientation '{0}'")]
    InvalidOrientation(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration, collecting every error
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    for app in &config.applications {
        if !seen_ids.insert(&app.id) {
            errors.push(ValidationError::DuplicateAppId(app.id.clone()));
        }
    }

    for app in &config.applications {
        errors.extend(validate_application(app));
    }

    for (name, value) in [
        ("close_timeout_ms", config.lifecycle.close_timeout_ms),
        ("tick_interval_ms", config.lifecycle.tick_interval_ms),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::GlobalError(format!(
                "lifecycle.{} must be greater than zero",
                name
            )));
        }
    }

    for (name, value) in [
        ("desktop_file_hint", &config.authorization.desktop_file_hint),
        ("stage_hint", &config.authorization.stage_hint),
    ] {
        if value.as_deref().is_some_and(str::is_empty) {
            errors.push(ValidationError::GlobalError(format!(
                "authorization.{} cannot be empty",
                name
            )));
        }
    }

    if config
        .wakelock
        .command
        .as_ref()
        .is_some_and(|argv| argv.is_empty())
    {
        errors.push(ValidationError::GlobalError(
            "wakelock.command cannot be empty".into(),
        ));
    }

    errors
}

fn validate_application(app: &RawApplication) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let err = |message: &str| ValidationError::ApplicationError {
        app_id: app.id.clone(),
        message: message.to_string(),
    };

    if app.id.is_empty() {
        errors.push(err("id cannot be empty"));
    } else if app.id.chars().any(|c| c.is_whitespace() || c == '/') {
        errors.push(err("id cannot contain whitespace or '/'"));
    }

    if app.exec.first().is_none_or(|program| program.is_empty()) {
        errors.push(err("exec cannot be empty"));
    }

    let stage = match app.stage.as_deref().map(parse_stage) {
        Some(Err(e)) => {
            errors.push(e);
            None
        }
        Some(Ok(stage)) => Some(stage),
        None => None,
    };

    if let Some(supported) = &app.supported_stages {
        if supported.is_empty() {
            errors.push(err("supported_stages cannot be empty"));
        }
        let mut parsed = Vec::new();
        for name in supported {
            match parse_stage(name) {
                Ok(stage) => parsed.push(stage),
                Err(e) => errors.push(e),
            }
        }
        if let Some(stage) = stage {
            if !parsed.is_empty() && !parsed.contains(&stage) {
                errors.push(err("stage must be one of supported_stages"));
            }
        }
    }

    if let Some(orientations) = &app.supported_orientations {
        if orientations.is_empty() {
            errors.push(err("supported_orientations cannot be empty"));
        }
        errors.extend(
            orientations
                .iter()
                .filter_map(|name| parse_orientation(name).err()),
        );
    }

    errors
}

/// Parse an orientation name
pub fn parse_orientation(name: &str) -> Result<Orientation, ValidationError> {
    match name.trim().to_lowercase().as_str() {
        "portrait" => Ok(Orientation::Portrait),
        "landscape" => Ok(Orientation::Landscape),
        "inverted_portrait" | "inverted-portrait" => Ok(Orientation::InvertedPortrait),
        "inverted_landscape" | "inverted-landscape" => Ok(Orientation::InvertedLandscape),
        _ => Err(ValidationError::InvalidOrientation(name.to_string())),
    }
}

/// Parse a stage name
pub fn parse_stage(name: &str) -> Result<Stage, ValidationError> {
    match name.trim().to_lowercase().as_str() {
        "main" | "main_stage" => Ok(Stage::Main),
        "side" | "side_stage" => Ok(Stage::Side),
        _ => Err(ValidationError::InvalidStage(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::*;

    fn make_app(id: &str) -> RawApplication {
        RawApplication {
            id: id.into(),
            name: id.into(),
            exec: vec![format!("/usr/bin/{}", id)],
            comment: None,
            icon: None,
            stage: None,
            supported_stages: None,
            supported_orientations: None,
            env: Default::default(),
            cwd: None,
        }
    }

    fn make_config(applications: Vec<RawApplication>) -> RawConfig {
        RawConfig {
            config_version: 1,
            daemon: Default::default(),
            lifecycle: Default::default(),
            authorization: Default::default(),
            wakelock: Default::default(),
            applications,
        }
    }

    #[test]
    fn test_parse_stage() {
        assert_eq!(parse_stage("main").unwrap(), Stage::Main);
        assert_eq!(parse_stage("side_stage").unwrap(), Stage::Side);
        assert!(parse_stage("floating").is_err());
    }

    #[test]
    fn test_duplicate_id_detection() {
        let config = make_config(vec![make_app("notes"), make_app("notes")]);
        let errors = validate_config(&config);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateAppId(id) if id == "notes")));
    }

    #[test]
    fn test_empty_exec_rejected() {
        let mut app = make_app("notes");
        app.exec.clear();
        let errors = validate_config(&make_config(vec![app]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("exec cannot be empty"));
    }

    #[test]
    fn test_stage_must_be_supported() {
        let mut app = make_app("notes");
        app.stage = Some("side".into());
        app.supported_stages = Some(vec!["main".into()]);
        let errors = validate_config(&make_config(vec![app]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("supported_stages"));
    }

    #[test]
    fn test_orientations_checked() {
        assert_eq!(parse_orientation("Inverted_Landscape").unwrap(), Orientation::InvertedLandscape);

        let mut app = make_app("camera-app");
        app.supported_orientations = Some(vec!["portrait".into(), "sideways".into()]);
        let errors = validate_config(&make_config(vec![app]));
        assert!(matches!(&errors[..], [ValidationError::InvalidOrientation(name)] if name == "sideways"));

        let mut app = make_app("notes");
        app.supported_orientations = Some(vec![]);
        let errors = validate_config(&make_config(vec![app]));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("supported_orientations"));
    }

    #[test]
    fn test_zero_close_timeout_rejected() {
        let mut config = make_config(vec![]);
        config.lifecycle.close_timeout_ms = Some(0);
        let errors = validate_config(&config);
        assert!(matches!(&errors[..], [ValidationError::GlobalError(msg)] if msg.contains("close_timeout_ms")));
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        let mut app = make_app("camera-app");
        app.stage = Some("main".into());
        app.supported_stages = Some(vec!["main".into(), "side".into()]);
        assert!(validate_config(&make_config(vec![app, make_app("notes")])).is_empty());
    }
}
