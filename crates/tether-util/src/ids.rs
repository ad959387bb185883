//! Strongly-typed identifiers for tether

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier of an application, unique within the registry.
///
/// Click-style long ids (`package_app_version`) are accepted everywhere but
/// normalized to their short form (`package_app`) on construction through
/// [`AppId::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppId(String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build an id, chopping the version suffix off long ids.
    pub fn normalized(id: impl AsRef<str>) -> Self {
        let id = id.as_ref();
        match short_form(id) {
            Some(short) => {
                tracing::warn!(app_id = %id, short = %short, "Long app id encountered");
                Self(short)
            }
            None => Self(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Section before the first underscore (the package name for long ids)
    pub fn package(&self) -> &str {
        self.0.split('_').next().unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `package_app_version` -> `package_app`, or `None` when `id` is not a long id.
fn short_form(id: &str) -> Option<String> {
    let mut parts = id.splitn(3, '_');
    let package = parts.next()?;
    let app = parts.next()?;
    let version = parts.next()?;

    let package_ok = package.len() >= 2
        && package
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && package
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+.-".contains(c));
    let app_ok = !app.is_empty()
        && app
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "+.-".contains(c));
    let version_ok = version.chars().next().is_some_and(|c| c.is_ascii_digit())
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || ".+:~-".contains(c));

    if package_ok && app_ok && version_ok {
        Some(format!("{}_{}", package, app))
    } else {
        None
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AppId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AppId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a graphical session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a connected IPC client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_app_id_is_shortened() {
        let id = AppId::normalized("com.ubuntu.music_music_1.5.0");
        assert_eq!(id.as_str(), "com.ubuntu.music_music");
        assert_eq!(id.package(), "com.ubuntu.music");
    }

    #[test]
    fn short_app_ids_are_untouched() {
        assert_eq!(AppId::normalized("webbrowser-app").as_str(), "webbrowser-app");
        assert_eq!(
            AppId::normalized("com.ubuntu.music_music").as_str(),
            "com.ubuntu.music_music"
        );
        // version must start with a digit
        assert_eq!(
            AppId::normalized("com.ubuntu.music_music_current").as_str(),
            "com.ubuntu.music_music_current"
        );
        // uppercase not allowed in the package section
        assert_eq!(AppId::normalized("Pkg_app_1").as_str(), "Pkg_app_1");
    }

    #[test]
    fn session_id_uniqueness() {
        let s1 = SessionId::new();
        let s2 = SessionId::new();
        assert_ne!(s1, s2);
    }

    #[test]
    fn ids_serialize_deserialize() {
        let app_id = AppId::new("gallery-app");
        let json = serde_json::to_string(&app_id).unwrap();
        assert_eq!(json, "\"gallery-app\"");
        let parsed: AppId = serde_json::from_str(&json).unwrap();
        assert_eq!(app_id, parsed);

        let session_id = SessionId::new();
        let json = serde_json::to_string(&session_id).unwrap();
        let parsed: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(session_id, parsed);
    }
}
