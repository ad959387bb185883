//! Default paths for tether components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/tether/config.toml` or `~/.config/tether/config.toml`
//! - Socket: `$XDG_RUNTIME_DIR/tether/tetherd.sock` or `/tmp/tether-$USER/tetherd.sock`
//! - Data: `$XDG_DATA_HOME/tether` or `~/.local/share/tether`
//! - Logs: `$XDG_STATE_HOME/tether` or `~/.local/state/tether`

use std::path::PathBuf;

/// Environment variable for overriding the config file
pub const TETHER_CONFIG_ENV: &str = "TETHER_CONFIG";

const SOCKET_FILENAME: &str = "tetherd.sock";
const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "tether";

fn home_subdir(parts: &[&str]) -> Option<PathBuf> {
    let home = std::env::var("HOME").ok()?;
    let mut path = PathBuf::from(home);
    for part in parts {
        path.push(part);
    }
    Some(path.join(APP_DIR))
}

/// Get the default configuration file path.
///
/// Order of precedence:
/// 1. `$TETHER_CONFIG`
/// 2. `$XDG_CONFIG_HOME/tether/config.toml`
/// 3. `~/.config/tether/config.toml`
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(TETHER_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join(CONFIG_FILENAME);
    }

    home_subdir(&[".config"])
        .unwrap_or_else(|| PathBuf::from("/etc").join(APP_DIR))
        .join(CONFIG_FILENAME)
}

/// Get the socket path without checking the TETHER_SOCKET env var.
/// The daemon checks the env var separately through clap.
pub fn socket_path_without_env() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join(APP_DIR).join(SOCKET_FILENAME);
    }

    let username = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    PathBuf::from(format!("/tmp/{}-{}", APP_DIR, username)).join(SOCKET_FILENAME)
}

/// Get the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    home_subdir(&[".local", "share"]).unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("data"))
}

/// Get the default log directory.
pub fn default_log_dir() -> PathBuf {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(state_home).join(APP_DIR);
    }

    home_subdir(&[".local", "state"]).unwrap_or_else(|| PathBuf::from("/tmp").join(APP_DIR).join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_names_tether() {
        let path = socket_path_without_env();
        assert!(path.to_string_lossy().contains("tether"));
        assert!(path.to_string_lossy().ends_with(".sock"));
    }

    #[test]
    fn config_path_is_toml() {
        let path = default_config_path();
        assert!(path.to_string_lossy().ends_with(".toml"));
    }

    #[test]
    fn data_and_log_dirs_name_tether() {
        assert!(default_data_dir().to_string_lossy().contains("tether"));
        assert!(default_log_dir().to_string_lossy().contains("tether"));
    }
}
