//! Error types shared across tether crates

use thiserror::Error;

use crate::AppId;

/// Request-level failures that are not lifecycle decisions
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("Application not found: {0}")]
    AppNotFound(AppId),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TetherError {
    pub fn permission(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        assert_eq!(
            TetherError::AppNotFound(AppId::new("ghost")).to_string(),
            "Application not found: ghost"
        );
        assert_eq!(
            TetherError::permission("observers cannot stop applications").to_string(),
            "Permission denied: observers cannot stop applications"
        );
    }
}
