//! Event types for tetherd -> client streaming

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tether_util::{AppId, SessionId};

use crate::{ModelField, SessionAction, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: tether_util::now(),
            payload,
        }
    }
}

/// All possible events from the daemon to clients.
///
/// List events carry indices into the focus-ordered application list so a
/// client can maintain its own projection by replaying them in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    ApplicationAdded { index: usize, app_id: AppId },

    ApplicationRemoved { index: usize, app_id: AppId },

    ApplicationMoved { from: usize, to: usize },

    CountChanged { count: usize },

    /// Focused application changed; `None` when nothing is focused
    FocusChanged { app_id: Option<AppId> },

    FieldChanged { app_id: AppId, field: ModelField },

    /// Something outside the shell asked for this app to be focused
    FocusRequested { app_id: AppId },

    /// Instruction for the compositor that owns `session_id`
    SessionRequest {
        session_id: SessionId,
        action: SessionAction,
    },

    /// Daemon is shutting down
    Shutdown,
}

impl EventPayload {
    /// Events addressed to a single compositor rather than all subscribers
    pub fn session_target(&self) -> Option<SessionId> {
        match self {
            EventPayload::SessionRequest { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serialization() {
        let event = Event::new(EventPayload::ApplicationAdded {
            index: 0,
            app_id: AppId::new("dialer-app"),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"application_added\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(
            parsed.payload,
            EventPayload::ApplicationAdded { index: 0, .. }
        ));
    }

    #[test]
    fn focus_cleared_serializes_null() {
        let event = Event::new(EventPayload::FocusChanged { app_id: None });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();
        if let EventPayload::FocusChanged { app_id } = parsed.payload {
            assert!(app_id.is_none());
        } else {
            panic!("Expected FocusChanged");
        }
    }

    #[test]
    fn session_requests_are_targeted() {
        let session_id = SessionId::new();
        let payload = EventPayload::SessionRequest {
            session_id,
            action: SessionAction::Suspend,
        };
        assert_eq!(payload.session_target(), Some(session_id));
        assert_eq!(EventPayload::Shutdown.session_target(), None);
    }
}
