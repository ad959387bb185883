//! Change notifications published by the registry

use tether_api::{EventPayload, ModelField};
use tether_util::AppId;

/// Events emitted by the application registry, in the order the
/// underlying mutations were performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    Added { index: usize, app_id: AppId },
    Removed { index: usize, app_id: AppId },
    Moved { from: usize, to: usize },
    CountChanged { count: usize },
    FocusChanged { app_id: Option<AppId> },
    FieldChanged { app_id: AppId, field: ModelField },
    FocusRequested { app_id: AppId },
}

impl From<CoreEvent> for EventPayload {
    fn from(event: CoreEvent) -> Self {
        match event {
            CoreEvent::Added { index, app_id } => EventPayload::ApplicationAdded { index, app_id },
            CoreEvent::Removed { index, app_id } => {
                EventPayload::ApplicationRemoved { index, app_id }
            }
            CoreEvent::Moved { from, to } => EventPayload::ApplicationMoved { from, to },
            CoreEvent::CountChanged { count } => EventPayload::CountChanged { count },
            CoreEvent::FocusChanged { app_id } => EventPayload::FocusChanged { app_id },
            CoreEvent::FieldChanged { app_id, field } => {
                EventPayload::FieldChanged { app_id, field }
            }
            CoreEvent::FocusRequested { app_id } => EventPayload::FocusRequested { app_id },
        }
    }
}
