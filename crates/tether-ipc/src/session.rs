//! Graphical sessions owned by remote compositor clients

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_api::{SessionAction, SessionState};
use tether_host_api::SessionHandle;
use tether_util::{ClientId, SessionId};
use tokio::sync::mpsc;
use tracing::debug;

/// Request for the compositor that owns a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCommand {
    pub client_id: ClientId,
    pub session_id: SessionId,
    pub action: SessionAction,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    client_id: ClientId,
    pid: u32,
    state: SessionState,
}

/// Sessions announced by compositor clients, keyed by id.
///
/// Shared between the IPC handlers, which record reported states, and the
/// [`RemoteSession`] handles held by application records.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, SessionEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, session_id: SessionId, client_id: ClientId, pid: u32) {
        self.lock().insert(
            session_id,
            SessionEntry {
                client_id,
                pid,
                state: SessionState::Starting,
            },
        );
    }

    /// Record a reported state. Returns false for unknown sessions.
    pub fn set_state(&self, session_id: &SessionId, state: SessionState) -> bool {
        match self.lock().get_mut(session_id) {
            Some(entry) => {
                entry.state = state;
                true
            }
            None => false,
        }
    }

    pub fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.lock().get(session_id).map(|e| e.state)
    }

    pub fn owner(&self, session_id: &SessionId) -> Option<ClientId> {
        self.lock().get(session_id).map(|e| e.client_id)
    }

    pub fn remove(&self, session_id: &SessionId) {
        self.lock().remove(session_id);
    }

    /// Mark every session of a departed compositor stopped and return their ids
    pub fn orphan_client(&self, client_id: &ClientId) -> Vec<SessionId> {
        let mut sessions = self.lock();
        let orphaned: Vec<SessionId> = sessions
            .iter_mut()
            .filter(|(_, e)| e.client_id == *client_id)
            .map(|(id, e)| {
                e.state = SessionState::Stopped;
                *id
            })
            .collect();
        if !orphaned.is_empty() {
            debug!(client_id = %client_id, count = orphaned.len(), "Compositor sessions orphaned");
        }
        orphaned
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Handle for a registered session whose requests go to `outbox`
    pub fn handle(
        &self,
        session_id: SessionId,
        outbox: mpsc::UnboundedSender<SessionCommand>,
    ) -> Option<RemoteSession> {
        let entry = self.lock().get(&session_id).cloned()?;
        Some(RemoteSession {
            id: session_id,
            pid: entry.pid,
            client_id: entry.client_id,
            table: self.clone(),
            outbox,
        })
    }
}

/// Session handle that forwards requests to its compositor over IPC
#[derive(Debug)]
pub struct RemoteSession {
    id: SessionId,
    pid: u32,
    client_id: ClientId,
    table: SessionTable,
    outbox: mpsc::UnboundedSender<SessionCommand>,
}

impl RemoteSession {
    fn request(&self, action: SessionAction) {
        let command = SessionCommand {
            client_id: self.client_id,
            session_id: self.id,
            action,
        };
        if self.outbox.send(command).is_err() {
            debug!(session_id = %self.id, action = ?action, "Session outbox closed");
        }
    }
}

impl SessionHandle for RemoteSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn state(&self) -> SessionState {
        self.table.state(&self.id).unwrap_or(SessionState::Stopped)
    }

    fn suspend(&self) {
        self.request(SessionAction::Suspend);
    }

    fn resume(&self) {
        self.request(SessionAction::Resume);
    }

    fn close(&self) {
        self.request(SessionAction::Close);
    }

    fn stop(&self) {
        self.request(SessionAction::Stop);
    }
}

impl Drop for RemoteSession {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}
