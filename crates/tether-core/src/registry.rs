//! Ordered registry of managed applications
//!
//! The registry owns every [`ApplicationRecord`], routes collaborator events
//! to the right record, decides which foreign processes may open a session,
//! and records every list and field mutation as a [`CoreEvent`] so that
//! observers can keep an exact projection of the list.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tether_api::{
    ApplicationState, ApplicationView, InternalState, ModelField, ProcessState, RequestedState,
    SessionState, Stage,
};
use tether_config::{AuthorizationPolicy, LifecyclePolicy};
use tether_host_api::{
    ProcessController, ProcessEvent, ProcessInspector, SessionHandle, WakelockProvider,
};
use tether_util::{AppId, MonotonicInstant, SessionId};
use tracing::{debug, info, warn};

use crate::{
    ApplicationRecord, CoreEvent, LifecycleError, LifecycleResult, RecordContext, SharedWakelock,
};

/// Fields observers are told about when they change
#[derive(PartialEq)]
struct Snapshot {
    state: ApplicationState,
    requested: RequestedState,
    stage: Stage,
    exempt: bool,
    screenshot: u64,
}

impl Snapshot {
    fn of(record: &ApplicationRecord) -> Self {
        Self {
            state: record.state(),
            requested: record.requested_state(),
            stage: record.stage(),
            exempt: record.is_exempt_from_lifecycle(),
            screenshot: record.screenshot_generation(),
        }
    }

    fn changed_fields(&self, after: &Snapshot) -> Vec<ModelField> {
        let mut fields = Vec::new();
        if self.state != after.state {
            fields.push(ModelField::State);
        }
        if self.requested != after.requested {
            fields.push(ModelField::RequestedState);
        }
        if self.stage != after.stage {
            fields.push(ModelField::Stage);
        }
        if self.exempt != after.exempt {
            fields.push(ModelField::ExemptFromLifecycle);
        }
        if self.screenshot != after.screenshot {
            fields.push(ModelField::Screenshot);
        }
        fields
    }
}

pub struct ApplicationRegistry {
    entries: Vec<ApplicationRecord>,
    focused: Option<AppId>,
    controller: Arc<dyn ProcessController>,
    inspector: Arc<dyn ProcessInspector>,
    wakelock: SharedWakelock,
    lifecycle: LifecyclePolicy,
    authorization: AuthorizationPolicy,
    /// Trusted helpers approved for a session but not tracked as apps
    helper_pids: HashSet<u32>,
    events: Vec<CoreEvent>,
}

impl ApplicationRegistry {
    pub fn new(
        controller: Arc<dyn ProcessController>,
        inspector: Arc<dyn ProcessInspector>,
        wakelock: Arc<dyn WakelockProvider>,
        lifecycle: LifecyclePolicy,
        authorization: AuthorizationPolicy,
    ) -> Self {
        Self {
            entries: Vec::new(),
            focused: None,
            controller,
            inspector,
            wakelock: SharedWakelock::new(wakelock),
            lifecycle,
            authorization,
            helper_pids: HashSet::new(),
            events: Vec::new(),
        }
    }

    // ---------------------------------------------------------------
    // Read access
    // ---------------------------------------------------------------

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, index: usize) -> Option<&ApplicationRecord> {
        self.entries.get(index)
    }

    pub fn find(&self, id: &AppId) -> Option<&ApplicationRecord> {
        let id = AppId::normalized(id.as_str());
        self.entries.iter().find(|r| r.id() == &id)
    }

    pub fn find_by_pid(&self, pid: u32) -> Option<&ApplicationRecord> {
        self.entries.iter().find(|r| r.pid() == pid)
    }

    pub fn views(&self) -> Vec<ApplicationView> {
        self.entries.iter().map(ApplicationRecord::view).collect()
    }

    pub fn focused_id(&self) -> Option<&AppId> {
        self.focused.as_ref()
    }

    pub fn wakelock_held(&self) -> bool {
        self.wakelock.is_held()
    }

    /// Drain change notifications accumulated since the last call
    pub fn take_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    // ---------------------------------------------------------------
    // Shell operations
    // ---------------------------------------------------------------

    pub fn start_application(
        &mut self,
        id: &AppId,
        args: Vec<String>,
    ) -> LifecycleResult<ApplicationView> {
        let id = AppId::normalized(id.as_str());
        info!(app_id = %id, args = ?args, "Starting application");

        if self.index_of(&id).is_some() {
            warn!(app_id = %id, "Application already running");
            return Err(LifecycleError::AlreadyRunning(id));
        }

        let descriptor = self
            .controller
            .find_metadata(&id)
            .ok_or_else(|| LifecycleError::InvalidMetadata(id.clone()))?;

        self.controller.start(&id, &args).map_err(|e| {
            warn!(app_id = %id, error = %e, "Failed to launch application");
            LifecycleError::LaunchFailed {
                app_id: id.clone(),
                reason: e.to_string(),
            }
        })?;

        let exempt = self.lifecycle.is_exempt(&id);
        let record = ApplicationRecord::new(descriptor, args, exempt, self.record_context());
        let view = record.view();
        self.add(record);
        Ok(view)
    }

    /// Gracefully close an application; it is evicted once stopped.
    pub fn stop_application(&mut self, id: &AppId) -> LifecycleResult<()> {
        let id = AppId::normalized(id.as_str());
        info!(app_id = %id, "Stopping application");

        self.with_record(&id, ApplicationRecord::close)
            .ok_or(LifecycleError::NotFound(id))
    }

    pub fn move_to_focus_front(&mut self, id: &AppId) -> LifecycleResult<()> {
        let id = AppId::normalized(id.as_str());
        let index = self
            .index_of(&id)
            .ok_or_else(|| LifecycleError::NotFound(id.clone()))?;

        if index != 0 {
            let record = self.entries.remove(index);
            self.entries.insert(0, record);
            debug!(app_id = %id, from = index, "Moved application to front");
            self.events.push(CoreEvent::Moved { from: index, to: 0 });
        }

        if self.focused.as_ref() != Some(&id) {
            if let Some(old) = self.focused.take() {
                let unfocused = self
                    .entries
                    .iter_mut()
                    .find(|r| r.id() == &old)
                    .is_some_and(|r| r.set_focused(false));
                if unfocused {
                    self.events.push(CoreEvent::FieldChanged {
                        app_id: old,
                        field: ModelField::Focused,
                    });
                }
            }
            if self.entries[0].set_focused(true) {
                self.events.push(CoreEvent::FieldChanged {
                    app_id: id.clone(),
                    field: ModelField::Focused,
                });
            }
            info!(app_id = %id, "Focus changed");
            self.focused = Some(id.clone());
            self.events.push(CoreEvent::FocusChanged { app_id: Some(id) });
        }

        Ok(())
    }

    /// Returns `false` if the app is unknown.
    pub fn suspend_application(&mut self, id: &AppId) -> bool {
        self.request_state(id, RequestedState::Suspended)
    }

    /// Returns `false` if the app is unknown.
    pub fn resume_application(&mut self, id: &AppId) -> bool {
        self.request_state(id, RequestedState::Running)
    }

    fn request_state(&mut self, id: &AppId, state: RequestedState) -> bool {
        let id = AppId::normalized(id.as_str());
        if self.index_of(&id).is_none() {
            warn!(app_id = %id, requested = ?state, "No such application");
            return false;
        }
        if self.lifecycle.is_exempt(&id) {
            debug!(app_id = %id, requested = ?state, "Exempt from lifecycle, ignoring");
            return true;
        }
        self.with_record(&id, |r| r.set_requested_state(state));
        true
    }

    pub fn set_exempt_from_lifecycle(&mut self, id: &AppId, exempt: bool) -> LifecycleResult<()> {
        let id = AppId::normalized(id.as_str());
        self.with_record(&id, |r| r.set_exempt_from_lifecycle(exempt))
            .ok_or(LifecycleError::NotFound(id))
    }

    pub fn set_stage(&mut self, id: &AppId, stage: Stage) -> LifecycleResult<()> {
        let id = AppId::normalized(id.as_str());
        match self.with_record(&id, |r| r.set_stage(stage)) {
            Some(true) => Ok(()),
            Some(false) => Err(LifecycleError::UnsupportedStage { app_id: id, stage }),
            None => Err(LifecycleError::NotFound(id)),
        }
    }

    pub fn update_screenshot(&mut self, id: &AppId) -> LifecycleResult<()> {
        let id = AppId::normalized(id.as_str());
        self.with_record(&id, ApplicationRecord::update_screenshot)
            .ok_or(LifecycleError::NotFound(id))
    }

    /// Drive close timers
    pub fn tick(&mut self, now: MonotonicInstant) {
        let armed: Vec<AppId> = self
            .entries
            .iter()
            .filter(|r| r.close_timer().is_armed())
            .map(|r| r.id().clone())
            .collect();

        for id in armed {
            self.with_record(&id, |r| r.tick(now));
        }
    }

    // ---------------------------------------------------------------
    // Process controller events
    // ---------------------------------------------------------------

    pub fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Starting { app_id } => self.on_process_starting(&app_id),
            ProcessEvent::Stopped { app_id } => self.on_process_stopped(&app_id),
            ProcessEvent::Failed {
                app_id,
                during_startup,
            } => self.on_process_failed(&app_id, during_startup),
            ProcessEvent::Suspended { app_id } => self.on_process_suspended(&app_id),
            ProcessEvent::FocusRequested { app_id } => self.on_focus_requested(&app_id),
            ProcessEvent::ResumeRequested { app_id } => self.on_resume_requested(&app_id),
        }
    }

    pub fn on_process_starting(&mut self, id: &AppId) {
        let id = AppId::normalized(id.as_str());
        debug!(app_id = %id, "Process starting");

        match self.index_of(&id) {
            None => {
                // launched behind our back
                let Some(descriptor) = self.controller.find_metadata(&id) else {
                    warn!(app_id = %id, "Unmanaged process starting without metadata");
                    return;
                };
                info!(app_id = %id, "Tracking externally launched application");
                let exempt = self.lifecycle.is_exempt(&id);
                let record =
                    ApplicationRecord::new(descriptor, Vec::new(), exempt, self.record_context());
                self.add(record);
                self.events.push(CoreEvent::FocusRequested {
                    app_id: id.clone(),
                });
            }
            Some(index) => {
                let record = &self.entries[index];
                match record.internal_state() {
                    InternalState::StoppedResumable => {
                        // relaunched from outside while we kept it around
                        self.events.push(CoreEvent::FocusRequested {
                            app_id: id.clone(),
                        });
                    }
                    InternalState::Starting if record.process_state() == ProcessState::Unknown => {}
                    state => {
                        debug!(
                            app_id = %id,
                            state = ?state,
                            process_state = ?record.process_state(),
                            "Duplicate process starting notification"
                        );
                        return;
                    }
                }
            }
        }

        self.with_record(&id, |r| r.on_process_event(ProcessState::Running));
    }

    pub fn on_process_failed(&mut self, id: &AppId, during_startup: bool) {
        let id = AppId::normalized(id.as_str());
        if self.index_of(&id).is_none() {
            warn!(app_id = %id, "Failure reported for unmanaged application");
            return;
        }
        info!(app_id = %id, during_startup, "Process failed");

        self.with_record(&id, |r| {
            r.on_process_event(ProcessState::Failed);
            r.set_pid(0);
        });
    }

    pub fn on_process_stopped(&mut self, id: &AppId) {
        let id = AppId::normalized(id.as_str());
        let Some(index) = self.index_of(&id) else {
            debug!(app_id = %id, "Stop reported for unmanaged application");
            return;
        };

        let record = &self.entries[index];
        let keep = matches!(
            record.state(),
            ApplicationState::Suspended | ApplicationState::Stopped
        ) && record.pid() == 0
            && record.can_be_resumed()
            && record.internal_state() != InternalState::Stopped;

        if keep {
            // exit already reported as a failure; stays resumable
            debug!(app_id = %id, "Keeping resumable application");
            return;
        }

        info!(app_id = %id, "Process stopped");
        self.with_record(&id, |r| r.on_process_event(ProcessState::Stopped));
        if let Some(index) = self.index_of(&id) {
            self.remove(index);
        }
    }

    pub fn on_process_suspended(&mut self, id: &AppId) {
        let id = AppId::normalized(id.as_str());
        if self
            .with_record(&id, |r| r.on_process_event(ProcessState::Suspended))
            .is_none()
        {
            debug!(app_id = %id, "Suspend reported for unmanaged application");
        }
    }

    pub fn on_focus_requested(&mut self, id: &AppId) {
        let id = AppId::normalized(id.as_str());
        debug!(app_id = %id, "Focus requested");
        self.events.push(CoreEvent::FocusRequested { app_id: id });
    }

    pub fn on_resume_requested(&mut self, id: &AppId) {
        let id = AppId::normalized(id.as_str());
        let suspended = self
            .find(&id)
            .is_some_and(|r| r.state() == ApplicationState::Suspended);
        if suspended {
            debug!(app_id = %id, "Resume requested");
            self.with_record(&id, |r| r.set_requested_state(RequestedState::Running));
        }
    }

    // ---------------------------------------------------------------
    // Session authorization and compositor events
    // ---------------------------------------------------------------

    /// Decide whether the process `pid` may open a graphical session.
    pub fn authorize_session(&mut self, pid: u32) -> bool {
        debug!(pid, "Authorizing session");

        let launched = self.entries.iter().position(|r| {
            r.internal_state() == InternalState::Starting && self.controller.has_process(r.id(), pid)
        });
        if let Some(index) = launched {
            self.entries[index].set_pid(pid);
            info!(app_id = %self.entries[index].id(), pid, "Session authorized");
            return true;
        }

        let command_line = match self.inspector.command_line(pid) {
            Ok(command_line) => command_line,
            Err(e) => {
                warn!(pid, error = %e, "Cannot inspect process, rejecting session");
                return false;
            }
        };

        let trusted = self
            .authorization
            .trusted_prefixes
            .iter()
            .any(|p| command_line.starts_with(p))
            || self
                .authorization
                .trusted_substrings
                .iter()
                .any(|s| command_line.contains(s));
        if trusted {
            info!(pid, command = %command_line.joined(), "Trusted helper authorized");
            self.helper_pids.insert(pid);
            return true;
        }

        let Some(hint) = command_line.value_of(&self.authorization.desktop_file_hint) else {
            warn!(pid, command = %command_line.joined(), "Unrecognized process, rejecting session");
            return false;
        };
        let Some(id) = app_id_from_desktop_hint(hint) else {
            warn!(pid, hint, "Malformed desktop file hint");
            return false;
        };

        if let Some(index) = self.index_of(&id) {
            let record = &mut self.entries[index];
            if record.internal_state() == InternalState::Starting {
                record.set_pid(pid);
                info!(app_id = %id, pid, "Session authorized by hint");
                return true;
            }
            warn!(app_id = %id, pid, state = ?record.internal_state(), "Hinted application is not starting, rejecting");
            return false;
        }

        let Some(descriptor) = self.controller.find_metadata(&id) else {
            warn!(app_id = %id, pid, "No metadata for hinted application, rejecting");
            return false;
        };

        let side = command_line.value_of(&self.authorization.stage_hint) == Some("side_stage");
        let arguments = command_line.args().iter().skip(1).cloned().collect();
        let exempt = self.lifecycle.is_exempt(&id);
        let mut record = ApplicationRecord::new(descriptor, arguments, exempt, self.record_context());
        record.set_pid(pid);
        if side {
            record.set_stage(Stage::Side);
        }

        info!(app_id = %id, pid, "Tracking self-identified application");
        self.add(record);
        true
    }

    /// Attach a new session to the record owning its pid.
    ///
    /// Returns the owning app id, or `None` for trusted helpers. Sessions
    /// from unknown processes, or from applications already running, are
    /// told to stop.
    pub fn session_starting(
        &mut self,
        session: Box<dyn SessionHandle>,
    ) -> LifecycleResult<Option<AppId>> {
        let pid = session.pid();
        debug!(pid, session_id = %session.id(), "Session starting");

        let attachable = self
            .entries
            .iter()
            .find(|r| r.pid() == pid && r.state() != ApplicationState::Running)
            .map(|r| r.id().clone());
        if let Some(id) = attachable {
            self.with_record(&id, |r| r.set_session(Some(session)));
            return Ok(Some(id));
        }

        if self.helper_pids.remove(&pid) {
            debug!(pid, "Helper session started");
            return Ok(None);
        }

        warn!(pid, "Session from unauthorized process, stopping it");
        session.stop();
        Err(LifecycleError::Unauthorized { pid })
    }

    pub fn session_state_changed(&mut self, session_id: SessionId, state: SessionState) {
        let Some(id) = self.id_for_session(session_id) else {
            debug!(session_id = %session_id, state = ?state, "Event for unknown session");
            return;
        };

        self.with_record(&id, |r| {
            r.on_session_event(state);
            if state == SessionState::Stopped
                && matches!(
                    r.internal_state(),
                    InternalState::Stopped | InternalState::StoppedResumable
                )
            {
                r.set_session(None);
            }
        });
    }

    /// The compositor finished tearing a session down.
    pub fn session_close_completed(&mut self, session_id: SessionId) {
        if self.id_for_session(session_id).is_some() {
            debug!(session_id = %session_id, "Session close completed");
            self.session_state_changed(session_id, SessionState::Stopped);
        }
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn record_context(&self) -> RecordContext {
        RecordContext {
            controller: self.controller.clone(),
            wakelock: self.wakelock.clone(),
            close_timeout: self.lifecycle.close_timeout,
        }
    }

    fn index_of(&self, id: &AppId) -> Option<usize> {
        self.entries.iter().position(|r| r.id() == id)
    }

    fn id_for_session(&self, session_id: SessionId) -> Option<AppId> {
        self.entries
            .iter()
            .find(|r| r.session_id() == Some(session_id))
            .map(|r| r.id().clone())
    }

    /// Run `f` on a record, publish the fields it changed and evict it if
    /// it ended up stopped.
    fn with_record<R>(
        &mut self,
        id: &AppId,
        f: impl FnOnce(&mut ApplicationRecord) -> R,
    ) -> Option<R> {
        let index = self.index_of(id)?;
        let record = &mut self.entries[index];

        let before = Snapshot::of(record);
        let result = f(record);
        let after = Snapshot::of(record);
        let stopped = record.internal_state() == InternalState::Stopped;

        for field in before.changed_fields(&after) {
            self.events.push(CoreEvent::FieldChanged {
                app_id: id.clone(),
                field,
            });
        }

        if stopped {
            self.remove(index);
        }
        Some(result)
    }

    fn add(&mut self, record: ApplicationRecord) {
        debug!(app_id = %record.id(), "Adding application");
        let app_id = record.id().clone();
        self.entries.insert(0, record);
        self.events.push(CoreEvent::Added { index: 0, app_id });
        self.events.push(CoreEvent::CountChanged {
            count: self.entries.len(),
        });
    }

    fn remove(&mut self, index: usize) {
        let record = self.entries.remove(index);
        let app_id = record.id().clone();
        info!(app_id = %app_id, "Removing application");
        drop(record);

        self.events.push(CoreEvent::Removed {
            index,
            app_id: app_id.clone(),
        });
        self.events.push(CoreEvent::CountChanged {
            count: self.entries.len(),
        });

        if self.focused.as_ref() == Some(&app_id) {
            self.focused = None;
            self.events.push(CoreEvent::FocusChanged { app_id: None });
        }
    }
}

/// `/usr/share/applications/gallery-app.desktop` -> `gallery-app`
fn app_id_from_desktop_hint(hint: &str) -> Option<AppId> {
    let file = Path::new(hint).file_name()?.to_str()?;
    let id = file.strip_suffix(".desktop").unwrap_or(file);
    if id.is_empty() {
        None
    } else {
        Some(AppId::normalized(id))
    }
}

impl std::fmt::Debug for ApplicationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRegistry")
            .field("entries", &self.entries)
            .field("focused", &self.focused)
            .field("helper_pids", &self.helper_pids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_api::{SessionAction, SupportedStages};
    use tether_host_api::{
        AppDescriptor, ControllerCall, MockInspector, MockProcessController, MockSession,
        MockWakelockProvider,
    };

    struct Fixture {
        controller: Arc<MockProcessController>,
        inspector: Arc<MockInspector>,
        provider: MockWakelockProvider,
        registry: ApplicationRegistry,
    }

    fn fixture() -> Fixture {
        let controller = Arc::new(
            MockProcessController::new()
                .with_app("gallery-app")
                .with_app("camera-app")
                .with_app("unity8-dash"),
        );
        controller.add_app(
            AppDescriptor::new("webbrowser-app", "Browser", vec!["webbrowser-app".into()])
                .with_stages(Stage::Main, SupportedStages::SIDE),
        );
        let inspector = Arc::new(MockInspector::new());
        let provider = MockWakelockProvider::new();
        let registry = ApplicationRegistry::new(
            controller.clone(),
            inspector.clone(),
            Arc::new(provider.clone()),
            LifecyclePolicy::default(),
            AuthorizationPolicy::default(),
        );
        Fixture {
            controller,
            inspector,
            provider,
            registry,
        }
    }

    /// start -> process starting -> authorize -> session starting -> running
    fn run_app(fx: &mut Fixture, name: &str, pid: u32) -> MockSession {
        let id = AppId::new(name);
        fx.registry.start_application(&id, vec![]).unwrap();
        fx.controller.set_process(&id, pid);
        fx.registry.on_process_starting(&id);
        assert!(fx.registry.authorize_session(pid));

        let session = MockSession::new(pid);
        let attached = fx
            .registry
            .session_starting(Box::new(session.clone()))
            .unwrap();
        assert_eq!(attached, Some(id));

        session.set_state(SessionState::Running);
        fx.registry
            .session_state_changed(session.id(), SessionState::Running);
        session
    }

    fn state_changes(events: &[CoreEvent], id: &str) -> usize {
        events
            .iter()
            .filter(|e| {
                matches!(e, CoreEvent::FieldChanged { app_id, field: ModelField::State }
                    if app_id.as_str() == id)
            })
            .count()
    }

    #[test]
    fn start_to_running_round_trip() {
        let mut fx = fixture();
        run_app(&mut fx, "gallery-app", 100);

        let events = fx.registry.take_events();
        assert_eq!(
            &events[..2],
            &[
                CoreEvent::Added {
                    index: 0,
                    app_id: AppId::new("gallery-app")
                },
                CoreEvent::CountChanged { count: 1 },
            ]
        );
        assert_eq!(state_changes(&events, "gallery-app"), 1);

        let record = fx.registry.find(&AppId::new("gallery-app")).unwrap();
        assert_eq!(record.state(), ApplicationState::Running);
        assert_eq!(record.pid(), 100);
        assert!(record.can_be_resumed());
        assert!(fx.registry.wakelock_held());
        assert!(fx.provider.is_held());
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut fx = fixture();
        let id = AppId::new("gallery-app");
        fx.registry.start_application(&id, vec![]).unwrap();
        assert_eq!(
            fx.registry.start_application(&id, vec![]),
            Err(LifecycleError::AlreadyRunning(id))
        );
        assert_eq!(fx.registry.count(), 1);
    }

    #[test]
    fn start_without_metadata_fails() {
        let mut fx = fixture();
        let id = AppId::new("nonexistent");
        assert_eq!(
            fx.registry.start_application(&id, vec![]),
            Err(LifecycleError::InvalidMetadata(id))
        );
        assert!(fx.controller.calls().is_empty());
    }

    #[test]
    fn failed_launch_leaves_no_record() {
        let mut fx = fixture();
        *fx.controller.fail_start.lock().unwrap() = true;

        let result = fx.registry.start_application(&AppId::new("gallery-app"), vec![]);
        assert!(matches!(result, Err(LifecycleError::LaunchFailed { .. })));
        assert_eq!(fx.registry.count(), 0);
        assert!(!fx.provider.is_held());
    }

    #[test]
    fn long_ids_are_normalized() {
        let mut fx = fixture();
        fx.controller.add_app(AppDescriptor::new(
            "com.ubuntu.music_music",
            "Music",
            vec!["music".into()],
        ));

        let view = fx
            .registry
            .start_application(&AppId::new("com.ubuntu.music_music_1.2.3"), vec![])
            .unwrap();
        assert_eq!(view.app_id.as_str(), "com.ubuntu.music_music");
        assert!(fx.registry.find(&AppId::new("com.ubuntu.music_music_2.0")).is_some());
    }

    #[test]
    fn failure_during_startup_evicts_record() {
        let mut fx = fixture();
        let id = AppId::new("gallery-app");
        fx.registry.start_application(&id, vec![]).unwrap();
        fx.registry.take_events();

        fx.registry.on_process_failed(&id, true);

        assert_eq!(fx.registry.count(), 0);
        assert!(!fx.provider.is_held());
        assert!(fx.registry.take_events().contains(&CoreEvent::Removed {
            index: 0,
            app_id: id
        }));
    }

    #[test]
    fn focus_front_preserves_relative_order() {
        let mut fx = fixture();
        run_app(&mut fx, "gallery-app", 100);
        run_app(&mut fx, "camera-app", 200);
        fx.controller.add_app(AppDescriptor::new("notes-app", "Notes", vec!["notes".into()]));
        run_app(&mut fx, "notes-app", 300);
        fx.registry.take_events();

        // [notes, camera, gallery]
        fx.registry.move_to_focus_front(&AppId::new("gallery-app")).unwrap();

        let order: Vec<_> = fx
            .registry
            .views()
            .into_iter()
            .map(|v| v.app_id.to_string())
            .collect();
        assert_eq!(order, vec!["gallery-app", "notes-app", "camera-app"]);
        assert_eq!(fx.registry.focused_id(), Some(&AppId::new("gallery-app")));

        let events = fx.registry.take_events();
        assert_eq!(events[0], CoreEvent::Moved { from: 2, to: 0 });
        assert_eq!(
            events.last(),
            Some(&CoreEvent::FocusChanged {
                app_id: Some(AppId::new("gallery-app"))
            })
        );
    }

    #[test]
    fn focus_moves_flag_between_records() {
        let mut fx = fixture();
        run_app(&mut fx, "gallery-app", 100);
        run_app(&mut fx, "camera-app", 200);

        fx.registry.move_to_focus_front(&AppId::new("gallery-app")).unwrap();
        fx.registry.move_to_focus_front(&AppId::new("camera-app")).unwrap();

        assert!(fx.registry.find(&AppId::new("camera-app")).unwrap().is_focused());
        assert!(!fx.registry.find(&AppId::new("gallery-app")).unwrap().is_focused());
    }

    #[test]
    fn focus_unknown_app_fails() {
        let mut fx = fixture();
        assert_eq!(
            fx.registry.move_to_focus_front(&AppId::new("nope")),
            Err(LifecycleError::NotFound(AppId::new("nope")))
        );
    }

    #[test]
    fn unknown_pid_without_hint_is_rejected() {
        let mut fx = fixture();
        fx.inspector.set_command_line(999, vec!["/usr/bin/mystery"]);

        assert!(!fx.registry.authorize_session(999));
        assert!(!fx.registry.authorize_session(1000));
        assert_eq!(fx.registry.count(), 0);
    }

    #[test]
    fn trusted_helper_is_authorized_without_record() {
        let mut fx = fixture();
        fx.inspector.set_command_line(500, vec!["maliit-server", "-platform", "ubuntumirclient"]);

        assert!(fx.registry.authorize_session(500));
        assert_eq!(fx.registry.count(), 0);
        assert_eq!(
            fx.registry
                .session_starting(Box::new(MockSession::new(500)))
                .unwrap(),
            None
        );
    }

    #[test]
    fn desktop_hint_creates_unresumable_record() {
        let mut fx = fixture();
        fx.inspector.set_command_line(
            700,
            vec![
                "/usr/bin/webbrowser-app",
                "--desktop_file_hint=/usr/share/applications/webbrowser-app.desktop",
                "--stage_hint=side_stage",
            ],
        );

        assert!(fx.registry.authorize_session(700));

        let record = fx.registry.find(&AppId::new("webbrowser-app")).unwrap();
        assert_eq!(record.pid(), 700);
        assert_eq!(record.stage(), Stage::Side);
        assert_eq!(record.internal_state(), InternalState::Starting);
        assert!(!record.can_be_resumed());
    }

    #[test]
    fn desktop_hint_for_unknown_app_is_rejected() {
        let mut fx = fixture();
        fx.inspector
            .set_command_line(701, vec!["foo", "--desktop_file_hint=/tmp/unknown.desktop"]);
        assert!(!fx.registry.authorize_session(701));
        assert_eq!(fx.registry.count(), 0);
    }

    #[test]
    fn unauthorized_session_is_refused() {
        let mut fx = fixture();
        let session = MockSession::new(4321);
        let result = fx.registry.session_starting(Box::new(session.clone()));
        assert_eq!(result, Err(LifecycleError::Unauthorized { pid: 4321 }));
        assert_eq!(session.last_action(), Some(SessionAction::Stop));
    }

    #[test]
    fn second_session_of_running_app_is_refused() {
        let mut fx = fixture();
        let first = run_app(&mut fx, "gallery-app", 100);

        let second = MockSession::new(100);
        let result = fx.registry.session_starting(Box::new(second.clone()));
        assert_eq!(result, Err(LifecycleError::Unauthorized { pid: 100 }));
        assert_eq!(second.last_action(), Some(SessionAction::Stop));

        let record = fx.registry.find(&AppId::new("gallery-app")).unwrap();
        assert_eq!(record.session_id(), Some(first.id()));
    }

    #[test]
    fn suspend_and_resume_application() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");

        assert!(fx.registry.suspend_application(&id));
        assert_eq!(session.last_action(), Some(SessionAction::Suspend));

        session.set_state(SessionState::Suspended);
        fx.registry.session_state_changed(session.id(), SessionState::Suspended);
        fx.registry.on_process_suspended(&id);
        assert_eq!(fx.registry.find(&id).unwrap().state(), ApplicationState::Suspended);
        assert!(!fx.provider.is_held());

        assert!(fx.registry.resume_application(&id));
        assert_eq!(fx.registry.find(&id).unwrap().state(), ApplicationState::Running);
        assert_eq!(session.last_action(), Some(SessionAction::Resume));
        assert!(fx.provider.is_held());
    }

    #[test]
    fn exempt_apps_short_circuit_suspend() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "unity8-dash", 100);
        session.clear_actions();

        assert!(fx.registry.suspend_application(&AppId::new("unity8-dash")));
        let record = fx.registry.find(&AppId::new("unity8-dash")).unwrap();
        assert_eq!(record.requested_state(), RequestedState::Running);
        assert!(session.actions().is_empty());
        assert!(!fx.registry.suspend_application(&AppId::new("nope")));
    }

    #[test]
    fn stop_application_closes_then_evicts() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");

        fx.registry.stop_application(&id).unwrap();
        assert_eq!(session.last_action(), Some(SessionAction::Close));
        assert_eq!(fx.registry.count(), 1);

        session.set_state(SessionState::Stopped);
        fx.registry.session_close_completed(session.id());
        assert_eq!(fx.registry.count(), 0);
        assert!(!fx.provider.is_held());

        assert_eq!(
            fx.registry.stop_application(&id),
            Err(LifecycleError::NotFound(id))
        );
    }

    #[test]
    fn close_timeout_forces_stop() {
        let mut fx = fixture();
        run_app(&mut fx, "gallery-app", 100);
        fx.controller.clear_calls();

        fx.registry.stop_application(&AppId::new("gallery-app")).unwrap();
        fx.registry
            .tick(MonotonicInstant::now() + std::time::Duration::from_secs(5));
        fx.registry
            .tick(MonotonicInstant::now() + std::time::Duration::from_secs(10));

        let stops = fx
            .controller
            .count_calls(|c| matches!(c, ControllerCall::Stop(_)));
        assert_eq!(stops, 1);
    }

    #[test]
    fn killed_suspended_app_stays_resumable() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");
        fx.registry.suspend_application(&id);
        session.set_state(SessionState::Suspended);
        fx.registry.session_state_changed(session.id(), SessionState::Suspended);
        fx.registry.on_process_suspended(&id);

        // out-of-memory killer takes it down
        session.set_state(SessionState::Stopped);
        fx.registry.session_state_changed(session.id(), SessionState::Stopped);
        fx.registry.on_process_failed(&id, false);
        fx.registry.on_process_stopped(&id);

        let record = fx.registry.find(&id).unwrap();
        assert_eq!(record.internal_state(), InternalState::StoppedResumable);
        assert_eq!(record.pid(), 0);
        assert!(record.session().is_none());

        // bringing it back respawns the process
        fx.controller.clear_calls();
        assert!(fx.registry.resume_application(&id));
        assert_eq!(fx.registry.find(&id).unwrap().state(), ApplicationState::Starting);
        assert!(fx
            .controller
            .calls()
            .iter()
            .any(|c| matches!(c, ControllerCall::Start { .. })));

        // the new incarnation reports in and is tracked again
        fx.registry.on_process_starting(&id);
        let record = fx.registry.find(&id).unwrap();
        assert_eq!(record.internal_state(), InternalState::Starting);
        assert_eq!(record.process_state(), ProcessState::Running);
    }

    #[test]
    fn failed_respawn_leaves_nothing_behind() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");
        fx.registry.suspend_application(&id);
        session.set_state(SessionState::Suspended);
        fx.registry.session_state_changed(session.id(), SessionState::Suspended);
        fx.registry.on_process_suspended(&id);
        session.set_state(SessionState::Stopped);
        fx.registry.session_state_changed(session.id(), SessionState::Stopped);
        fx.registry.on_process_failed(&id, false);
        fx.registry.on_process_stopped(&id);

        *fx.controller.fail_start.lock().unwrap() = true;
        *fx.controller.fail_stop.lock().unwrap() = true;
        fx.registry.take_events();

        assert!(fx.registry.resume_application(&id));
        assert!(fx.registry.find(&id).is_none());
        assert_eq!(fx.registry.count(), 0);
        assert!(!fx.provider.is_held());
        assert!(fx
            .registry
            .take_events()
            .iter()
            .any(|e| matches!(e, CoreEvent::Removed { app_id, .. } if app_id == &id)));

        assert!(fx.registry.stop_application(&id).is_err());
    }

    #[test]
    fn duplicate_starting_keeps_suspended_process_state() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");
        fx.registry.suspend_application(&id);
        session.set_state(SessionState::Suspended);
        fx.registry.session_state_changed(session.id(), SessionState::Suspended);
        fx.registry.on_process_suspended(&id);
        fx.registry.take_events();

        fx.registry.on_process_starting(&id);

        let record = fx.registry.find(&id).unwrap();
        assert_eq!(record.internal_state(), InternalState::Suspended);
        assert_eq!(record.process_state(), ProcessState::Suspended);
        assert_eq!(record.invariant_violations(), 0);
        assert!(fx.registry.take_events().is_empty());
    }

    #[test]
    fn duplicate_starting_while_running_is_ignored() {
        let mut fx = fixture();
        run_app(&mut fx, "gallery-app", 100);
        let id = AppId::new("gallery-app");
        fx.registry.take_events();
        let passes = fx.registry.find(&id).unwrap().reconcile_passes();

        fx.registry.on_process_starting(&id);
        let record = fx.registry.find(&id).unwrap();
        assert_eq!(record.internal_state(), InternalState::Running);
        assert_eq!(record.reconcile_passes(), passes);
        assert!(fx.registry.take_events().is_empty());
    }

    #[test]
    fn crash_while_running_removes_record() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);

        session.set_state(SessionState::Stopped);
        fx.registry.session_state_changed(session.id(), SessionState::Stopped);

        assert_eq!(fx.registry.count(), 0);
        assert!(!fx.provider.is_held());
    }

    #[test]
    fn removing_focused_app_clears_focus() {
        let mut fx = fixture();
        let session = run_app(&mut fx, "gallery-app", 100);
        fx.registry.move_to_focus_front(&AppId::new("gallery-app")).unwrap();
        fx.registry.take_events();

        session.set_state(SessionState::Stopped);
        fx.registry.session_state_changed(session.id(), SessionState::Stopped);

        assert_eq!(fx.registry.focused_id(), None);
        assert!(fx
            .registry
            .take_events()
            .contains(&CoreEvent::FocusChanged { app_id: None }));
    }

    #[test]
    fn externally_launched_app_is_tracked() {
        let mut fx = fixture();
        fx.registry.on_process_starting(&AppId::new("camera-app"));

        let record = fx.registry.find(&AppId::new("camera-app")).unwrap();
        assert_eq!(record.internal_state(), InternalState::Starting);
        assert!(fx.registry.take_events().contains(&CoreEvent::FocusRequested {
            app_id: AppId::new("camera-app")
        }));
    }

    #[test]
    fn stage_changes_checked_against_supported_stages() {
        let mut fx = fixture();
        fx.registry
            .start_application(&AppId::new("webbrowser-app"), vec![])
            .unwrap();
        fx.registry
            .start_application(&AppId::new("gallery-app"), vec![])
            .unwrap();
        fx.registry.take_events();

        fx.registry
            .set_stage(&AppId::new("webbrowser-app"), Stage::Side)
            .unwrap();
        assert!(fx.registry.take_events().contains(&CoreEvent::FieldChanged {
            app_id: AppId::new("webbrowser-app"),
            field: ModelField::Stage
        }));

        assert_eq!(
            fx.registry.set_stage(&AppId::new("gallery-app"), Stage::Side),
            Err(LifecycleError::UnsupportedStage {
                app_id: AppId::new("gallery-app"),
                stage: Stage::Side
            })
        );
    }
}
