//! Per-application lifecycle state machine
//!
//! An [`ApplicationRecord`] reconciles three independent inputs:
//!
//! - the state the shell *requests* (running or suspended),
//! - what the process controller reports about the OS process,
//! - what the compositor reports about the graphical session,
//!
//! into one of nine internal states, and drives the side effects that
//! follow from each transition (session suspend/resume/close, process
//! suspend/resume/respawn/stop, the shared wakelock and the close timer).
//!
//! Precondition violations never panic: they are logged at error level,
//! counted, and the offending step is skipped.

use std::sync::Arc;
use tether_api::{
    ApplicationState, ApplicationView, InternalState, ProcessState, RequestedState,
    SessionState, Stage,
};
use tether_host_api::{AppDescriptor, ProcessController, SessionHandle};
use tether_util::{AppId, MonotonicInstant, SessionId};
use tracing::{debug, error, info, warn};

use crate::{CloseTimer, SharedWakelock, WakelockOwner};

/// Collaborators shared by every record
#[derive(Clone)]
pub struct RecordContext {
    pub controller: Arc<dyn ProcessController>,
    pub wakelock: SharedWakelock,
    pub close_timeout: std::time::Duration,
}

pub struct ApplicationRecord {
    id: AppId,
    descriptor: AppDescriptor,
    arguments: Vec<String>,
    state: InternalState,
    requested: RequestedState,
    process_state: ProcessState,
    pid: u32,
    session: Option<Box<dyn SessionHandle>>,
    exempt: bool,
    stage: Stage,
    focused: bool,
    screenshot_generation: u64,
    close_timer: CloseTimer,
    wakelock_owner: WakelockOwner,
    ctx: RecordContext,
    reconcile_passes: u64,
    invariant_violations: u64,
}

impl ApplicationRecord {
    /// Create a record in the Starting state.
    pub fn new(
        descriptor: AppDescriptor,
        arguments: Vec<String>,
        exempt: bool,
        ctx: RecordContext,
    ) -> Self {
        let mut record = Self {
            id: descriptor.app_id.clone(),
            stage: descriptor.stage,
            descriptor,
            arguments,
            state: InternalState::Starting,
            requested: RequestedState::Running,
            process_state: ProcessState::Unknown,
            pid: 0,
            session: None,
            exempt,
            focused: false,
            screenshot_generation: 0,
            close_timer: CloseTimer::new(ctx.close_timeout),
            wakelock_owner: WakelockOwner::new(),
            ctx,
            reconcile_passes: 0,
            invariant_violations: 0,
        };
        record.sync_wakelock();
        debug!(app_id = %record.id, exempt, "Application record created");
        record
    }

    pub fn id(&self) -> &AppId {
        &self.id
    }

    pub fn descriptor(&self) -> &AppDescriptor {
        &self.descriptor
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub fn internal_state(&self) -> InternalState {
        self.state
    }

    pub fn state(&self) -> ApplicationState {
        self.state.public()
    }

    pub fn requested_state(&self) -> RequestedState {
        self.requested
    }

    pub fn process_state(&self) -> ProcessState {
        self.process_state
    }

    pub fn can_be_resumed(&self) -> bool {
        self.process_state != ProcessState::Unknown
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn set_pid(&mut self, pid: u32) {
        if self.pid != pid {
            debug!(app_id = %self.id, old = self.pid, new = pid, "Pid changed");
            self.pid = pid;
        }
    }

    pub fn session(&self) -> Option<&dyn SessionHandle> {
        self.session.as_deref()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id())
    }

    pub fn is_exempt_from_lifecycle(&self) -> bool {
        self.exempt
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn screenshot_generation(&self) -> u64 {
        self.screenshot_generation
    }

    pub fn close_timer(&self) -> &CloseTimer {
        &self.close_timer
    }

    pub fn wakelock_owner(&self) -> WakelockOwner {
        self.wakelock_owner
    }

    /// Number of reconciliation passes run so far
    pub fn reconcile_passes(&self) -> u64 {
        self.reconcile_passes
    }

    /// Number of precondition violations observed (and ignored)
    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations
    }

    pub fn view(&self) -> ApplicationView {
        ApplicationView {
            app_id: self.id.clone(),
            name: self.descriptor.name.clone(),
            comment: self.descriptor.comment.clone(),
            icon: self.descriptor.icon.clone(),
            state: self.state(),
            internal_state: self.state,
            requested_state: self.requested,
            process_state: self.process_state,
            pid: self.pid,
            focused: self.focused,
            stage: self.stage,
            supported_stages: self.descriptor.supported_stages.to_stages(),
            supported_orientations: self.descriptor.supported_orientations.to_orientations(),
            exempt_from_lifecycle: self.exempt,
            can_be_resumed: self.can_be_resumed(),
            screenshot_generation: self.screenshot_generation,
        }
    }

    // ---------------------------------------------------------------
    // Policy inputs
    // ---------------------------------------------------------------

    pub fn set_requested_state(&mut self, value: RequestedState) {
        if self.requested == value {
            return;
        }
        debug!(app_id = %self.id, requested = ?value, "Requested state changed");
        self.requested = value;
        self.apply_requested_state();
    }

    pub fn set_exempt_from_lifecycle(&mut self, exempt: bool) {
        if self.exempt == exempt {
            return;
        }
        info!(app_id = %self.id, exempt, "Lifecycle exemption changed");
        self.exempt = exempt;
        self.sync_wakelock();
    }

    pub(crate) fn set_focused(&mut self, focused: bool) -> bool {
        let changed = self.focused != focused;
        self.focused = focused;
        changed
    }

    /// Only stages the application declares support for are accepted.
    pub fn set_stage(&mut self, stage: Stage) -> bool {
        if !self.descriptor.supported_stages.supports(stage) {
            warn!(app_id = %self.id, stage = ?stage, "Unsupported stage requested");
            return false;
        }
        if self.stage != stage {
            debug!(app_id = %self.id, stage = ?stage, "Stage changed");
            self.stage = stage;
        }
        true
    }

    pub fn update_screenshot(&mut self) {
        self.screenshot_generation += 1;
    }

    /// Gracefully close the application.
    pub fn close(&mut self) {
        use InternalState::*;
        debug!(app_id = %self.id, state = ?self.state, "Close requested");

        match self.state {
            Starting => self.stop(),
            Running => self.do_close(),
            RunningInBackground | SuspendingWaitSession | SuspendingWaitProcess | Suspended => {
                // the session must be awake to close cleanly
                self.set_requested_state(RequestedState::Running);
                self.do_close();
            }
            Closing => {}
            StoppedResumable => self.set_internal_state(Stopped),
            Stopped => {}
        }
    }

    /// Advance the close timer; returns `true` if it fired.
    pub fn tick(&mut self, now: MonotonicInstant) -> bool {
        if self.close_timer.poll_expired(now) {
            info!(
                app_id = %self.id,
                timeout = %tether_util::format_duration(self.close_timer.timeout()),
                "Application did not close in time, stopping it"
            );
            self.stop();
            true
        } else {
            false
        }
    }

    // ---------------------------------------------------------------
    // Collaborator events
    // ---------------------------------------------------------------

    pub fn on_process_event(&mut self, new_state: ProcessState) {
        use InternalState::*;

        if self.process_state == new_state {
            return;
        }
        debug!(
            app_id = %self.id,
            from = ?self.process_state,
            to = ?new_state,
            "Process state changed"
        );
        self.process_state = new_state;

        match new_state {
            ProcessState::Unknown => {
                self.violation("process state cannot go back to unknown");
            }
            ProcessState::Running => {
                if self.state == StoppedResumable {
                    self.set_internal_state(Starting);
                }
            }
            ProcessState::Suspended => {
                if self.state == Closing {
                    // suspending now would stall the close; undo it
                    self.ctx.controller.resume(&self.id);
                } else {
                    self.set_internal_state(Suspended);
                }
            }
            ProcessState::Failed => {
                self.check_session_stopped("process failed");
                match self.state {
                    // failed before showing anything; cannot be resumed
                    Starting => self.set_internal_state(Stopped),
                    Stopped | StoppedResumable => {}
                    other => self.violation(&format!("process failed while {:?}", other)),
                }
            }
            ProcessState::Stopped => {
                self.check_session_stopped("process stopped");
                match self.state {
                    Starting | StoppedResumable | Closing => self.set_internal_state(Stopped),
                    // a suspend handshake that never completed behaves like a close
                    SuspendingWaitProcess => self.set_internal_state(Stopped),
                    Stopped => {}
                    other => self.violation(&format!("process stopped while {:?}", other)),
                }
            }
        }

        self.apply_requested_state();
    }

    pub fn on_session_event(&mut self, new_state: SessionState) {
        use InternalState::*;
        debug!(app_id = %self.id, session = ?new_state, state = ?self.state, "Session state changed");

        match new_state {
            SessionState::Starting | SessionState::Suspending => {}
            SessionState::Running => {
                if self.state == Starting {
                    self.set_internal_state(Running);
                    // a suspend requested during startup can now be honored
                    self.apply_requested_state();
                }
            }
            SessionState::Suspended => {
                if self.state != SuspendingWaitSession {
                    self.violation(&format!("session suspended while {:?}", self.state));
                    return;
                }
                self.set_internal_state(SuspendingWaitProcess);
                self.ctx.controller.suspend(&self.id);
            }
            SessionState::Stopped => {
                if self.state == SuspendingWaitProcess
                    && self.process_state != ProcessState::Failed
                {
                    // session died mid-suspend: finish by closing gracefully
                    self.do_close();
                    self.ctx.controller.resume(&self.id);
                } else if !self.can_be_resumed() || matches!(self.state, Starting | Running | Closing) {
                    self.set_internal_state(Stopped);
                } else {
                    self.set_internal_state(StoppedResumable);
                }
            }
        }
    }

    /// Attach or detach the graphical session.
    pub fn set_session(&mut self, session: Option<Box<dyn SessionHandle>>) {
        use InternalState::*;

        if session.is_none() && !matches!(self.state, Stopped | StoppedResumable) {
            self.violation(&format!("session removed while {:?}", self.state));
            return;
        }

        if let Some(old) = &self.session {
            debug!(app_id = %self.id, session_id = %old.id(), "Session detached");
        }
        self.session = session;

        if let Some(session) = &self.session {
            debug!(app_id = %self.id, session_id = %session.id(), pid = session.pid(), "Session attached");
            match self.state {
                Starting | Running | RunningInBackground | Closing => session.resume(),
                SuspendingWaitSession | SuspendingWaitProcess | Suspended => session.suspend(),
                Stopped | StoppedResumable => session.stop(),
            }
        }
    }

    // ---------------------------------------------------------------
    // Reconciliation
    // ---------------------------------------------------------------

    fn apply_requested_state(&mut self) {
        use InternalState::*;
        self.reconcile_passes += 1;

        match self.requested {
            RequestedState::Running => match self.state {
                // already heading there, or must finish the current transition
                Starting | Running | SuspendingWaitProcess | Closing => {}
                RunningInBackground | SuspendingWaitSession | Suspended => self.resume(),
                StoppedResumable => self.respawn(),
                Stopped => {}
            },
            RequestedState::Suspended => match self.state {
                Starting | Closing => {}
                Running => {
                    if self.process_state == ProcessState::Running {
                        self.suspend();
                    } else if self.process_state != ProcessState::Unknown {
                        self.violation(&format!(
                            "running with process {:?}",
                            self.process_state
                        ));
                    }
                }
                RunningInBackground | SuspendingWaitSession | SuspendingWaitProcess
                | Suspended => {}
                StoppedResumable | Stopped => {}
            },
        }
    }

    fn suspend(&mut self) {
        if self.state != InternalState::Running {
            self.violation(&format!("suspend while {:?}", self.state));
            return;
        }
        let Some(session) = &self.session else {
            self.violation("suspend without a session");
            return;
        };

        if self.exempt {
            self.set_internal_state(InternalState::RunningInBackground);
        } else {
            session.suspend();
            self.set_internal_state(InternalState::SuspendingWaitSession);
        }
    }

    fn resume(&mut self) {
        use InternalState::*;

        match self.state {
            Suspended | SuspendingWaitProcess => {
                self.set_internal_state(Running);
                self.ctx.controller.resume(&self.id);
                if self.process_state == ProcessState::Suspended {
                    self.process_state = ProcessState::Running;
                }
                self.resume_session();
            }
            SuspendingWaitSession => {
                // process suspend handshake never happened
                self.set_internal_state(Running);
                self.resume_session();
            }
            RunningInBackground => self.set_internal_state(Running),
            other => self.violation(&format!("resume while {:?}", other)),
        }
    }

    fn resume_session(&mut self) {
        match &self.session {
            Some(session) => session.resume(),
            None => self.violation("resume without a session"),
        }
    }

    fn respawn(&mut self) {
        info!(app_id = %self.id, "Respawning application");
        // the previous incarnation is gone
        self.pid = 0;
        self.process_state = ProcessState::Unknown;
        self.set_internal_state(InternalState::Starting);

        if let Err(e) = self.ctx.controller.start(&self.id, &self.arguments) {
            error!(app_id = %self.id, error = %e, "Failed to respawn application");
            // no process will ever report back
            self.set_internal_state(InternalState::Stopped);
        }
    }

    fn do_close(&mut self) {
        if self.close_timer.is_armed() {
            self.violation("close while the close timer is armed");
            return;
        }
        let Some(session) = &self.session else {
            self.violation("close without a session");
            return;
        };

        session.close();
        self.close_timer.arm(MonotonicInstant::now());
        self.set_internal_state(InternalState::Closing);
    }

    /// Force-terminate through the process controller.
    fn stop(&mut self) {
        self.close_timer.cancel();

        if let Err(e) = self.ctx.controller.stop(&self.id) {
            warn!(app_id = %self.id, error = %e, "Process controller failed to stop application");
            if self.pid > 0 {
                warn!(app_id = %self.id, pid = self.pid, "Sending SIGTERM directly");
                if let Err(e) = self.ctx.controller.terminate(self.pid) {
                    error!(app_id = %self.id, pid = self.pid, error = %e, "Failed to terminate process");
                }
            } else if self.state == InternalState::Starting
                && self.process_state == ProcessState::Unknown
            {
                // launch never produced a process; nothing left to wait for
                self.set_internal_state(InternalState::Stopped);
            }
        }
    }

    fn set_internal_state(&mut self, new_state: InternalState) {
        if self.state == new_state {
            return;
        }
        debug!(app_id = %self.id, from = ?self.state, to = ?new_state, "Internal state changed");

        let old = self.state;
        self.state = new_state;

        if old == InternalState::Closing {
            if let Some(left) = self.close_timer.remaining(MonotonicInstant::now()) {
                debug!(
                    app_id = %self.id,
                    remaining = %tether_util::format_duration(left),
                    "Closed before the timeout"
                );
            }
            self.close_timer.cancel();
        }
        self.sync_wakelock();
    }

    fn sync_wakelock(&self) {
        if !self.exempt && self.state.holds_wakelock() {
            self.ctx.wakelock.acquire(self.wakelock_owner);
        } else {
            self.ctx.wakelock.release(self.wakelock_owner);
        }
    }

    fn check_session_stopped(&mut self, what: &str) {
        match self.session.as_ref().map(|s| s.state()) {
            Some(SessionState::Stopped) | None => {}
            Some(state) => {
                self.violation(&format!("{} while the session is {:?}", what, state));
            }
        }
    }

    fn violation(&mut self, what: &str) {
        self.invariant_violations += 1;
        error!(
            app_id = %self.id,
            state = ?self.state,
            process_state = ?self.process_state,
            "Lifecycle invariant violated: {}",
            what
        );
    }
}

impl Drop for ApplicationRecord {
    fn drop(&mut self) {
        self.ctx.wakelock.release(self.wakelock_owner);
    }
}

impl std::fmt::Debug for ApplicationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationRecord")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("requested", &self.requested)
            .field("process_state", &self.process_state)
            .field("pid", &self.pid)
            .field("session", &self.session_id())
            .field("exempt", &self.exempt)
            .finish()
    }
}
