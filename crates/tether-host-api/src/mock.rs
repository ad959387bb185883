//! Mock collaborators for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tether_api::{SessionAction, SessionState};
use tether_util::{AppId, SessionId};
use tokio::sync::mpsc;

use crate::{
    AppDescriptor, CommandLine, HostError, HostResult, ProcessController, ProcessEvent,
    ProcessInspector, SessionHandle, SystemWakelock, WakelockProvider,
};

/// A call made on [`MockProcessController`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerCall {
    Start { app_id: AppId, args: Vec<String> },
    Stop(AppId),
    Suspend(AppId),
    Resume(AppId),
    Terminate(u32),
}

/// Mock process controller for unit/integration testing
pub struct MockProcessController {
    catalog: Mutex<HashMap<AppId, AppDescriptor>>,
    processes: Mutex<HashMap<AppId, u32>>,
    calls: Arc<Mutex<Vec<ControllerCall>>>,
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
    event_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ProcessEvent>>>>,

    /// Configure start to fail
    pub fail_start: Arc<Mutex<bool>>,

    /// Configure stop to fail
    pub fail_stop: Arc<Mutex<bool>>,
}

impl MockProcessController {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            catalog: Mutex::new(HashMap::new()),
            processes: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(Vec::new())),
            event_tx: tx,
            event_rx: Arc::new(Mutex::new(Some(rx))),
            fail_start: Arc::new(Mutex::new(false)),
            fail_stop: Arc::new(Mutex::new(false)),
        }
    }

    /// Add a catalog entry with a trivial exec line
    pub fn with_app(self, app_id: &str) -> Self {
        self.add_app(AppDescriptor::new(app_id, app_id, vec![app_id.to_string()]));
        self
    }

    pub fn add_app(&self, descriptor: AppDescriptor) {
        self.catalog
            .lock()
            .unwrap()
            .insert(descriptor.app_id.clone(), descriptor);
    }

    /// Declare that `pid` belongs to the app
    pub fn set_process(&self, app_id: &AppId, pid: u32) {
        self.processes.lock().unwrap().insert(app_id.clone(), pid);
    }

    pub fn calls(&self) -> Vec<ControllerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Count of calls matching a predicate
    pub fn count_calls(&self, pred: impl Fn(&ControllerCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// Emit a process event as if the OS reported it
    pub fn emit(&self, event: ProcessEvent) {
        let _ = self.event_tx.send(event);
    }

    fn record(&self, call: ControllerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockProcessController {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessController for MockProcessController {
    fn start(&self, app_id: &AppId, args: &[String]) -> HostResult<()> {
        self.record(ControllerCall::Start {
            app_id: app_id.clone(),
            args: args.to_vec(),
        });
        if *self.fail_start.lock().unwrap() {
            return Err(HostError::LaunchFailed("Mock launch failure".into()));
        }
        Ok(())
    }

    fn stop(&self, app_id: &AppId) -> HostResult<()> {
        self.record(ControllerCall::Stop(app_id.clone()));
        if *self.fail_stop.lock().unwrap() {
            return Err(HostError::StopFailed("Mock stop failure".into()));
        }
        Ok(())
    }

    fn suspend(&self, app_id: &AppId) {
        self.record(ControllerCall::Suspend(app_id.clone()));
    }

    fn resume(&self, app_id: &AppId) {
        self.record(ControllerCall::Resume(app_id.clone()));
    }

    fn has_process(&self, app_id: &AppId, pid: u32) -> bool {
        self.processes.lock().unwrap().get(app_id) == Some(&pid)
    }

    fn find_metadata(&self, app_id: &AppId) -> Option<AppDescriptor> {
        self.catalog.lock().unwrap().get(app_id).cloned()
    }

    fn terminate(&self, pid: u32) -> HostResult<()> {
        self.record(ControllerCall::Terminate(pid));
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        self.event_rx
            .lock()
            .unwrap()
            .take()
            .expect("subscribe() can only be called once")
    }
}

/// Mock graphical session. Clones share state, so a test can keep one
/// clone as a probe after handing the other to the registry.
#[derive(Debug, Clone)]
pub struct MockSession {
    id: SessionId,
    pid: u32,
    state: Arc<Mutex<SessionState>>,
    actions: Arc<Mutex<Vec<SessionAction>>>,
}

impl MockSession {
    pub fn new(pid: u32) -> Self {
        Self {
            id: SessionId::new(),
            pid,
            state: Arc::new(Mutex::new(SessionState::Starting)),
            actions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Change the state the session reports
    pub fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn actions(&self) -> Vec<SessionAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn last_action(&self) -> Option<SessionAction> {
        self.actions.lock().unwrap().last().copied()
    }

    pub fn clear_actions(&self) {
        self.actions.lock().unwrap().clear();
    }

    fn record(&self, action: SessionAction) {
        self.actions.lock().unwrap().push(action);
    }
}

impl SessionHandle for MockSession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn suspend(&self) {
        self.record(SessionAction::Suspend);
    }

    fn resume(&self) {
        self.record(SessionAction::Resume);
    }

    fn close(&self) {
        self.record(SessionAction::Close);
    }

    fn stop(&self) {
        self.record(SessionAction::Stop);
    }
}

/// Mock process inspector backed by a pid -> argv table
#[derive(Default)]
pub struct MockInspector {
    command_lines: Mutex<HashMap<u32, CommandLine>>,
}

impl MockInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_command_line(&self, pid: u32, args: Vec<&str>) {
        self.command_lines
            .lock()
            .unwrap()
            .insert(pid, CommandLine::from(args));
    }
}

impl ProcessInspector for MockInspector {
    fn command_line(&self, pid: u32) -> HostResult<CommandLine> {
        self.command_lines
            .lock()
            .unwrap()
            .get(&pid)
            .cloned()
            .ok_or(HostError::NoSuchProcess(pid))
    }
}

/// Mock wakelock backend counting acquisitions and releases
#[derive(Debug, Clone, Default)]
pub struct MockWakelockProvider {
    acquired: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    /// Configure acquire to fail
    pub fail_acquire: Arc<Mutex<bool>>,
}

impl MockWakelockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Whether the system wakelock is currently held
    pub fn is_held(&self) -> bool {
        self.acquired() > self.released()
    }
}

#[derive(Debug)]
struct MockSystemWakelock {
    released: Arc<AtomicUsize>,
}

impl SystemWakelock for MockSystemWakelock {
    fn release(self: Box<Self>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

impl WakelockProvider for MockWakelockProvider {
    fn acquire(&self) -> HostResult<Box<dyn SystemWakelock>> {
        if *self.fail_acquire.lock().unwrap() {
            return Err(HostError::WakelockUnavailable("Mock wakelock failure".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSystemWakelock {
            released: self.released.clone(),
        }))
    }
}
