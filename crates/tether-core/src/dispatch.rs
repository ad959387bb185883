//! Single-owner lifecycle loop
//!
//! All registry mutation happens on one task. Shell requests, compositor
//! notifications and process controller events are queued to it as
//! messages; requests that need an answer carry a oneshot reply channel.
//! Session authorization can also be asked from a plain OS thread, which
//! blocks until the loop has decided.

use std::time::Duration;
use tether_api::{ApplicationView, SessionState, Stage};
use tether_host_api::{ProcessEvent, SessionHandle};
use tether_util::{AppId, MonotonicInstant, SessionId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{ApplicationRegistry, CoreEvent, LifecycleError, LifecycleResult};

type Reply<T> = oneshot::Sender<T>;

/// A message for the lifecycle loop
pub enum LifecycleRequest {
    Start {
        app_id: AppId,
        args: Vec<String>,
        reply: Reply<LifecycleResult<ApplicationView>>,
    },
    Stop {
        app_id: AppId,
        reply: Reply<LifecycleResult<()>>,
    },
    Focus {
        app_id: AppId,
        reply: Reply<LifecycleResult<()>>,
    },
    Suspend {
        app_id: AppId,
        reply: Reply<bool>,
    },
    Resume {
        app_id: AppId,
        reply: Reply<bool>,
    },
    SetExempt {
        app_id: AppId,
        exempt: bool,
        reply: Reply<LifecycleResult<()>>,
    },
    SetStage {
        app_id: AppId,
        stage: Stage,
        reply: Reply<LifecycleResult<()>>,
    },
    UpdateScreenshot {
        app_id: AppId,
        reply: Reply<LifecycleResult<()>>,
    },
    List {
        reply: Reply<Vec<ApplicationView>>,
    },
    Get {
        app_id: AppId,
        reply: Reply<Option<ApplicationView>>,
    },
    Health {
        reply: Reply<LoopHealth>,
    },
    AuthorizeSession {
        pid: u32,
        reply: Reply<bool>,
    },
    SessionStarting {
        session: Box<dyn SessionHandle>,
        reply: Reply<LifecycleResult<Option<AppId>>>,
    },
    SessionStateChanged {
        session_id: SessionId,
        state: SessionState,
    },
    SessionCloseCompleted {
        session_id: SessionId,
    },
    Shutdown,
}

/// Registry figures reported by the health check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopHealth {
    pub application_count: usize,
    pub wakelock_held: bool,
}

/// Cloneable sender side of the lifecycle loop
#[derive(Clone)]
pub struct LifecycleHandle {
    tx: mpsc::UnboundedSender<LifecycleRequest>,
}

impl LifecycleHandle {
    fn send(&self, request: LifecycleRequest) -> LifecycleResult<()> {
        self.tx.send(request).map_err(|_| LifecycleError::LoopClosed)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> LifecycleRequest,
    ) -> LifecycleResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await.map_err(|_| LifecycleError::LoopClosed)
    }

    pub async fn start_application(
        &self,
        app_id: AppId,
        args: Vec<String>,
    ) -> LifecycleResult<ApplicationView> {
        self.call(|reply| LifecycleRequest::Start {
            app_id,
            args,
            reply,
        })
        .await?
    }

    pub async fn stop_application(&self, app_id: AppId) -> LifecycleResult<()> {
        self.call(|reply| LifecycleRequest::Stop { app_id, reply })
            .await?
    }

    pub async fn move_to_focus_front(&self, app_id: AppId) -> LifecycleResult<()> {
        self.call(|reply| LifecycleRequest::Focus { app_id, reply })
            .await?
    }

    pub async fn suspend_application(&self, app_id: AppId) -> LifecycleResult<bool> {
        self.call(|reply| LifecycleRequest::Suspend { app_id, reply })
            .await
    }

    pub async fn resume_application(&self, app_id: AppId) -> LifecycleResult<bool> {
        self.call(|reply| LifecycleRequest::Resume { app_id, reply })
            .await
    }

    pub async fn set_exempt_from_lifecycle(
        &self,
        app_id: AppId,
        exempt: bool,
    ) -> LifecycleResult<()> {
        self.call(|reply| LifecycleRequest::SetExempt {
            app_id,
            exempt,
            reply,
        })
        .await?
    }

    pub async fn set_stage(&self, app_id: AppId, stage: Stage) -> LifecycleResult<()> {
        self.call(|reply| LifecycleRequest::SetStage {
            app_id,
            stage,
            reply,
        })
        .await?
    }

    pub async fn update_screenshot(&self, app_id: AppId) -> LifecycleResult<()> {
        self.call(|reply| LifecycleRequest::UpdateScreenshot { app_id, reply })
            .await?
    }

    pub async fn list_applications(&self) -> LifecycleResult<Vec<ApplicationView>> {
        self.call(|reply| LifecycleRequest::List { reply }).await
    }

    pub async fn get_application(&self, app_id: AppId) -> LifecycleResult<Option<ApplicationView>> {
        self.call(|reply| LifecycleRequest::Get { app_id, reply })
            .await
    }

    pub async fn health(&self) -> LifecycleResult<LoopHealth> {
        self.call(|reply| LifecycleRequest::Health { reply }).await
    }

    pub async fn authorize_session(&self, pid: u32) -> LifecycleResult<bool> {
        self.call(|reply| LifecycleRequest::AuthorizeSession { pid, reply })
            .await
    }

    /// Blocking round-trip for callers outside the async runtime.
    ///
    /// Must not be called from a runtime worker thread.
    pub fn authorize_session_blocking(&self, pid: u32) -> LifecycleResult<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(LifecycleRequest::AuthorizeSession { pid, reply })?;
        rx.blocking_recv().map_err(|_| LifecycleError::LoopClosed)
    }

    pub async fn session_starting(
        &self,
        session: Box<dyn SessionHandle>,
    ) -> LifecycleResult<Option<AppId>> {
        self.call(|reply| LifecycleRequest::SessionStarting { session, reply })
            .await?
    }

    pub fn session_state_changed(
        &self,
        session_id: SessionId,
        state: SessionState,
    ) -> LifecycleResult<()> {
        self.send(LifecycleRequest::SessionStateChanged { session_id, state })
    }

    pub fn session_close_completed(&self, session_id: SessionId) -> LifecycleResult<()> {
        self.send(LifecycleRequest::SessionCloseCompleted { session_id })
    }

    pub fn shutdown(&self) -> LifecycleResult<()> {
        self.send(LifecycleRequest::Shutdown)
    }
}

/// The owner task
pub struct LifecycleLoop {
    registry: ApplicationRegistry,
    requests: mpsc::UnboundedReceiver<LifecycleRequest>,
    process_events: mpsc::UnboundedReceiver<ProcessEvent>,
    events: mpsc::UnboundedSender<CoreEvent>,
    tick_interval: Duration,
}

impl LifecycleLoop {
    /// Create the loop and the handle used to talk to it.
    pub fn new(
        registry: ApplicationRegistry,
        process_events: mpsc::UnboundedReceiver<ProcessEvent>,
        events: mpsc::UnboundedSender<CoreEvent>,
        tick_interval: Duration,
    ) -> (Self, LifecycleHandle) {
        let (tx, requests) = mpsc::unbounded_channel();
        let lifecycle = Self {
            registry,
            requests,
            process_events,
            events,
            tick_interval,
        };
        (lifecycle, LifecycleHandle { tx })
    }

    /// Run until shutdown is requested or every handle is dropped.
    /// Returns the registry for inspection.
    pub async fn run(mut self) -> ApplicationRegistry {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut process_open = true;

        info!(tick = ?self.tick_interval, "Lifecycle loop running");

        loop {
            tokio::select! {
                // OS-reported facts go first so requests see them
                biased;

                event = self.process_events.recv(), if process_open => {
                    match event {
                        Some(event) => {
                            debug!(event = ?event, "Process event");
                            self.registry.handle_process_event(event);
                        }
                        None => {
                            warn!("Process controller event stream closed");
                            process_open = false;
                        }
                    }
                }

                request = self.requests.recv() => {
                    match request {
                        Some(LifecycleRequest::Shutdown) | None => break,
                        Some(request) => self.handle_request(request),
                    }
                }

                _ = ticker.tick() => {
                    self.registry.tick(MonotonicInstant::now());
                }
            }

            self.publish();
        }

        info!("Lifecycle loop stopped");
        self.publish();
        self.registry
    }

    fn publish(&mut self) {
        for event in self.registry.take_events() {
            // nobody listening is fine
            let _ = self.events.send(event);
        }
    }

    fn handle_request(&mut self, request: LifecycleRequest) {
        let registry = &mut self.registry;

        // a dropped reply receiver means the caller gave up
        match request {
            LifecycleRequest::Start {
                app_id,
                args,
                reply,
            } => {
                let _ = reply.send(registry.start_application(&app_id, args));
            }
            LifecycleRequest::Stop { app_id, reply } => {
                let _ = reply.send(registry.stop_application(&app_id));
            }
            LifecycleRequest::Focus { app_id, reply } => {
                let _ = reply.send(registry.move_to_focus_front(&app_id));
            }
            LifecycleRequest::Suspend { app_id, reply } => {
                let _ = reply.send(registry.suspend_application(&app_id));
            }
            LifecycleRequest::Resume { app_id, reply } => {
                let _ = reply.send(registry.resume_application(&app_id));
            }
            LifecycleRequest::SetExempt {
                app_id,
                exempt,
                reply,
            } => {
                let _ = reply.send(registry.set_exempt_from_lifecycle(&app_id, exempt));
            }
            LifecycleRequest::SetStage {
                app_id,
                stage,
                reply,
            } => {
                let _ = reply.send(registry.set_stage(&app_id, stage));
            }
            LifecycleRequest::UpdateScreenshot { app_id, reply } => {
                let _ = reply.send(registry.update_screenshot(&app_id));
            }
            LifecycleRequest::List { reply } => {
                let _ = reply.send(registry.views());
            }
            LifecycleRequest::Get { app_id, reply } => {
                let _ = reply.send(registry.find(&app_id).map(|r| r.view()));
            }
            LifecycleRequest::Health { reply } => {
                let _ = reply.send(LoopHealth {
                    application_count: registry.count(),
                    wakelock_held: registry.wakelock_held(),
                });
            }
            LifecycleRequest::AuthorizeSession { pid, reply } => {
                let approved = registry.authorize_session(pid);
                if reply.send(approved).is_err() {
                    warn!(pid, approved, "Authorization requester went away");
                }
            }
            LifecycleRequest::SessionStarting { session, reply } => {
                let _ = reply.send(registry.session_starting(session));
            }
            LifecycleRequest::SessionStateChanged { session_id, state } => {
                registry.session_state_changed(session_id, state);
            }
            LifecycleRequest::SessionCloseCompleted { session_id } => {
                registry.session_close_completed(session_id);
            }
            LifecycleRequest::Shutdown => {}
        }
    }
}
