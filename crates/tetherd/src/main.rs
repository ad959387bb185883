//! tetherd - The tether application lifecycle service
//!
//! This is the main entry point for the tetherd service.
//! It wires together all the components:
//! - Configuration loading
//! - Process controller, inspector and wakelock backend (Linux)
//! - The lifecycle loop owning the application registry
//! - IPC endpoints for shells and compositors

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tether_api::{
    ClientInfo, Command, ErrorCode, ErrorInfo, Event, EventPayload, HealthStatus, Response,
    ResponsePayload,
};
use tether_config::{compositor_socket_beside, load_config, Policy};
use tether_core::{ApplicationRegistry, CoreEvent, LifecycleError, LifecycleHandle, LifecycleLoop};
use tether_host_api::{ProcessController, WakelockProvider};
use tether_host_linux::{
    InhibitWakelockProvider, LinuxProcessController, NoopWakelockProvider, ProcInspector,
};
use tether_ipc::{IpcServer, ServerMessage, SessionCommand, SessionTable};
use tether_util::{default_config_path, ClientId, RateLimiter, TetherError};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// tetherd - Application lifecycle service
#[derive(Parser, Debug)]
#[command(name = "tetherd")]
#[command(about = "Application lifecycle service for shells and compositors", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/tether/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Shell socket path override (or set TETHER_SOCKET env var)
    #[arg(short, long, env = "TETHER_SOCKET")]
    socket: Option<PathBuf>,

    /// Compositor socket path override (default: next to the shell socket)
    #[arg(long, env = "TETHER_COMPOSITOR_SOCKET")]
    compositor_socket: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    controller: Arc<LinuxProcessController>,
    lifecycle: LifecycleHandle,
    lifecycle_loop: Option<LifecycleLoop>,
    core_events: mpsc::UnboundedReceiver<CoreEvent>,
    sessions: SessionTable,
    session_tx: mpsc::UnboundedSender<SessionCommand>,
    session_rx: mpsc::UnboundedReceiver<SessionCommand>,
    ipc: Arc<IpcServer>,
    rate_limiter: RateLimiter,
}

/// What a command handler needs, shared by reference
struct Handlers<'a> {
    lifecycle: &'a LifecycleHandle,
    sessions: &'a SessionTable,
    session_tx: &'a mpsc::UnboundedSender<SessionCommand>,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let policy = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            applications = policy.applications.len(),
            "Configuration loaded"
        );

        let (socket_path, compositor_socket_path) = socket_paths(args, &policy);

        let controller = Arc::new(LinuxProcessController::new(
            policy.applications.clone(),
            policy.lifecycle.startup_grace,
        ));
        let process_events = controller.subscribe();

        let wakelock: Arc<dyn WakelockProvider> = if policy.wakelock.enabled {
            info!(command = ?policy.wakelock.command, "System wakelock enabled");
            Arc::new(InhibitWakelockProvider::new(policy.wakelock.command.clone()))
        } else {
            warn!("System wakelock disabled, device may sleep under running applications");
            Arc::new(NoopWakelockProvider)
        };

        let registry = ApplicationRegistry::new(
            controller.clone(),
            Arc::new(ProcInspector::new()),
            wakelock,
            policy.lifecycle.clone(),
            policy.authorization.clone(),
        );

        let (core_tx, core_events) = mpsc::unbounded_channel();
        let (lifecycle_loop, lifecycle) = LifecycleLoop::new(
            registry,
            process_events,
            core_tx,
            policy.lifecycle.tick_interval,
        );

        let mut ipc = IpcServer::new();
        ipc.bind(&socket_path, tether_api::ClientRole::Shell)
            .with_context(|| format!("Failed to bind {:?}", socket_path))?;
        ipc.bind(&compositor_socket_path, tether_api::ClientRole::Compositor)
            .with_context(|| format!("Failed to bind {:?}", compositor_socket_path))?;

        info!(
            socket_path = %socket_path.display(),
            compositor_socket_path = %compositor_socket_path.display(),
            "IPC server started"
        );

        let (session_tx, session_rx) = mpsc::unbounded_channel();

        // Rate limiter: 30 requests per second per client
        let rate_limiter = RateLimiter::new(30, Duration::from_secs(1));

        Ok(Self {
            controller,
            lifecycle,
            lifecycle_loop: Some(lifecycle_loop),
            core_events,
            sessions: SessionTable::new(),
            session_tx,
            session_rx,
            ipc: Arc::new(ipc),
            rate_limiter,
        })
    }

    async fn run(mut self) -> Result<()> {
        // Start process exit monitor
        let _monitor_handle = self.controller.start_monitor();

        let lifecycle_task: JoinHandle<ApplicationRegistry> = match self.lifecycle_loop.take() {
            Some(lifecycle_loop) => tokio::spawn(lifecycle_loop.run()),
            None => anyhow::bail!("Lifecycle loop already started"),
        };

        let mut ipc_messages = self
            .ipc
            .take_message_receiver()
            .await
            .context("IPC message receiver already taken")?;

        // Spawn IPC accept task
        let ipc_accept = self.ipc.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let rate_limiter = Mutex::new(self.rate_limiter);
        let ctx = Handlers {
            lifecycle: &self.lifecycle,
            sessions: &self.sessions,
            session_tx: &self.session_tx,
        };

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                // Registry notifications for subscribers
                Some(event) = self.core_events.recv() => {
                    debug!(event = ?event, "Broadcasting registry event");
                    self.ipc.broadcast_event(Event::new(event.into()));
                }

                // Session requests go only to the owning compositor
                Some(command) = self.session_rx.recv() => {
                    forward_session_command(&self.ipc, command).await;
                }

                Some(msg) = ipc_messages.recv() => {
                    handle_ipc_message(&ctx, &self.ipc, &rate_limiter, msg).await;
                }
            }
        }

        info!("Shutting down tetherd");
        self.ipc.broadcast_event(Event::new(EventPayload::Shutdown));

        if let Err(e) = self.lifecycle.shutdown() {
            warn!(error = %e, "Lifecycle loop already gone");
        }
        match lifecycle_task.await {
            // dropping the registry releases the wakelock
            Ok(registry) => info!(applications = registry.count(), "Lifecycle loop finished"),
            Err(e) => error!(error = %e, "Lifecycle loop panicked"),
        }

        self.ipc.shutdown();
        info!("Shutdown complete");
        Ok(())
    }
}

/// Command-line socket overrides win over the config file. A shell socket
/// override without a compositor one moves both.
fn socket_paths(args: &Args, policy: &Policy) -> (PathBuf, PathBuf) {
    let socket_path = args
        .socket
        .clone()
        .unwrap_or_else(|| policy.daemon.socket_path.clone());

    let compositor_socket_path = match (&args.compositor_socket, &args.socket) {
        (Some(path), _) => path.clone(),
        (None, Some(socket)) => compositor_socket_beside(socket),
        (None, None) => policy.daemon.compositor_socket_path.clone(),
    };

    (socket_path, compositor_socket_path)
}

async fn forward_session_command(ipc: &IpcServer, command: SessionCommand) {
    debug!(
        client_id = %command.client_id,
        session_id = %command.session_id,
        action = ?command.action,
        "Forwarding session request"
    );
    let event = Event::new(EventPayload::SessionRequest {
        session_id: command.session_id,
        action: command.action,
    });
    if let Err(e) = ipc.send_event(&command.client_id, event).await {
        warn!(
            client_id = %command.client_id,
            session_id = %command.session_id,
            error = %e,
            "Compositor unreachable for session request"
        );
    }
}

async fn handle_ipc_message(
    ctx: &Handlers<'_>,
    ipc: &IpcServer,
    rate_limiter: &Mutex<RateLimiter>,
    msg: ServerMessage,
) {
    match msg {
        ServerMessage::Request { client_id, request } => {
            let allowed = rate_limiter.lock().await.check(&client_id);
            if !allowed {
                let response =
                    Response::error(request.request_id, rejection(TetherError::RateLimited));
                let _ = ipc.send_response(&client_id, response).await;
                return;
            }

            let Some(client) = ipc.get_client_info(&client_id).await else {
                debug!(client_id = %client_id, "Request from departed client dropped");
                return;
            };

            let response = match handle_command(ctx, &client, request.command).await {
                Ok(payload) => Response::success(request.request_id, payload),
                Err(error) => Response::error(request.request_id, error),
            };

            let _ = ipc.send_response(&client_id, response).await;
        }

        ServerMessage::ClientConnected { client_id, info } => {
            info!(
                client_id = %client_id,
                role = ?info.role,
                uid = ?info.uid,
                pid = ?info.pid,
                "Client connected"
            );
        }

        ServerMessage::ClientDisconnected { client_id } => {
            debug!(client_id = %client_id, "Client disconnected");
            rate_limiter.lock().await.remove_client(&client_id);
            orphan_sessions(ctx, &client_id);
        }
    }
}

/// Sessions of a vanished compositor are gone as far as anyone can tell
fn orphan_sessions(ctx: &Handlers<'_>, client_id: &ClientId) {
    for session_id in ctx.sessions.orphan_client(client_id) {
        info!(session_id = %session_id, "Session lost with its compositor");
        let _ = ctx
            .lifecycle
            .session_state_changed(session_id, tether_api::SessionState::Stopped);
    }
}

async fn handle_command(
    ctx: &Handlers<'_>,
    client: &ClientInfo,
    command: Command,
) -> Result<ResponsePayload, ErrorInfo> {
    check_role(client, &command).map_err(rejection)?;
    let lifecycle = ctx.lifecycle;

    let payload = match command {
        Command::ListApplications => ResponsePayload::Applications {
            applications: lifecycle.list_applications().await.map_err(lifecycle_error)?,
        },

        Command::GetApplication { app_id } => {
            match lifecycle
                .get_application(app_id.clone())
                .await
                .map_err(lifecycle_error)?
            {
                Some(view) => ResponsePayload::Application(view),
                None => return Err(rejection(TetherError::AppNotFound(app_id))),
            }
        }

        Command::StartApplication { app_id, args } => {
            info!(app_id = %app_id, client_id = %client.client_id, "Start requested");
            let view = lifecycle
                .start_application(app_id, args)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Started(view)
        }

        Command::StopApplication { app_id } => {
            info!(app_id = %app_id, client_id = %client.client_id, "Stop requested");
            lifecycle
                .stop_application(app_id)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Ack
        }

        Command::FocusApplication { app_id } => {
            lifecycle
                .move_to_focus_front(app_id)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Ack
        }

        Command::SuspendApplication { app_id } => ResponsePayload::Accepted {
            accepted: lifecycle
                .suspend_application(app_id)
                .await
                .map_err(lifecycle_error)?,
        },

        Command::ResumeApplication { app_id } => ResponsePayload::Accepted {
            accepted: lifecycle
                .resume_application(app_id)
                .await
                .map_err(lifecycle_error)?,
        },

        Command::SetExemptFromLifecycle { app_id, exempt } => {
            lifecycle
                .set_exempt_from_lifecycle(app_id, exempt)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Ack
        }

        Command::SetStage { app_id, stage } => {
            lifecycle
                .set_stage(app_id, stage)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Ack
        }

        Command::UpdateScreenshot { app_id } => {
            lifecycle
                .update_screenshot(app_id)
                .await
                .map_err(lifecycle_error)?;
            ResponsePayload::Ack
        }

        // The IPC layer already flipped the subscription flag
        Command::SubscribeEvents => ResponsePayload::Subscribed {
            client_id: client.client_id,
        },
        Command::UnsubscribeEvents => ResponsePayload::Unsubscribed,

        Command::GetHealth => {
            let health = lifecycle.health().await.map_err(lifecycle_error)?;
            ResponsePayload::Health(HealthStatus {
                live: true,
                ready: true,
                application_count: health.application_count,
                wakelock_held: health.wakelock_held,
            })
        }

        Command::AuthorizeSession { pid } => ResponsePayload::Authorization {
            approved: lifecycle
                .authorize_session(pid)
                .await
                .map_err(lifecycle_error)?,
        },

        Command::SessionStarting { session_id, pid } => {
            ctx.sessions.register(session_id, client.client_id, pid);
            let session = ctx
                .sessions
                .handle(session_id, ctx.session_tx.clone())
                .ok_or_else(|| rejection(TetherError::internal("Session vanished on register")))?;

            match lifecycle
                .session_starting(Box::new(session))
                .await
                .map_err(lifecycle_error)?
            {
                Some(app_id) => ResponsePayload::SessionAttached { app_id },
                None => ResponsePayload::Ack,
            }
        }

        Command::SessionStateChanged { session_id, state } => {
            if owns_session(ctx, client, &session_id)? {
                ctx.sessions.set_state(&session_id, state);
                lifecycle
                    .session_state_changed(session_id, state)
                    .map_err(lifecycle_error)?;
            }
            ResponsePayload::Ack
        }

        Command::SessionCloseCompleted { session_id } => {
            if owns_session(ctx, client, &session_id)? {
                ctx.sessions.set_state(&session_id, tether_api::SessionState::Stopped);
                lifecycle
                    .session_close_completed(session_id)
                    .map_err(lifecycle_error)?;
            }
            ResponsePayload::Ack
        }

        Command::Ping => ResponsePayload::Pong,
    };

    Ok(payload)
}

/// Untracked sessions (helpers, refused ones) are silently ignored
fn owns_session(
    ctx: &Handlers<'_>,
    client: &ClientInfo,
    session_id: &tether_util::SessionId,
) -> Result<bool, ErrorInfo> {
    match ctx.sessions.owner(session_id) {
        None => {
            debug!(session_id = %session_id, "Report for untracked session ignored");
            Ok(false)
        }
        Some(owner) if owner == client.client_id => Ok(true),
        Some(_) => Err(rejection(TetherError::permission(format!(
            "Session {} belongs to another compositor",
            session_id
        )))),
    }
}

fn check_role(client: &ClientInfo, command: &Command) -> tether_util::Result<()> {
    if command.is_control_command() && !client.role.can_control() {
        return Err(TetherError::permission(format!(
            "{:?} clients cannot change application state",
            client.role
        )));
    }
    if command.is_compositor_command() && !client.role.can_manage_sessions() {
        return Err(TetherError::permission(format!(
            "{:?} clients cannot manage sessions",
            client.role
        )));
    }
    Ok(())
}

fn rejection(err: TetherError) -> ErrorInfo {
    let code = match err {
        TetherError::AppNotFound(_) => ErrorCode::NotFound,
        TetherError::PermissionDenied(_) => ErrorCode::PermissionDenied,
        TetherError::RateLimited => ErrorCode::RateLimited,
        TetherError::Internal(_) => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, err.to_string())
}

fn lifecycle_error(err: LifecycleError) -> ErrorInfo {
    let code = match err {
        LifecycleError::AlreadyRunning(_) => ErrorCode::AlreadyRunning,
        LifecycleError::LaunchFailed { .. } => ErrorCode::LaunchFailed,
        LifecycleError::InvalidMetadata(_) => ErrorCode::InvalidMetadata,
        LifecycleError::NotFound(_) => ErrorCode::NotFound,
        LifecycleError::Unauthorized { .. } => ErrorCode::Unauthorized,
        LifecycleError::UnsupportedStage { .. } => ErrorCode::UnsupportedStage,
        LifecycleError::LoopClosed => ErrorCode::InternalError,
    };
    ErrorInfo::new(code, err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "tetherd starting");

    let service = Service::new(&args).await?;
    service.run().await
}
