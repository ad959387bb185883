//! Integration tests for tetherd
//!
//! These tests drive the lifecycle core through complete scenarios with
//! mock collaborators, and the IPC layer over a real Unix socket.

use std::sync::Arc;
use std::time::Duration;
use tether_api::{
    ApplicationState, ClientRole, Command, EventPayload, ModelField, ResponsePayload,
    ResponseResult, SessionAction, SessionState,
};
use tether_config::{parse_config, AuthorizationPolicy, LifecyclePolicy};
use tether_core::{ApplicationRegistry, CoreEvent, LifecycleLoop};
use tether_host_api::{
    ControllerCall, MockInspector, MockProcessController, MockSession, MockWakelockProvider,
    ProcessController, ProcessEvent, SessionHandle,
};
use tether_ipc::{IpcClient, IpcServer, ServerMessage, SessionTable};
use tether_util::AppId;
use tokio::sync::mpsc;

struct Harness {
    controller: Arc<MockProcessController>,
    inspector: Arc<MockInspector>,
    provider: MockWakelockProvider,
    registry: ApplicationRegistry,
}

fn harness(lifecycle: LifecyclePolicy) -> Harness {
    let controller = Arc::new(
        MockProcessController::new()
            .with_app("dialer-app")
            .with_app("gallery-app")
            .with_app("camera-app"),
    );
    let inspector = Arc::new(MockInspector::new());
    let provider = MockWakelockProvider::new();
    let registry = ApplicationRegistry::new(
        controller.clone(),
        inspector.clone(),
        Arc::new(provider.clone()),
        lifecycle,
        AuthorizationPolicy::default(),
    );
    Harness {
        controller,
        inspector,
        provider,
        registry,
    }
}

/// start -> process starting -> authorize -> session starting -> session running
fn launch(h: &mut Harness, name: &str, pid: u32) -> MockSession {
    let id = AppId::new(name);
    h.registry.start_application(&id, vec![]).unwrap();
    h.controller.set_process(&id, pid);
    h.registry.on_process_starting(&id);
    assert!(h.registry.authorize_session(pid));

    let session = MockSession::new(pid);
    let attached = h.registry.session_starting(Box::new(session.clone())).unwrap();
    assert_eq!(attached, Some(id));

    session.set_state(SessionState::Running);
    h.registry
        .session_state_changed(session.id(), SessionState::Running);
    session
}

fn order(registry: &ApplicationRegistry) -> Vec<String> {
    registry
        .views()
        .into_iter()
        .map(|v| v.app_id.as_str().to_string())
        .collect()
}

#[test]
fn test_launch_reaches_running_once() {
    let mut h = harness(LifecyclePolicy::default());
    launch(&mut h, "dialer-app", 100);

    let events = h.registry.take_events();
    let state_changes = events
        .iter()
        .filter(|e| matches!(e, CoreEvent::FieldChanged { field: ModelField::State, .. }))
        .count();
    assert_eq!(state_changes, 1);

    let record = h.registry.find(&AppId::new("dialer-app")).unwrap();
    assert_eq!(record.state(), ApplicationState::Running);
    assert!(record.can_be_resumed());
    assert!(h.registry.wakelock_held());
    assert!(h.provider.is_held());
}

#[test]
fn test_suspend_then_resume() {
    let mut h = harness(LifecyclePolicy::default());
    let session = launch(&mut h, "gallery-app", 200);
    let id = AppId::new("gallery-app");

    assert!(h.registry.suspend_application(&id));
    assert_eq!(session.last_action(), Some(SessionAction::Suspend));

    session.set_state(SessionState::Suspended);
    h.registry
        .session_state_changed(session.id(), SessionState::Suspended);
    assert_eq!(
        h.controller
            .count_calls(|c| matches!(c, ControllerCall::Suspend(_))),
        1
    );

    h.registry.on_process_suspended(&id);
    let record = h.registry.find(&id).unwrap();
    assert_eq!(record.state(), ApplicationState::Suspended);
    assert!(!h.provider.is_held());

    assert!(h.registry.resume_application(&id));
    let record = h.registry.find(&id).unwrap();
    assert_eq!(record.state(), ApplicationState::Running);
    assert_eq!(session.last_action(), Some(SessionAction::Resume));
    assert!(h.provider.is_held());
    assert_eq!(h.provider.acquired(), 2);
}

#[test]
fn test_close_timeout_stops_once() {
    let lifecycle = LifecyclePolicy {
        close_timeout: Duration::from_millis(20),
        ..Default::default()
    };
    let mut h = harness(lifecycle);
    let session = launch(&mut h, "camera-app", 300);
    let id = AppId::new("camera-app");

    h.registry.stop_application(&id).unwrap();
    assert_eq!(session.last_action(), Some(SessionAction::Close));
    assert!(h.registry.find(&id).unwrap().close_timer().is_armed());
    // still busy closing, so still awake
    assert!(h.provider.is_held());

    let later = tether_util::MonotonicInstant::now() + Duration::from_secs(1);
    h.registry.tick(later);
    h.registry.tick(later + Duration::from_secs(1));

    assert_eq!(
        h.controller
            .count_calls(|c| matches!(c, ControllerCall::Stop(_))),
        1
    );
}

#[test]
fn test_startup_failure_leaves_nothing() {
    let mut h = harness(LifecyclePolicy::default());
    let id = AppId::new("dialer-app");
    h.registry.start_application(&id, vec![]).unwrap();
    h.registry.on_process_starting(&id);
    assert!(h.provider.is_held());

    h.registry.on_process_failed(&id, true);
    assert_eq!(h.registry.count(), 0);
    assert!(!h.registry.wakelock_held());
    assert!(!h.provider.is_held());
}

#[test]
fn test_focus_order_is_stable() {
    let mut h = harness(LifecyclePolicy::default());
    launch(&mut h, "dialer-app", 1);
    launch(&mut h, "gallery-app", 2);
    launch(&mut h, "camera-app", 3);
    assert_eq!(order(&h.registry), ["camera-app", "gallery-app", "dialer-app"]);

    h.registry
        .move_to_focus_front(&AppId::new("dialer-app"))
        .unwrap();
    assert_eq!(order(&h.registry), ["dialer-app", "camera-app", "gallery-app"]);
    assert_eq!(h.registry.focused_id(), Some(&AppId::new("dialer-app")));
}

#[test]
fn test_unknown_pid_is_rejected() {
    let mut h = harness(LifecyclePolicy::default());
    h.inspector.set_command_line(999, vec!["/usr/bin/mystery"]);

    assert!(!h.registry.authorize_session(999));
    assert!(!h.registry.authorize_session(1000));
    assert_eq!(h.registry.count(), 0);
}

#[test]
fn test_self_launched_app_is_tracked() {
    let mut h = harness(LifecyclePolicy::default());
    h.inspector.set_command_line(
        4242,
        vec!["/usr/bin/gallery-app", "--desktop_file_hint=/usr/share/applications/gallery-app.desktop"],
    );

    assert!(h.registry.authorize_session(4242));
    let record = h.registry.find(&AppId::new("gallery-app")).unwrap();
    assert_eq!(record.pid(), 4242);
    assert_eq!(record.state(), ApplicationState::Starting);
}

#[test]
fn test_config_drives_exemptions() {
    let policy = parse_config(
        r#"
            config_version = 1

            [lifecycle]
            exemptions = ["gallery-app"]
        "#,
    )
    .unwrap();

    let mut h = harness(policy.lifecycle);
    let session = launch(&mut h, "gallery-app", 7);
    let id = AppId::new("gallery-app");

    // exempt apps never hold the wakelock and stay alive in the background
    assert!(!h.provider.is_held());
    assert!(h.registry.suspend_application(&id));
    assert!(!session.actions().contains(&SessionAction::Suspend));
    assert_eq!(h.registry.find(&id).unwrap().state(), ApplicationState::Running);
}

#[tokio::test]
async fn test_lifecycle_loop_end_to_end() {
    let controller = Arc::new(MockProcessController::new().with_app("dialer-app"));
    let provider = MockWakelockProvider::new();
    let registry = ApplicationRegistry::new(
        controller.clone(),
        Arc::new(MockInspector::new()),
        Arc::new(provider.clone()),
        LifecyclePolicy::default(),
        AuthorizationPolicy::default(),
    );
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (lifecycle_loop, handle) = LifecycleLoop::new(
        registry,
        controller.subscribe(),
        events_tx,
        Duration::from_millis(10),
    );
    let task = tokio::spawn(lifecycle_loop.run());

    let id = AppId::new("dialer-app");
    let view = handle.start_application(id.clone(), vec![]).await.unwrap();
    assert_eq!(view.state, ApplicationState::Starting);

    controller.set_process(&id, 55);
    controller.emit(ProcessEvent::Starting { app_id: id.clone() });
    assert!(handle.authorize_session(55).await.unwrap());

    let session = MockSession::new(55);
    let attached = handle
        .session_starting(Box::new(session.clone()))
        .await
        .unwrap();
    assert_eq!(attached, Some(id.clone()));

    session.set_state(SessionState::Running);
    handle
        .session_state_changed(session.id(), SessionState::Running)
        .unwrap();

    let view = handle.get_application(id.clone()).await.unwrap().unwrap();
    assert_eq!(view.state, ApplicationState::Running);
    assert!(handle.health().await.unwrap().wakelock_held);

    assert_eq!(
        events_rx.recv().await,
        Some(CoreEvent::Added {
            index: 0,
            app_id: id.clone()
        })
    );

    handle.shutdown().unwrap();
    let registry = task.await.unwrap();
    assert_eq!(registry.count(), 1);

    // dropping the registry releases every share
    drop(registry);
    assert!(!provider.is_held());
}

#[tokio::test]
async fn test_ipc_round_trip_with_roles() {
    let dir = tempfile::tempdir().unwrap();
    let shell_path = dir.path().join("tetherd.sock");
    let compositor_path = dir.path().join("compositor.sock");

    let mut server = IpcServer::new();
    server.bind(&shell_path, ClientRole::Shell).unwrap();
    server.bind(&compositor_path, ClientRole::Compositor).unwrap();
    let mut messages = server.take_message_receiver().await.unwrap();
    let server = Arc::new(server);

    let runner = server.clone();
    tokio::spawn(async move {
        let _ = runner.run().await;
    });

    // Echo each client's role back, and push one subscriber event
    let responder = server.clone();
    tokio::spawn(async move {
        while let Some(msg) = messages.recv().await {
            if let ServerMessage::Request { client_id, request } = msg {
                let info = responder.get_client_info(&client_id).await.unwrap();
                let payload = match request.command {
                    Command::SubscribeEvents => {
                        responder.broadcast_event(tether_api::Event::new(
                            EventPayload::CountChanged { count: 3 },
                        ));
                        ResponsePayload::Subscribed { client_id }
                    }
                    _ => ResponsePayload::Accepted {
                        accepted: info.role.can_manage_sessions(),
                    },
                };
                let _ = responder
                    .send_response(
                        &client_id,
                        tether_api::Response::success(request.request_id, payload),
                    )
                    .await;
            }
        }
    });

    let mut compositor = IpcClient::connect(&compositor_path).await.unwrap();
    let response = compositor
        .send(Command::AuthorizeSession { pid: 1 })
        .await
        .unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::Accepted { accepted: true })
    ));

    let mut shell = IpcClient::connect(&shell_path).await.unwrap();
    let response = shell.send(Command::Ping).await.unwrap();
    assert!(matches!(
        response.result,
        ResponseResult::Ok(ResponsePayload::Accepted { accepted: false })
    ));

    let mut events = shell.subscribe().await.unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event.payload, EventPayload::CountChanged { count: 3 }));
}

#[test]
fn test_remote_session_reports_through_table() {
    let sessions = SessionTable::new();
    let compositor = tether_util::ClientId::new();
    let session_id = tether_util::SessionId::new();
    sessions.register(session_id, compositor, 77);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = sessions.handle(session_id, tx).unwrap();

    let mut h = harness(LifecyclePolicy::default());
    let id = AppId::new("dialer-app");
    h.registry.start_application(&id, vec![]).unwrap();
    h.controller.set_process(&id, 77);
    h.registry.on_process_starting(&id);
    assert!(h.registry.authorize_session(77));
    h.registry.session_starting(Box::new(session)).unwrap();

    sessions.set_state(&session_id, SessionState::Running);
    h.registry
        .session_state_changed(session_id, SessionState::Running);
    assert_eq!(h.registry.find(&id).unwrap().state(), ApplicationState::Running);

    // attaching to a starting app wakes the session
    assert_eq!(rx.try_recv().unwrap().action, SessionAction::Resume);

    h.registry.stop_application(&id).unwrap();
    let command = rx.try_recv().unwrap();
    assert_eq!(command.client_id, compositor);
    assert_eq!(command.action, SessionAction::Close);

    // compositor went away: the session counts as stopped
    assert_eq!(sessions.orphan_client(&compositor), vec![session_id]);
    h.registry
        .session_state_changed(session_id, SessionState::Stopped);
}
