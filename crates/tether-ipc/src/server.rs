//! IPC server implementation

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tether_api::{ClientInfo, ClientRole, Command, ErrorCode, ErrorInfo, Event, Request, Response};
use tether_util::ClientId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from the connection tasks to the daemon
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        info: ClientInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// A socket and the role granted to trusted peers connecting through it
struct Endpoint {
    path: PathBuf,
    role: ClientRole,
    listener: std::sync::Mutex<Option<UnixListener>>,
}

struct ClientHandle {
    info: ClientInfo,
    outbox: mpsc::UnboundedSender<String>,
    subscribed: bool,
}

type Clients = Arc<RwLock<HashMap<ClientId, ClientHandle>>>;

/// State shared by every accept loop and connection task
#[derive(Clone)]
struct Shared {
    clients: Clients,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
}

/// NDJSON server over one or more Unix sockets
pub struct IpcServer {
    endpoints: Vec<Endpoint>,
    shared: Shared,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

impl IpcServer {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            endpoints: Vec::new(),
            shared: Shared {
                clients: Arc::new(RwLock::new(HashMap::new())),
                event_tx,
                message_tx,
            },
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Listen on `socket_path`, granting `role` to peers running as root
    /// or as the daemon's own user.
    pub fn bind(&mut self, socket_path: impl AsRef<Path>, role: ClientRole) -> IpcResult<()> {
        let path = socket_path.as_ref().to_path_buf();

        // Remove stale socket
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %path.display(), role = ?role, "IPC endpoint listening");

        self.endpoints.push(Endpoint {
            path,
            role,
            listener: std::sync::Mutex::new(Some(listener)),
        });
        Ok(())
    }

    /// Get receiver for server messages
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections on every bound endpoint until one fails
    pub async fn run(&self) -> IpcResult<()> {
        let mut accept_loops = JoinSet::new();

        for endpoint in &self.endpoints {
            let listener = endpoint
                .listener
                .lock()
                .map_err(|_| IpcError::ServerError("Endpoint lock poisoned".into()))?
                .take()
                .ok_or_else(|| IpcError::ServerError("Server already running".into()))?;
            accept_loops.spawn(accept_loop(listener, endpoint.role, self.shared.clone()));
        }

        if accept_loops.is_empty() {
            return Err(IpcError::ServerError("No endpoint bound".into()));
        }

        while let Some(result) = accept_loops.join_next().await {
            result.map_err(|e| IpcError::ServerError(format!("Accept loop died: {}", e)))??;
        }
        Ok(())
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;
        self.send_line(client_id, json).await
    }

    /// Send an event to one client, subscribed or not
    pub async fn send_event(&self, client_id: &ClientId, event: Event) -> IpcResult<()> {
        let json = serde_json::to_string(&event)?;
        self.send_line(client_id, json).await
    }

    async fn send_line(&self, client_id: &ClientId, json: String) -> IpcResult<()> {
        let clients = self.shared.clients.read().await;
        let handle = clients.get(client_id).ok_or(IpcError::ConnectionClosed)?;
        handle
            .outbox
            .send(json)
            .map_err(|_| IpcError::ConnectionClosed)
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.shared.event_tx.send(event);
    }

    pub async fn get_client_info(&self, client_id: &ClientId) -> Option<ClientInfo> {
        let clients = self.shared.clients.read().await;
        clients.get(client_id).map(|h| h.info.clone())
    }

    pub async fn client_count(&self) -> usize {
        self.shared.clients.read().await.len()
    }

    /// Remove the socket files
    pub fn shutdown(&self) {
        for endpoint in &self.endpoints {
            if endpoint.path.exists() {
                let _ = std::fs::remove_file(&endpoint.path);
            }
        }
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(listener: UnixListener, role: ClientRole, shared: Shared) -> IpcResult<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let peer = peer_credentials(&stream);
                let uid = peer.map(|(uid, _)| uid);

                // foreign users only get to watch
                let role = match uid {
                    Some(0) => role,
                    Some(u) if u == nix::unistd::getuid().as_raw() => role,
                    _ => ClientRole::Observer,
                };

                let mut info = ClientInfo::new(role);
                if let Some((uid, pid)) = peer {
                    info = info.with_uid(uid).with_pid(pid);
                }

                info!(client_id = %info.client_id, uid = ?uid, role = ?role, "Client connected");
                handle_client(stream, info, shared.clone()).await;
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

async fn handle_client(stream: UnixStream, info: ClientInfo, shared: Shared) {
    let client_id = info.client_id;
    let (read_half, write_half) = stream.into_split();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();

    shared.clients.write().await.insert(
        client_id,
        ClientHandle {
            info: info.clone(),
            outbox: outbox.clone(),
            subscribed: false,
        },
    );

    let _ = shared
        .message_tx
        .send(ServerMessage::ClientConnected { client_id, info });

    // Reader
    let reader_shared = shared.clone();
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!(client_id = %client_id, "Client disconnected (EOF)");
                    break;
                }
                Ok(_) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    match serde_json::from_str::<Request>(line) {
                        Ok(request) => {
                            let subscription = match request.command {
                                Command::SubscribeEvents => Some(true),
                                Command::UnsubscribeEvents => Some(false),
                                _ => None,
                            };
                            if let Some(subscribed) = subscription {
                                let mut clients = reader_shared.clients.write().await;
                                if let Some(handle) = clients.get_mut(&client_id) {
                                    handle.subscribed = subscribed;
                                }
                            }

                            let _ = reader_shared
                                .message_tx
                                .send(ServerMessage::Request { client_id, request });
                        }
                        Err(e) => {
                            warn!(client_id = %client_id, error = %e, "Invalid request");
                            let response = Response::error(
                                0,
                                ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()),
                            );
                            if let Ok(json) = serde_json::to_string(&response) {
                                let _ = outbox.send(json);
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!(client_id = %client_id, error = %e, "Read error");
                    break;
                }
            }
        }

        // Dropping the handle closes the writer
        reader_shared.clients.write().await.remove(&client_id);
    });

    // Writer
    let mut event_rx = shared.event_tx.subscribe();
    tokio::spawn(async move {
        let mut writer = write_half;

        loop {
            let line = tokio::select! {
                line = outbox_rx.recv() => match line {
                    Some(line) => line,
                    None => break,
                },

                event = event_rx.recv() => match event {
                    Ok(event) => {
                        let subscribed = shared
                            .clients
                            .read()
                            .await
                            .get(&client_id)
                            .is_some_and(|h| h.subscribed);
                        if !subscribed {
                            continue;
                        }
                        match serde_json::to_string(&event) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!(error = %e, "Failed to serialize event");
                                continue;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(client_id = %client_id, skipped = n, "Client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };

            let mut msg = line;
            msg.push('\n');
            if let Err(e) = writer.write_all(msg.as_bytes()).await {
                debug!(client_id = %client_id, error = %e, "Write error");
                break;
            }
        }

        shared.clients.write().await.remove(&client_id);
        let _ = shared
            .message_tx
            .send(ServerMessage::ClientDisconnected { client_id });
    });
}

/// Peer (uid, pid) from the Unix socket
fn peer_credentials(stream: &UnixStream) -> Option<(u32, u32)> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();
    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some((cred.uid(), cred.pid() as u32)),
        Err(_) => None,
    }
}
