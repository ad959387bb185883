//! IPC client implementation

use std::collections::VecDeque;
use std::path::Path;
use tether_api::{Command, Event, Request, Response, ResponseResult};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::{IpcError, IpcResult};

/// IPC Client for connecting to tetherd
pub struct IpcClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
    next_request_id: u64,
    /// Events that arrived while waiting for a response
    pending_events: VecDeque<Event>,
}

enum Incoming {
    Response(Response),
    Event(Event),
}

impl IpcClient {
    /// Connect to tetherd
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_request_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    /// Send a command and wait for its response
    pub async fn send(&mut self, command: Command) -> IpcResult<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request::new(request_id, command);
        let mut json = serde_json::to_string(&request)?;
        json.push('\n');

        self.writer.write_all(json.as_bytes()).await?;

        loop {
            match self.read_incoming().await? {
                Incoming::Response(response) => return Ok(response),
                Incoming::Event(event) => self.pending_events.push_back(event),
            }
        }
    }

    /// Next event addressed to this client, queued or fresh
    pub async fn next_event(&mut self) -> IpcResult<Event> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        loop {
            match self.read_incoming().await? {
                Incoming::Event(event) => return Ok(event),
                Incoming::Response(response) => {
                    return Err(IpcError::InvalidMessage(format!(
                        "Unexpected response to request {}",
                        response.request_id
                    )));
                }
            }
        }
    }

    /// Subscribe to events and consume this client to return an event stream
    pub async fn subscribe(mut self) -> IpcResult<EventStream> {
        let response = self.send(Command::SubscribeEvents).await?;

        if let ResponseResult::Err(e) = response.result {
            return Err(IpcError::ServerError(e.message));
        }

        Ok(EventStream { client: self })
    }

    async fn read_incoming(&mut self) -> IpcResult<Incoming> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        let value: serde_json::Value = serde_json::from_str(line.trim())?;
        if value.get("result").is_some() {
            Ok(Incoming::Response(serde_json::from_value(value)?))
        } else {
            Ok(Incoming::Event(serde_json::from_value(value)?))
        }
    }
}

/// Stream of events from tetherd
pub struct EventStream {
    client: IpcClient,
}

impl EventStream {
    /// Wait for the next event
    pub async fn next(&mut self) -> IpcResult<Event> {
        self.client.next_event().await
    }

    /// Give back the client for issuing further commands
    pub fn into_client(self) -> IpcClient {
        self.client
    }
}
