//! IPC layer for tetherd
//!
//! Provides:
//! - Unix domain socket endpoints, each granting a role to trusted peers
//! - NDJSON (newline-delimited JSON) protocol
//! - Client connection management and targeted events
//! - Session handles backed by remote compositor clients

mod client;
mod server;
mod session;

pub use client::*;
pub use server::*;
pub use session::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
