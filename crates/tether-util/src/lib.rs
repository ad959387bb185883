//! Shared utilities for tether
//!
//! This crate provides:
//! - ID types (AppId, SessionId, ClientId)
//! - Time utilities (monotonic deadlines, wall-clock timestamps)
//! - Error types
//! - Rate limiting for IPC clients
//! - Default paths for config, socket, data, and log directories

mod error;
mod ids;
mod paths;
mod rate_limit;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use rate_limit::*;
pub use time::*;
