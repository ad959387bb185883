//! Protocol types for tetherd IPC
//!
//! This crate defines the stable API between tetherd and its clients
//! (shells, compositors and observers):
//! - Lifecycle state enums and application views
//! - Commands (requests from clients)
//! - Responses
//! - Events (daemon -> clients)
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
