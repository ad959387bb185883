//! Application lifecycle core for tetherd
//!
//! This crate is the heart of tetherd, containing:
//! - The per-application state machine (Starting -> Running -> Suspended -> Stopped
//!   and the transitional states in between)
//! - The ordered application registry and session authorization
//! - The shared wakelock and the graceful close timer
//! - The single-owner loop that serializes every mutation

mod application;
mod close_timer;
mod dispatch;
mod error;
mod events;
mod registry;
mod wakelock;

pub use application::*;
pub use close_timer::*;
pub use dispatch::*;
pub use error::*;
pub use events::*;
pub use registry::*;
pub use wakelock::*;
