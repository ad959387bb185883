//! Linux collaborators for tetherd
//!
//! Provides:
//! - Process spawning with process group isolation
//! - Suspend and resume through SIGSTOP/SIGCONT on the group
//! - Exit observation, classified as clean stops or failures
//! - Command line inspection through procfs
//! - A system wakelock held by an inhibitor process

mod controller;
mod inspector;
mod process;
mod wakelock;

pub use controller::*;
pub use inspector::*;
pub use process::*;
pub use wakelock::*;
