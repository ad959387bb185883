//! Collaborator interfaces for tether
//!
//! This crate defines the narrow contracts between the lifecycle core and
//! the outside world: the process controller that launches and signals
//! application processes, the graphical sessions a compositor opens on
//! their behalf, process inspection for session authorization, and the
//! system wakelock backend. It contains no platform code itself; test
//! doubles for every trait live in [`mock`](crate::MockProcessController).

mod command_line;
mod descriptor;
mod mock;
mod traits;

pub use command_line::*;
pub use descriptor::*;
pub use mock::*;
pub use traits::*;
