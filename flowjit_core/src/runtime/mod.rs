//! Runtime: graph edit API, compile scheduling and live state
//!
//! [`Runtime`] is the entry point for the editing side. Each node owns a
//! [`RuntimeUnit`] wrapping its installed module. Collaborators follow
//! changes through [`GraphEvent`]s.

mod drain;
pub mod events;
mod facade;
pub mod globals;
pub mod unit;

pub use drain::CompileReport;
pub use events::{EventBus, GraphEvent};
pub use facade::Runtime;
pub use globals::HostGlobals;
pub use unit::RuntimeUnit;
