//! Relay state module
//!
//! Connection registry, room directory, and the dispatcher that applies
//! client events to both.

#[allow(dead_code)]
mod directory;
mod dispatcher;
#[allow(dead_code)]
mod registry;

pub use directory::*;
pub use dispatcher::*;
pub use registry::*;
