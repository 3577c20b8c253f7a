//! WebSocket server module
//!
//! Accepts TCP connections, performs the HTTP upgrade, frames messages, and
//! routes decoded events to the relay dispatcher.

mod codec;
mod handshake;
mod multiplexer;
mod protocol;

pub use multiplexer::*;
pub use protocol::*;
