//! Configuration module
//!
//! Handles loading relay settings from disk.

mod relay;

pub use relay::*;
