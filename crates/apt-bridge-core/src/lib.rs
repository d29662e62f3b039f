//! Drives `apt-get` as a subprocess and turns its `Status-Fd` side channel
//! into a stream of progress events and a single typed outcome.

pub mod classify;
pub mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod launcher;
pub mod package;
pub mod progress;
pub mod refresh;
pub mod status;

#[cfg(test)]
mod testing;

pub use error::{BridgeError, ErrorCode, Result};
pub use events::Event;
