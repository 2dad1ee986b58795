//! In-process buffered channel with suspending reads and writes, a "give back" slot that lets
//! a consumer return a value for immediate re-delivery, and close-with-reason semantics that
//! fail every pending party exactly once.

#[macro_use]
extern crate tracing;

mod channel;
mod scheduler;

pub use crate::channel::api::*;

/// Error types
pub mod error {
    pub use crate::channel::error::*;
}
