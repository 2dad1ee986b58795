// channel error types.

use std::{fmt, sync::Arc};
use thiserror::Error;


// ==== base error types ====


/// Error for trying to use a channel after it was closed
///
/// Waiters that were pending at the moment of closure, and operations attempted afterwards,
/// all observe the reason the channel was closed with, if one was given.
#[derive(Debug, Clone)]
pub struct ClosedError {
    name: Arc<str>,
    reason: Option<Arc<str>>,
}

impl ClosedError {
    pub(crate) fn new(name: Arc<str>, reason: Option<Arc<str>>) -> Self {
        ClosedError { name, reason }
    }

    /// Diagnostic name of the channel the operation was attempted on
    pub fn channel_name(&self) -> &str {
        &self.name
    }

    /// The reason passed to `close_with`, if any
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the channel {:?} was closed", self.name)?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ClosedError {}

/// Error for a non-blocking write into a channel with no free buffer slot
///
/// Only the non-blocking writes observe this: a suspending write waits for a slot instead.
#[derive(Debug, Clone, Error)]
#[error("the channel {name:?} is full")]
pub struct FullError {
    name: Arc<str>,
}

impl FullError {
    pub(crate) fn new(name: Arc<str>) -> Self {
        FullError { name }
    }

    /// Diagnostic name of the channel the operation was attempted on
    pub fn channel_name(&self) -> &str {
        &self.name
    }
}

/// Error for closing a channel that was already closed
#[derive(Debug, Clone, Error)]
#[error("the channel {name:?} was already closed")]
pub struct AlreadyClosedError {
    name: Arc<str>,
}

impl AlreadyClosedError {
    pub(crate) fn new(name: Arc<str>) -> Self {
        AlreadyClosedError { name }
    }

    /// Diagnostic name of the channel the operation was attempted on
    pub fn channel_name(&self) -> &str {
        &self.name
    }
}


// ==== compound error types ====


/// Error for a suspending write into a channel
///
/// Carries the value that could not be written back to the caller.
#[derive(Debug, Clone)]
pub struct WriteError<T> {
    /// The value that could not be written
    pub value: T,
    /// The reason the value could not be written
    pub reason: ClosedError,
}

impl<T> fmt::Display for WriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reason, f)
    }
}

impl<T: fmt::Debug> std::error::Error for WriteError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Error for a non-blocking write into a channel
///
/// Carries the value that could not be written back to the caller.
#[derive(Debug, Clone)]
pub struct TryWriteError<T> {
    /// The value that could not be written
    pub value: T,
    /// The reason the value could not be written
    pub reason: TryWriteErrorReason,
}

impl<T> fmt::Display for TryWriteError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.reason, f)
    }
}

impl<T: fmt::Debug> std::error::Error for TryWriteError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.reason)
    }
}

/// Reason for a [`TryWriteError`] occurring
#[derive(Debug, Clone, Error)]
pub enum TryWriteErrorReason {
    /// The channel was closed
    #[error(transparent)]
    Closed(#[from] ClosedError),
    /// The channel's buffer had no free slot
    #[error(transparent)]
    Full(#[from] FullError),
}

impl<T> From<WriteError<T>> for TryWriteError<T> {
    fn from(e: WriteError<T>) -> Self {
        TryWriteError {
            value: e.value,
            reason: e.reason.into(),
        }
    }
}
