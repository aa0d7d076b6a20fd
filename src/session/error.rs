//! Error types for session creation and opening.
//!
//! Runtime failures (stream errors, end of stream, idle timeout) are never
//! surfaced to a caller; they end the session and are only logged.

use std::io;
use thiserror::Error;

/// Failure to create a session. Nothing partially created survives it.
#[derive(Error, Debug)]
pub enum CreateError {
    #[error("session limit reached")]
    AllocationFailure,

    #[error("failed to create stream pair: {0}")]
    StreamCreationFailure(#[source] io::Error),

    #[error("receive buffer limit reached")]
    BufferAllocationFailure,
}

/// Failure to open a session. The session has been closed again when this
/// is returned; the caller still owns (and must release) its reference.
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("session is already closed")]
    AlreadyClosed,

    #[error("failed to register stream client: {0}")]
    ClientRegistrationFailure(#[source] io::Error),

    #[error("failed to schedule stream: {0}")]
    SchedulingFailure(#[source] io::Error),

    #[error("failed to open stream: {0}")]
    StreamOpenFailure(#[source] io::Error),

    #[error("failed to create idle timer: {0}")]
    TimerCreationFailure(#[source] io::Error),
}
