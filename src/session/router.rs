//! Event dispatch for sessions.
//!
//! The notification source calls [`dispatch`] with a retained session handle
//! and a typed notification. Input and output events are separate types, so a
//! write-side event can never be routed to the read path or vice versa.

use crate::session::stream::{NotificationSource, StreamId, TimerId, Transport};
use crate::session::SessionRef;
use tracing::{debug, warn};

/// Events an input stream can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEvent {
    /// Not part of the registered set; ignored if delivered.
    OpenCompleted,
    HasBytesAvailable,
    ErrorOccurred,
    EndEncountered,
}

/// Events an output stream can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// Not part of the registered set; ignored if delivered.
    OpenCompleted,
    CanAcceptBytes,
    ErrorOccurred,
}

/// Event set a session registers for on its input stream.
pub const READ_EVENTS: &[ReadEvent] = &[
    ReadEvent::HasBytesAvailable,
    ReadEvent::ErrorOccurred,
    ReadEvent::EndEncountered,
];

/// Event set a session registers for on its output stream.
pub const WRITE_EVENTS: &[WriteEvent] = &[WriteEvent::CanAcceptBytes, WriteEvent::ErrorOccurred];

/// A notification together with the identity of the source that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    Read(StreamId, ReadEvent),
    Write(StreamId, WriteEvent),
    Timer(TimerId),
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    EndOfStream,
    ReadError,
    WriteError,
    IdleTimeout,
}

/// Route `notification` to the matching session operation.
///
/// `session` is the reference the source retained for this delivery; it is
/// released exactly once before returning. Terminal events close the session
/// first, so the release drops the last reference and destroys it.
pub fn dispatch<T, N>(session: SessionRef<T>, notification: Notification, source: &mut N)
where
    T: Transport,
    N: NotificationSource<T>,
{
    if !session.recognizes(&notification) {
        warn!(?notification, "Ignoring stale notification");
        session.release();
        return;
    }

    match notification {
        Notification::Read(_, ReadEvent::HasBytesAvailable) => {
            session.handle_has_bytes_available(source);
        }
        Notification::Read(_, ReadEvent::EndEncountered) => {
            terminate(session, Termination::EndOfStream, source);
            return;
        }
        Notification::Read(_, ReadEvent::ErrorOccurred) => {
            terminate(session, Termination::ReadError, source);
            return;
        }
        Notification::Write(_, WriteEvent::CanAcceptBytes) => {
            session.handle_can_accept_bytes(source);
        }
        Notification::Write(_, WriteEvent::ErrorOccurred) => {
            terminate(session, Termination::WriteError, source);
            return;
        }
        Notification::Timer(_) => {
            terminate(session, Termination::IdleTimeout, source);
            return;
        }
        Notification::Read(_, ReadEvent::OpenCompleted)
        | Notification::Write(_, WriteEvent::OpenCompleted) => {}
    }

    session.release();
}

fn terminate<T, N>(session: SessionRef<T>, cause: Termination, source: &mut N)
where
    T: Transport,
    N: NotificationSource<T>,
{
    debug!(?cause, buffered = session.buffered_len(), "Session terminated");
    session.close(source);
    session.release();
}
