//! Collaborator contracts consumed by a session.
//!
//! A session never touches sockets or pollers directly. It talks to a pair of
//! half-duplex streams produced by a [`Transport`] and to a
//! [`NotificationSource`] that delivers readiness and timer callbacks. The mio
//! runtime provides the production implementations; tests substitute fakes
//! that deliver events synchronously and control the clock.

use crate::session::router::{ReadEvent, WriteEvent};
use crate::session::SessionRef;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Identity of one stream half, used to detect stale notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u64);

impl StreamId {
    /// Allocate a process-unique stream identity.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        StreamId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of an installed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Input half of a connection.
pub trait ReadStream {
    fn id(&self) -> StreamId;

    fn open(&mut self) -> io::Result<()>;

    /// Non-blocking read.
    ///
    /// `Ok(0)` signals end of stream, `ErrorKind::WouldBlock` signals that
    /// nothing is available right now.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self);
}

/// Output half of a connection.
pub trait WriteStream {
    fn id(&self) -> StreamId;

    fn open(&mut self) -> io::Result<()>;

    /// Non-blocking write. May accept fewer bytes than offered.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Whether a write issued now is expected to accept at least one byte.
    fn can_accept_bytes(&self) -> bool;

    fn close(&mut self);
}

/// Turns a connected socket into a pair of stream halves.
pub trait Transport: Sized + 'static {
    type Socket;
    type Read: ReadStream;
    type Write: WriteStream;

    /// Wrap `socket`, taking ownership of it. Once wrapped, the socket is
    /// closed only through the returned halves.
    fn stream_pair(socket: Self::Socket) -> io::Result<(Self::Read, Self::Write)>;
}

/// The event loop a session registers with.
///
/// Every client handed to the source is a retained [`SessionRef`]; the source
/// keeps it until the client is replaced, unregistered, or the timer is
/// invalidated, so a session cannot be destroyed while an event for it may
/// still be delivered. Callbacks for one session never interleave.
pub trait NotificationSource<T: Transport> {
    /// Current time as seen by the source's clock.
    fn now(&self) -> Instant;

    /// Register `client` for `events` on the input half, or unregister with
    /// `None`.
    fn set_read_client(
        &mut self,
        stream: &mut T::Read,
        events: &'static [ReadEvent],
        client: Option<SessionRef<T>>,
    ) -> io::Result<()>;

    /// Register `client` for `events` on the output half, or unregister with
    /// `None`.
    fn set_write_client(
        &mut self,
        stream: &mut T::Write,
        events: &'static [WriteEvent],
        client: Option<SessionRef<T>>,
    ) -> io::Result<()>;

    fn schedule_read(&mut self, stream: &mut T::Read) -> io::Result<()>;

    fn unschedule_read(&mut self, stream: &mut T::Read);

    fn schedule_write(&mut self, stream: &mut T::Write) -> io::Result<()>;

    fn unschedule_write(&mut self, stream: &mut T::Write);

    /// Install a one-shot timer firing at `fire_at`.
    fn add_timer(&mut self, fire_at: Instant, client: SessionRef<T>) -> io::Result<TimerId>;

    /// Move a timer's deadline, cancelling the previous one.
    fn set_next_fire(&mut self, timer: TimerId, fire_at: Instant);

    /// Remove a timer and release its client.
    fn invalidate_timer(&mut self, timer: TimerId);
}
