//! Per-connection echo session.
//!
//! A session owns the two halves of one connection, a receive buffer and an
//! idle timer. It is shared between whoever created it and the notification
//! source through [`SessionRef`], a single-thread counted handle: `retain`
//! clones it, `release` drops it, and the session is destroyed exactly when
//! the last handle goes away.
//!
//! ## Lifecycle
//!
//! ```text
//! create ──▶ open ──▶ (read/write/timer callbacks) ──▶ close ──▶ last release
//!   │          │                                                   │
//!   │          └─ failure: close, caller releases                  └─ destroy
//!   └─ failure: everything rolled back, no session
//! ```
//!
//! While open, the source holds three retained handles (input client, output
//! client, timer). `close` unregisters all of them, so after a terminal event
//! the only handle left is the one the source passed to the router for that
//! delivery.

pub mod allocator;
pub mod buffer;
mod echo;
pub mod error;
pub mod router;
pub mod scanner;
pub mod stream;
pub mod timer;

#[cfg(test)]
pub mod testing;

pub use allocator::{AllocatorSettings, SessionAllocator};
pub use error::{CreateError, OpenError};
pub use router::{dispatch, Notification, ReadEvent, WriteEvent};
pub use stream::{NotificationSource, ReadStream, StreamId, TimerId, Transport, WriteStream};

use crate::session::allocator::Lease;
use crate::session::buffer::ReceiveBuffer;
use crate::session::router::{READ_EVENTS, WRITE_EVENTS};
use crate::session::timer::IdleTimer;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace};

/// Shared handle to a [`Session`].
pub struct SessionRef<T: Transport>(Rc<Session<T>>);

/// State of one connection.
pub struct Session<T: Transport> {
    state: RefCell<State<T>>,
    // Dropped after `state`, so the slot and then the allocator are released last.
    _lease: Lease,
}

struct State<T: Transport> {
    input: Option<T::Read>,
    output: Option<T::Write>,
    timer: IdleTimer<T>,
    received: ReceiveBuffer,
}

impl<T: Transport> Session<T> {
    /// Wrap a connected socket into a new session.
    ///
    /// The session takes ownership of `socket`. On failure everything
    /// allocated so far is released again and no session exists.
    pub fn create(
        allocator: &Rc<SessionAllocator>,
        socket: T::Socket,
    ) -> Result<SessionRef<T>, CreateError> {
        let lease = allocator
            .lease_session()
            .ok_or(CreateError::AllocationFailure)?;

        let (mut input, mut output) =
            T::stream_pair(socket).map_err(CreateError::StreamCreationFailure)?;

        let received = match ReceiveBuffer::allocate(allocator) {
            Some(buf) => buf,
            None => {
                input.close();
                output.close();
                return Err(CreateError::BufferAllocationFailure);
            }
        };

        debug!(input = ?input.id(), output = ?output.id(), "Session created");

        Ok(SessionRef(Rc::new(Session {
            state: RefCell::new(State {
                input: Some(input),
                output: Some(output),
                timer: IdleTimer::new(allocator.settings().idle_timeout),
                received,
            }),
            _lease: lease,
        })))
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        // Every registration holds a handle, so nothing can still be
        // registered or scheduled once the count has reached zero.
        if let Some(mut input) = state.input.take() {
            input.close();
        }
        if let Some(mut output) = state.output.take() {
            output.close();
        }
        state.timer.forget();
        trace!(discarded = state.received.len(), "Session destroyed");
    }
}

impl<T: Transport> SessionRef<T> {
    /// Take another reference to the same session.
    pub fn retain(&self) -> Self {
        SessionRef(Rc::clone(&self.0))
    }

    /// Give up this reference. The last release destroys the session.
    pub fn release(self) {
        drop(self);
    }

    /// Number of live references.
    #[cfg(test)]
    pub fn retain_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Register with `source`, open both streams and arm the idle timer.
    ///
    /// Any failing step closes the session before returning, so `source`
    /// keeps no registration for it.
    pub fn open<N: NotificationSource<T>>(&self, source: &mut N) -> Result<(), OpenError> {
        let result = self.register(source);
        match &result {
            Ok(()) => debug!(input = ?self.input_id(), "Session opened"),
            Err(e) => {
                debug!(error = %e, "Session open failed");
                self.close(source);
            }
        }
        result
    }

    fn register<N: NotificationSource<T>>(&self, source: &mut N) -> Result<(), OpenError> {
        let mut guard = self.0.state.borrow_mut();
        let state = &mut *guard;
        let (Some(input), Some(output)) = (state.input.as_mut(), state.output.as_mut()) else {
            return Err(OpenError::AlreadyClosed);
        };

        source
            .set_read_client(input, READ_EVENTS, Some(self.retain()))
            .map_err(OpenError::ClientRegistrationFailure)?;
        source
            .set_write_client(output, WRITE_EVENTS, Some(self.retain()))
            .map_err(OpenError::ClientRegistrationFailure)?;

        source
            .schedule_read(input)
            .map_err(OpenError::SchedulingFailure)?;
        source
            .schedule_write(output)
            .map_err(OpenError::SchedulingFailure)?;

        input.open().map_err(OpenError::StreamOpenFailure)?;
        output.open().map_err(OpenError::StreamOpenFailure)?;

        state
            .timer
            .arm(source, self.retain())
            .map_err(OpenError::TimerCreationFailure)?;

        Ok(())
    }

    /// Tear down I/O: unregister, unschedule and close both streams and
    /// invalidate the timer. Idempotent.
    pub fn close<N: NotificationSource<T>>(&self, source: &mut N) {
        let mut state = self.0.state.borrow_mut();

        if let Some(mut input) = state.input.take() {
            // Unregistering cannot fail in a way worth reporting here.
            let _ = source.set_read_client(&mut input, &[], None);
            source.unschedule_read(&mut input);
            input.close();
        }

        if let Some(mut output) = state.output.take() {
            let _ = source.set_write_client(&mut output, &[], None);
            source.unschedule_write(&mut output);
            output.close();
        }

        state.timer.invalidate(source);
    }

    /// Whether the streams are still held, i.e. `close` has not run.
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        let state = self.0.state.borrow();
        state.input.is_some() && state.output.is_some()
    }

    pub fn input_id(&self) -> Option<StreamId> {
        self.0.state.borrow().input.as_ref().map(ReadStream::id)
    }

    pub fn output_id(&self) -> Option<StreamId> {
        self.0.state.borrow().output.as_ref().map(WriteStream::id)
    }

    pub fn timer_id(&self) -> Option<TimerId> {
        self.0.state.borrow().timer.id()
    }

    /// Bytes received but not yet echoed.
    pub fn buffered_len(&self) -> usize {
        self.0.state.borrow().received.len()
    }

    #[cfg(test)]
    pub fn buffered(&self) -> Vec<u8> {
        self.0.state.borrow().received.as_slice().to_vec()
    }

    /// Whether `notification` comes from this session's current streams or
    /// timer.
    pub(crate) fn recognizes(&self, notification: &Notification) -> bool {
        match *notification {
            Notification::Read(id, _) => self.input_id() == Some(id),
            Notification::Write(id, _) => self.output_id() == Some(id),
            Notification::Timer(id) => self.timer_id() == Some(id),
        }
    }

    pub(crate) fn handle_has_bytes_available<N: NotificationSource<T>>(&self, source: &mut N) {
        self.0.state.borrow_mut().read_available(source);
    }

    pub(crate) fn handle_can_accept_bytes<N: NotificationSource<T>>(&self, source: &mut N) {
        self.0.state.borrow_mut().write_line(source);
    }
}
