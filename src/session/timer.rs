//! Idle timeout deadline.

use crate::session::stream::{NotificationSource, TimerId, Transport};
use crate::session::SessionRef;
use std::io;
use std::marker::PhantomData;
use std::time::Duration;

/// A single deadline, present only while the session is open.
///
/// Rearming overwrites the deadline with `now + interval`; there is never
/// more than one pending fire time.
#[derive(Debug)]
pub struct IdleTimer<T> {
    id: Option<TimerId>,
    interval: Duration,
    _transport: PhantomData<fn() -> T>,
}

impl<T: Transport> IdleTimer<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            id: None,
            interval,
            _transport: PhantomData,
        }
    }

    pub fn id(&self) -> Option<TimerId> {
        self.id
    }

    /// Install the timer with `client` as its callback context.
    pub fn arm<N: NotificationSource<T>>(
        &mut self,
        source: &mut N,
        client: SessionRef<T>,
    ) -> io::Result<()> {
        self.invalidate(source);
        let fire_at = source.now() + self.interval;
        self.id = Some(source.add_timer(fire_at, client)?);
        Ok(())
    }

    /// Push the deadline out to `now + interval`. No-op if not armed.
    pub fn rearm<N: NotificationSource<T>>(&self, source: &mut N) {
        if let Some(id) = self.id {
            let fire_at = source.now() + self.interval;
            source.set_next_fire(id, fire_at);
        }
    }

    /// Remove the timer from the source. No-op if not armed.
    pub fn invalidate<N: NotificationSource<T>>(&mut self, source: &mut N) {
        if let Some(id) = self.id.take() {
            source.invalidate_timer(id);
        }
    }

    /// Drop the handle without touching a source.
    ///
    /// Only valid once the source no longer holds the timer, i.e. during
    /// destruction.
    pub fn forget(&mut self) {
        self.id = None;
    }
}
