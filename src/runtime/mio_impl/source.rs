//! Notification source over a mio `Poll`.
//!
//! Translates readiness events into session notifications. mio reports
//! readiness once per edge, while a session reads one chunk and writes one
//! line per callback, so readiness is latched on the connection and
//! callbacks are re-delivered for as long as they keep moving bytes.

use crate::runtime::connection::{Half, SharedConnection, TcpReadHalf, TcpTransport, TcpWriteHalf};
use crate::runtime::timers::TimerQueue;
use crate::runtime::token::RegistrationTable;
use crate::session::{
    dispatch, Notification, NotificationSource, ReadEvent, ReadStream, SessionRef, StreamId,
    TimerId, WriteEvent, WriteStream,
};
use mio::event::Event;
use mio::{Events, Poll, Token};
use std::io;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

type Client = SessionRef<TcpTransport>;

/// Callback rounds one connection gets per pump before other connections and
/// timers are served.
const MAX_ROUNDS: usize = 16;

pub struct MioSource {
    poll: Poll,
    registrations: RegistrationTable<Client>,
    timers: TimerQueue<Client>,
    /// Connections that hit `MAX_ROUNDS` and still have latched readiness.
    pending: Vec<Token>,
}

impl MioSource {
    pub fn new(poll: Poll, max_connections: usize) -> Self {
        Self {
            poll,
            registrations: RegistrationTable::new(max_connections),
            timers: TimerQueue::new(),
            pending: Vec::new(),
        }
    }

    /// Wait for readiness, at most until the next timer is due. Does not
    /// wait at all while deferred connections are queued.
    pub fn poll(&mut self, events: &mut Events) -> io::Result<()> {
        let timeout = if self.pending.is_empty() {
            self.timers.poll_timeout(Instant::now())
        } else {
            Some(Duration::ZERO)
        };
        match self.poll.poll(events, timeout) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            result => result,
        }
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Latch the readiness in `event` and run callbacks for its connection.
    pub fn handle_event(&mut self, event: &Event) {
        let token = event.token();
        let Some(registration) = self.registrations.get(token) else {
            return;
        };

        {
            let mut conn = registration.connection.borrow_mut();
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                conn.readable = true;
            }
            // A closed write side is surfaced by the next write attempt.
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                conn.writable = true;
            }
        }

        self.pump(token);
    }

    /// Fire every timer that came due. Timers are one-shot.
    pub fn fire_timers(&mut self) {
        let now = Instant::now();
        for id in self.timers.expired(now) {
            let Some(client) = self.timers.client(id).map(SessionRef::retain) else {
                continue;
            };
            dispatch(client, Notification::Timer(id), self);

            if self.timers.deadline(id).is_some_and(|fire_at| fire_at <= now) {
                self.timers.remove(id);
            }
        }
    }

    /// Pump connections that hit the round limit on an earlier pass.
    pub fn run_pending(&mut self) {
        for token in std::mem::take(&mut self.pending) {
            self.pump(token);
        }
    }

    /// Deliver callbacks for a connection until nothing changes, for at most
    /// `MAX_ROUNDS` rounds. A connection still making progress after that is
    /// queued with its readiness latched.
    fn pump(&mut self, token: Token) {
        for _ in 0..MAX_ROUNDS {
            let Some(registration) = self.registrations.get(token) else {
                return;
            };
            let has_read = registration.read.client.is_some();
            let has_write = registration.write.client.is_some();
            let before = snapshot(&registration.connection);
            let (readable, writable) = {
                let conn = registration.connection.borrow();
                (conn.readable, conn.writable)
            };
            let (_, eof, failed) = before;

            match failed {
                Some(Half::Read) if has_read => {
                    self.deliver_read(token, ReadEvent::ErrorOccurred);
                    return;
                }
                Some(_) if has_write => {
                    self.deliver_write(token, WriteEvent::ErrorOccurred);
                    return;
                }
                Some(_) if has_read => {
                    self.deliver_read(token, ReadEvent::ErrorOccurred);
                    return;
                }
                Some(_) => return,
                None => {}
            }

            if eof {
                if has_write {
                    // Lines already received are echoed before end of stream
                    // is reported.
                    if !writable {
                        return;
                    }
                    self.deliver_write(token, WriteEvent::CanAcceptBytes);
                    match self.connection_state(token) {
                        None => return,
                        Some((after, _)) if after != before => continue,
                        Some((_, false)) => return,
                        Some((_, true)) => {}
                    }
                }
                if has_read {
                    self.deliver_read(token, ReadEvent::EndEncountered);
                }
                return;
            }

            if readable && has_read {
                self.deliver_read(token, ReadEvent::HasBytesAvailable);
            }
            if writable && has_write {
                self.deliver_write(token, WriteEvent::CanAcceptBytes);
            }

            match self.connection_state(token) {
                Some((after, _)) if after != before => {}
                _ => return,
            }
        }

        if !self.pending.contains(&token) {
            trace!(token = token.0, "Connection deferred");
            self.pending.push(token);
        }
    }

    /// Snapshot and write readiness of a registered connection.
    fn connection_state(&self, token: Token) -> Option<(Snapshot, bool)> {
        let registration = self.registrations.get(token)?;
        let writable = registration.connection.borrow().writable;
        Some((snapshot(&registration.connection), writable))
    }

    fn deliver_read(&mut self, token: Token, event: ReadEvent) {
        let Some((client, id)) = self.registrations.get(token).and_then(|registration| {
            let side = &registration.read;
            Some((side.client.as_ref()?.retain(), side.stream?))
        }) else {
            return;
        };
        dispatch(client, Notification::Read(id, event), self);
    }

    fn deliver_write(&mut self, token: Token, event: WriteEvent) {
        let Some((client, id)) = self.registrations.get(token).and_then(|registration| {
            let side = &registration.write;
            Some((side.client.as_ref()?.retain(), side.stream?))
        }) else {
            return;
        };
        dispatch(client, Notification::Write(id, event), self);
    }

    fn set_client(
        &mut self,
        connection: &SharedConnection,
        half: Half,
        stream: StreamId,
        client: Option<Client>,
    ) -> io::Result<()> {
        match client {
            Some(client) => {
                let token = self.registrations.ensure(connection)?;
                if let Some(registration) = self.registrations.get_mut(token) {
                    let side = registration.side_mut(half);
                    side.stream = Some(stream);
                    side.client = Some(client);
                }
                self.sync(token)
            }
            None => {
                let Some(token) = connection.borrow().token else {
                    return Ok(());
                };
                if let Some(registration) = self.registrations.get_mut(token) {
                    let side = registration.side_mut(half);
                    side.stream = None;
                    side.client = None;
                }
                self.sync(token)
            }
        }
    }

    fn set_scheduled(
        &mut self,
        connection: &SharedConnection,
        half: Half,
        scheduled: bool,
    ) -> io::Result<()> {
        let token = if scheduled {
            self.registrations.ensure(connection)?
        } else {
            match connection.borrow().token {
                Some(token) => token,
                None => return Ok(()),
            }
        };

        if let Some(registration) = self.registrations.get_mut(token) {
            registration.side_mut(half).scheduled = scheduled;
        }

        let result = self.sync(token);
        if result.is_err() && scheduled {
            if let Some(registration) = self.registrations.get_mut(token) {
                registration.side_mut(half).scheduled = false;
            }
        }
        result
    }

    /// Bring the poller's interest in line with the registration, dropping
    /// the registration once nothing refers to it.
    fn sync(&mut self, token: Token) -> io::Result<()> {
        let Some(registration) = self.registrations.get_mut(token) else {
            return Ok(());
        };

        let desired = registration.desired_interest();
        let result = {
            let mut conn = registration.connection.borrow_mut();
            let registry = self.poll.registry();
            match (registration.interest, desired) {
                (None, Some(interest)) => registry.register(&mut conn.stream, token, interest),
                (Some(current), Some(interest)) if current != interest => {
                    registry.reregister(&mut conn.stream, token, interest)
                }
                (Some(_), None) => registry.deregister(&mut conn.stream),
                _ => Ok(()),
            }
        };
        result?;
        registration.interest = desired;

        if registration.is_idle() {
            if let Some(registration) = self.registrations.remove(token) {
                let conn = registration.connection.borrow();
                trace!(
                    token = token.0,
                    peer = %conn.peer,
                    bytes_read = conn.bytes_read,
                    bytes_written = conn.bytes_written,
                    "Connection unregistered"
                );
            }
        }
        Ok(())
    }
}

/// Progress and terminal status of a connection, compared across callbacks.
type Snapshot = (u64, bool, Option<Half>);

fn snapshot(connection: &SharedConnection) -> Snapshot {
    let conn = connection.borrow();
    (conn.progress(), conn.eof, conn.failed)
}

impl NotificationSource<TcpTransport> for MioSource {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn set_read_client(
        &mut self,
        stream: &mut TcpReadHalf,
        events: &'static [ReadEvent],
        client: Option<Client>,
    ) -> io::Result<()> {
        let client = client.filter(|_| !events.is_empty());
        let connection = stream.connection().clone();
        self.set_client(&connection, Half::Read, ReadStream::id(stream), client)
    }

    fn set_write_client(
        &mut self,
        stream: &mut TcpWriteHalf,
        events: &'static [WriteEvent],
        client: Option<Client>,
    ) -> io::Result<()> {
        let client = client.filter(|_| !events.is_empty());
        let connection = stream.connection().clone();
        self.set_client(&connection, Half::Write, WriteStream::id(stream), client)
    }

    fn schedule_read(&mut self, stream: &mut TcpReadHalf) -> io::Result<()> {
        let connection = stream.connection().clone();
        self.set_scheduled(&connection, Half::Read, true)
    }

    fn unschedule_read(&mut self, stream: &mut TcpReadHalf) {
        let connection = stream.connection().clone();
        if let Err(e) = self.set_scheduled(&connection, Half::Read, false) {
            warn!(error = %e, "Failed to unschedule input stream");
        }
    }

    fn schedule_write(&mut self, stream: &mut TcpWriteHalf) -> io::Result<()> {
        let connection = stream.connection().clone();
        self.set_scheduled(&connection, Half::Write, true)
    }

    fn unschedule_write(&mut self, stream: &mut TcpWriteHalf) {
        let connection = stream.connection().clone();
        if let Err(e) = self.set_scheduled(&connection, Half::Write, false) {
            warn!(error = %e, "Failed to unschedule output stream");
        }
    }

    fn add_timer(&mut self, fire_at: Instant, client: Client) -> io::Result<TimerId> {
        Ok(self.timers.insert(fire_at, client))
    }

    fn set_next_fire(&mut self, timer: TimerId, fire_at: Instant) {
        self.timers.reschedule(timer, fire_at);
    }

    fn invalidate_timer(&mut self, timer: TimerId) {
        self.timers.remove(timer);
    }
}
