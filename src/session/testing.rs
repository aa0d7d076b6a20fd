//! Test doubles for sessions: an in-memory transport and a synchronous
//! notification source with a manual clock.
//!
//! The fake peer records everything the session does to its streams, so tests
//! can assert on echoed bytes, open/close calls and resource balance.

use crate::session::router::{dispatch, Notification, ReadEvent, WriteEvent};
use crate::session::stream::{
    NotificationSource, ReadStream, StreamId, TimerId, Transport, WriteStream,
};
use crate::session::SessionRef;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// The remote end of a fake connection, shared with both stream halves.
#[derive(Debug, Default)]
pub struct FakePeer {
    /// Bytes sent by the peer, not yet read by the session.
    pub inbound: VecDeque<u8>,
    /// Peer has finished sending.
    pub eof: bool,
    /// Bytes echoed to the peer.
    pub outbound: Vec<u8>,
    /// Bytes accepted per write call; 0 means the output would block.
    pub write_capacity: usize,
    pub read_error: bool,
    pub write_error: bool,
    pub fail_read_open: bool,
    pub fail_write_open: bool,
    pub read_opened: bool,
    pub write_opened: bool,
    pub read_closes: usize,
    pub write_closes: usize,
    pub read_attempts: usize,
}

impl FakePeer {
    pub fn send(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }
}

pub type SharedPeer = Rc<RefCell<FakePeer>>;

/// A connected (or deliberately broken) fake socket.
pub struct FakeSocket {
    pub peer: SharedPeer,
    pub connected: bool,
}

impl FakeSocket {
    pub fn connected() -> (Self, SharedPeer) {
        let peer = Rc::new(RefCell::new(FakePeer {
            write_capacity: usize::MAX,
            ..FakePeer::default()
        }));
        let socket = FakeSocket {
            peer: Rc::clone(&peer),
            connected: true,
        };
        (socket, peer)
    }

    pub fn disconnected() -> (Self, SharedPeer) {
        let (mut socket, peer) = Self::connected();
        socket.connected = false;
        (socket, peer)
    }
}

pub struct FakeTransport;

impl Transport for FakeTransport {
    type Socket = FakeSocket;
    type Read = FakeReadStream;
    type Write = FakeWriteStream;

    fn stream_pair(socket: FakeSocket) -> io::Result<(FakeReadStream, FakeWriteStream)> {
        if !socket.connected {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "socket is not connected",
            ));
        }
        Ok((
            FakeReadStream {
                id: StreamId::next(),
                peer: Rc::clone(&socket.peer),
            },
            FakeWriteStream {
                id: StreamId::next(),
                peer: socket.peer,
            },
        ))
    }
}

pub struct FakeReadStream {
    id: StreamId,
    peer: SharedPeer,
}

impl ReadStream for FakeReadStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn open(&mut self) -> io::Result<()> {
        let mut peer = self.peer.borrow_mut();
        if peer.fail_read_open {
            return Err(io::Error::other("read open refused"));
        }
        peer.read_opened = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut peer = self.peer.borrow_mut();
        peer.read_attempts += 1;
        if peer.read_error {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        }
        if peer.inbound.is_empty() {
            return if peer.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(peer.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(peer.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.peer.borrow_mut().read_closes += 1;
    }
}

pub struct FakeWriteStream {
    id: StreamId,
    peer: SharedPeer,
}

impl WriteStream for FakeWriteStream {
    fn id(&self) -> StreamId {
        self.id
    }

    fn open(&mut self) -> io::Result<()> {
        let mut peer = self.peer.borrow_mut();
        if peer.fail_write_open {
            return Err(io::Error::other("write open refused"));
        }
        peer.write_opened = true;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut peer = self.peer.borrow_mut();
        if peer.write_error {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        let n = buf.len().min(peer.write_capacity);
        if n == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        peer.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn can_accept_bytes(&self) -> bool {
        let peer = self.peer.borrow();
        peer.write_capacity > 0 && !peer.write_error
    }

    fn close(&mut self) {
        self.peer.borrow_mut().write_closes += 1;
    }
}

/// Which registration step should fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailurePlan {
    pub read_client: bool,
    pub write_client: bool,
    pub schedule_write: bool,
    pub timer: bool,
}

type Client = SessionRef<FakeTransport>;

/// Notification source that delivers events only when a test asks it to.
pub struct FakeSource {
    now: Instant,
    next_timer: u64,
    pub fail: FailurePlan,
    read_clients: HashMap<StreamId, Client>,
    write_clients: HashMap<StreamId, Client>,
    scheduled: HashSet<StreamId>,
    timers: HashMap<TimerId, (Instant, Client)>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            next_timer: 1,
            fail: FailurePlan::default(),
            read_clients: HashMap::new(),
            write_clients: HashMap::new(),
            scheduled: HashSet::new(),
            timers: HashMap::new(),
        }
    }

    /// Deliver `event` to the client registered on input stream `id`.
    ///
    /// Returns `false` if no client is registered.
    pub fn deliver_read(&mut self, id: StreamId, event: ReadEvent) -> bool {
        let Some(client) = self.read_clients.get(&id).map(SessionRef::retain) else {
            return false;
        };
        dispatch(client, Notification::Read(id, event), self);
        true
    }

    /// Deliver `event` to the client registered on output stream `id`.
    pub fn deliver_write(&mut self, id: StreamId, event: WriteEvent) -> bool {
        let Some(client) = self.write_clients.get(&id).map(SessionRef::retain) else {
            return false;
        };
        dispatch(client, Notification::Write(id, event), self);
        true
    }

    /// Move the clock forward and fire every timer that came due.
    ///
    /// Returns the number of timer callbacks delivered.
    pub fn advance(&mut self, by: Duration) -> usize {
        self.now += by;
        let mut due: Vec<(Instant, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, (fire_at, _))| *fire_at <= self.now)
            .map(|(id, (fire_at, _))| (*fire_at, *id))
            .collect();
        due.sort();

        let mut fired = 0;
        for (_, id) in due {
            if let Some(client) = self.timers.get(&id).map(|(_, c)| c.retain()) {
                dispatch(client, Notification::Timer(id), self);
                fired += 1;
            }
        }
        fired
    }

    pub fn fire_date(&self, id: TimerId) -> Option<Instant> {
        self.timers.get(&id).map(|(fire_at, _)| *fire_at)
    }

    pub fn is_scheduled(&self, id: StreamId) -> bool {
        self.scheduled.contains(&id)
    }

    pub fn has_read_client(&self, id: StreamId) -> bool {
        self.read_clients.contains_key(&id)
    }

    pub fn has_write_client(&self, id: StreamId) -> bool {
        self.write_clients.contains_key(&id)
    }

    /// Total number of session references held by the source.
    pub fn held_references(&self) -> usize {
        self.read_clients.len() + self.write_clients.len() + self.timers.len()
    }

    pub fn now(&self) -> Instant {
        self.now
    }
}

fn refused(what: &str) -> io::Error {
    io::Error::other(format!("{what} refused"))
}

impl NotificationSource<FakeTransport> for FakeSource {
    fn now(&self) -> Instant {
        self.now
    }

    fn set_read_client(
        &mut self,
        stream: &mut FakeReadStream,
        events: &'static [ReadEvent],
        client: Option<Client>,
    ) -> io::Result<()> {
        match client {
            Some(_) if self.fail.read_client => Err(refused("read client")),
            Some(client) if !events.is_empty() => {
                self.read_clients.insert(stream.id(), client);
                Ok(())
            }
            _ => {
                self.read_clients.remove(&stream.id());
                Ok(())
            }
        }
    }

    fn set_write_client(
        &mut self,
        stream: &mut FakeWriteStream,
        events: &'static [WriteEvent],
        client: Option<Client>,
    ) -> io::Result<()> {
        match client {
            Some(_) if self.fail.write_client => Err(refused("write client")),
            Some(client) if !events.is_empty() => {
                self.write_clients.insert(stream.id(), client);
                Ok(())
            }
            _ => {
                self.write_clients.remove(&stream.id());
                Ok(())
            }
        }
    }

    fn schedule_read(&mut self, stream: &mut FakeReadStream) -> io::Result<()> {
        self.scheduled.insert(stream.id());
        Ok(())
    }

    fn unschedule_read(&mut self, stream: &mut FakeReadStream) {
        self.scheduled.remove(&stream.id());
    }

    fn schedule_write(&mut self, stream: &mut FakeWriteStream) -> io::Result<()> {
        if self.fail.schedule_write {
            return Err(refused("schedule"));
        }
        self.scheduled.insert(stream.id());
        Ok(())
    }

    fn unschedule_write(&mut self, stream: &mut FakeWriteStream) {
        self.scheduled.remove(&stream.id());
    }

    fn add_timer(&mut self, fire_at: Instant, client: Client) -> io::Result<TimerId> {
        if self.fail.timer {
            return Err(refused("timer"));
        }
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        self.timers.insert(id, (fire_at, client));
        Ok(id)
    }

    fn set_next_fire(&mut self, timer: TimerId, fire_at: Instant) {
        if let Some(entry) = self.timers.get_mut(&timer) {
            entry.0 = fire_at;
        }
    }

    fn invalidate_timer(&mut self, timer: TimerId) {
        self.timers.remove(&timer);
    }
}
