//! TCP connection split into the two stream halves a session works with.
//!
//! Both halves share one [`Connection`]: the mio socket plus the readiness
//! and status latched from poll events and syscall results. mio is
//! edge-triggered, so readiness stays latched until a syscall reports
//! `WouldBlock`.

use crate::session::{ReadStream, StreamId, Transport, WriteStream};
use mio::net::TcpStream;
use mio::Token;
use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::rc::Rc;

/// Which half of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    Read,
    Write,
}

/// Socket and latched status shared by both halves.
#[derive(Debug)]
pub struct Connection {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    /// Registration key while registered with a source.
    pub token: Option<Token>,
    pub readable: bool,
    pub writable: bool,
    pub eof: bool,
    /// Half on which a hard error was observed.
    pub failed: Option<Half>,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            token: None,
            readable: false,
            writable: false,
            eof: false,
            failed: None,
            bytes_read: 0,
            bytes_written: 0,
        }
    }

    /// Total bytes moved in either direction; used to detect progress.
    pub fn progress(&self) -> u64 {
        self.bytes_read + self.bytes_written
    }

    fn fail(&mut self, half: Half) {
        self.failed.get_or_insert(half);
    }
}

pub type SharedConnection = Rc<RefCell<Connection>>;

/// Repeat a syscall interrupted by a signal. Readiness stays latched across
/// an interruption, so the result must be final.
fn retry_interrupted<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    loop {
        match op() {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Transport over mio TCP streams.
pub struct TcpTransport;

impl Transport for TcpTransport {
    type Socket = TcpStream;
    type Read = TcpReadHalf;
    type Write = TcpWriteHalf;

    fn stream_pair(socket: TcpStream) -> io::Result<(TcpReadHalf, TcpWriteHalf)> {
        // Fails for sockets that are not (or no longer) connected.
        let peer = socket.peer_addr()?;
        socket.set_nodelay(true)?;

        let connection = Rc::new(RefCell::new(Connection::new(socket, peer)));
        Ok((
            TcpReadHalf {
                id: StreamId::next(),
                connection: Rc::clone(&connection),
                open: false,
            },
            TcpWriteHalf {
                id: StreamId::next(),
                connection,
                open: false,
            },
        ))
    }
}

/// Input half of a TCP connection.
pub struct TcpReadHalf {
    id: StreamId,
    connection: SharedConnection,
    open: bool,
}

impl TcpReadHalf {
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}

impl ReadStream for TcpReadHalf {
    fn id(&self) -> StreamId {
        self.id
    }

    fn open(&mut self) -> io::Result<()> {
        if self.connection.borrow().failed.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already failed",
            ));
        }
        self.open = true;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream not open"));
        }

        let mut conn = self.connection.borrow_mut();
        match retry_interrupted(|| conn.stream.read(buf)) {
            Ok(0) if !buf.is_empty() => {
                conn.eof = true;
                conn.readable = false;
                Ok(0)
            }
            Ok(n) => {
                conn.bytes_read += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.readable = false;
                Err(e)
            }
            Err(e) => {
                conn.readable = false;
                conn.fail(Half::Read);
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            let _ = self.connection.borrow().stream.shutdown(Shutdown::Read);
        }
    }
}

/// Output half of a TCP connection.
pub struct TcpWriteHalf {
    id: StreamId,
    connection: SharedConnection,
    open: bool,
}

impl TcpWriteHalf {
    pub fn connection(&self) -> &SharedConnection {
        &self.connection
    }
}

impl WriteStream for TcpWriteHalf {
    fn id(&self) -> StreamId {
        self.id
    }

    fn open(&mut self) -> io::Result<()> {
        if self.connection.borrow().failed.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection already failed",
            ));
        }
        self.open = true;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "stream not open"));
        }

        let mut conn = self.connection.borrow_mut();
        match retry_interrupted(|| conn.stream.write(buf)) {
            Ok(0) if !buf.is_empty() => {
                conn.writable = false;
                conn.fail(Half::Write);
                Err(io::Error::new(io::ErrorKind::WriteZero, "write returned 0"))
            }
            Ok(n) => {
                conn.bytes_written += n as u64;
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.writable = false;
                Err(e)
            }
            Err(e) => {
                conn.writable = false;
                conn.fail(Half::Write);
                Err(e)
            }
        }
    }

    fn can_accept_bytes(&self) -> bool {
        let conn = self.connection.borrow();
        self.open && conn.writable && conn.failed.is_none()
    }

    fn close(&mut self) {
        if std::mem::take(&mut self.open) {
            let _ = self.connection.borrow().stream.shutdown(Shutdown::Write);
        }
    }
}
