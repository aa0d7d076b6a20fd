//! Registration table mapping mio tokens to connections and their clients.
//!
//! Each connection registered with the poller gets one slab entry; its key is
//! the mio `Token` reported back by poll. The entry tracks, per half, which
//! stream is registered, the client to notify and whether the half is
//! scheduled, and derives the poll interest from that.

use crate::runtime::connection::{Half, SharedConnection};
use crate::session::StreamId;
use mio::{Interest, Token};
use slab::Slab;
use std::io;
use std::rc::Rc;

/// Registration state of one half of a connection.
#[derive(Debug)]
pub struct Side<C> {
    pub stream: Option<StreamId>,
    pub client: Option<C>,
    pub scheduled: bool,
}

impl<C> Default for Side<C> {
    fn default() -> Self {
        Self {
            stream: None,
            client: None,
            scheduled: false,
        }
    }
}

impl<C> Side<C> {
    /// Whether poll should report readiness for this half.
    fn wants_events(&self) -> bool {
        self.client.is_some() && self.scheduled
    }

    fn is_idle(&self) -> bool {
        self.client.is_none() && !self.scheduled
    }
}

/// A connection known to the poller.
#[derive(Debug)]
pub struct Registration<C> {
    pub connection: SharedConnection,
    pub read: Side<C>,
    pub write: Side<C>,
    /// Interest currently registered with poll, if any.
    pub interest: Option<Interest>,
}

impl<C> Registration<C> {
    fn new(connection: SharedConnection) -> Self {
        Self {
            connection,
            read: Side::default(),
            write: Side::default(),
            interest: None,
        }
    }

    #[cfg(test)]
    pub fn side(&self, half: Half) -> &Side<C> {
        match half {
            Half::Read => &self.read,
            Half::Write => &self.write,
        }
    }

    pub fn side_mut(&mut self, half: Half) -> &mut Side<C> {
        match half {
            Half::Read => &mut self.read,
            Half::Write => &mut self.write,
        }
    }

    /// Interest the poller should have for the current client/schedule state.
    pub fn desired_interest(&self) -> Option<Interest> {
        match (self.read.wants_events(), self.write.wants_events()) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// No client and nothing scheduled on either half.
    pub fn is_idle(&self) -> bool {
        self.read.is_idle() && self.write.is_idle()
    }
}

/// Slab of registrations with O(1) lookup by token.
pub struct RegistrationTable<C> {
    entries: Slab<Registration<C>>,
    max_entries: usize,
}

impl<C> RegistrationTable<C> {
    /// Create a table holding at most `max_entries` connections.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Slab::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Token of `connection`, registering it first if needed.
    pub fn ensure(&mut self, connection: &SharedConnection) -> io::Result<Token> {
        if let Some(token) = connection.borrow().token {
            return Ok(token);
        }
        if self.entries.len() >= self.max_entries {
            return Err(io::Error::other("registration table full"));
        }
        let token = Token(
            self.entries
                .insert(Registration::new(Rc::clone(connection))),
        );
        connection.borrow_mut().token = Some(token);
        Ok(token)
    }

    pub fn get(&self, token: Token) -> Option<&Registration<C>> {
        self.entries.get(token.0)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Registration<C>> {
        self.entries.get_mut(token.0)
    }

    /// Remove a registration and detach its connection from the token.
    pub fn remove(&mut self, token: Token) -> Option<Registration<C>> {
        let registration = self.entries.try_remove(token.0)?;
        registration.connection.borrow_mut().token = None;
        Some(registration)
    }

    /// Number of registered connections.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::connection::TcpTransport;
    use crate::session::Transport;
    use std::net::TcpListener;

    fn connection() -> SharedConnection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        let (read, _write) = TcpTransport::stream_pair(mio::net::TcpStream::from_std(server)).unwrap();
        Rc::clone(read.connection())
    }

    #[test]
    fn test_ensure_reuses_token() {
        let mut table: RegistrationTable<u32> = RegistrationTable::new(4);
        let conn = connection();

        let t1 = table.ensure(&conn).unwrap();
        let t2 = table.ensure(&conn).unwrap();
        assert_eq!(t1, t2);
        assert_eq!(conn.borrow().token, Some(t1));
        assert_eq!(table.len(), 1);

        table.remove(t1);
        assert!(conn.borrow().token.is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_capacity() {
        let mut table: RegistrationTable<u32> = RegistrationTable::new(1);
        table.ensure(&connection()).unwrap();
        assert!(table.ensure(&connection()).is_err());
    }

    #[test]
    fn test_desired_interest() {
        let mut table: RegistrationTable<u32> = RegistrationTable::new(4);
        let token = table.ensure(&connection()).unwrap();
        let reg = table.get_mut(token).unwrap();

        assert_eq!(reg.desired_interest(), None);
        assert!(reg.is_idle());

        // A client alone does not produce interest until scheduled
        reg.read.client = Some(1);
        assert_eq!(reg.desired_interest(), None);
        assert!(!reg.is_idle());

        reg.read.scheduled = true;
        assert_eq!(reg.desired_interest(), Some(Interest::READABLE));

        reg.side_mut(Half::Write).client = Some(2);
        reg.side_mut(Half::Write).scheduled = true;
        assert_eq!(
            reg.desired_interest(),
            Some(Interest::READABLE | Interest::WRITABLE)
        );

        reg.read.client = None;
        reg.read.scheduled = false;
        assert_eq!(reg.desired_interest(), Some(Interest::WRITABLE));
        assert_eq!(reg.side(Half::Write).client, Some(2));
    }
}
