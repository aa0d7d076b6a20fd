//! Per-worker resource context for sessions.
//!
//! Every session and every receive buffer is accounted against the allocator
//! that created it. Accounting is done through RAII leases: a lease holds a
//! reference to its allocator and gives its slot back when dropped, after
//! which the allocator reference itself is released.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

/// Fixed idle interval after which a silent session is closed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Initial capacity of a receive buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Limits and shared parameters for sessions created by one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorSettings {
    /// Maximum number of live sessions.
    pub max_sessions: usize,
    /// Maximum number of live receive buffers.
    pub max_buffers: usize,
    /// Initial capacity of each receive buffer.
    pub buffer_capacity: usize,
    /// Inactivity interval before a session is closed.
    pub idle_timeout: Duration,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_buffers: 10_000,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Single-threaded allocation context shared by all sessions of a worker.
pub struct SessionAllocator {
    settings: AllocatorSettings,
    live_sessions: Cell<usize>,
    live_buffers: Cell<usize>,
}

impl SessionAllocator {
    pub fn new(settings: AllocatorSettings) -> Rc<Self> {
        Rc::new(Self {
            settings,
            live_sessions: Cell::new(0),
            live_buffers: Cell::new(0),
        })
    }

    pub fn settings(&self) -> &AllocatorSettings {
        &self.settings
    }

    /// Reserve a session slot.
    ///
    /// Returns `None` if `max_sessions` sessions are already live.
    pub fn lease_session(self: &Rc<Self>) -> Option<Lease> {
        self.lease(LeaseKind::Session)
    }

    /// Reserve a receive buffer slot.
    ///
    /// Returns `None` if `max_buffers` buffers are already live.
    pub fn lease_buffer(self: &Rc<Self>) -> Option<Lease> {
        self.lease(LeaseKind::Buffer)
    }

    /// Number of sessions not yet destroyed.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.get()
    }

    /// Number of receive buffers not yet released.
    #[cfg(test)]
    pub fn live_buffers(&self) -> usize {
        self.live_buffers.get()
    }

    fn lease(self: &Rc<Self>, kind: LeaseKind) -> Option<Lease> {
        let (counter, limit) = self.counter(kind);
        if counter.get() >= limit {
            return None;
        }
        counter.set(counter.get() + 1);
        Some(Lease {
            allocator: Rc::clone(self),
            kind,
        })
    }

    fn counter(&self, kind: LeaseKind) -> (&Cell<usize>, usize) {
        match kind {
            LeaseKind::Session => (&self.live_sessions, self.settings.max_sessions),
            LeaseKind::Buffer => (&self.live_buffers, self.settings.max_buffers),
        }
    }
}

impl fmt::Debug for SessionAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionAllocator")
            .field("settings", &self.settings)
            .field("live_sessions", &self.live_sessions.get())
            .field("live_buffers", &self.live_buffers.get())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LeaseKind {
    Session,
    Buffer,
}

/// A slot held against a [`SessionAllocator`].
#[derive(Debug)]
pub struct Lease {
    allocator: Rc<SessionAllocator>,
    kind: LeaseKind,
}

impl Lease {
    #[cfg(test)]
    pub fn allocator(&self) -> &Rc<SessionAllocator> {
        &self.allocator
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let (counter, _) = self.allocator.counter(self.kind);
        debug_assert!(counter.get() > 0, "lease released twice");
        counter.set(counter.get().saturating_sub(1));
    }
}
