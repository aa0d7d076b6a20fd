//! One-shot timers ordered by deadline.
//!
//! The event loop sleeps in poll until the earliest deadline, then fires
//! everything that came due.

use crate::session::TimerId;
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

/// Pending timers, each carrying a client to notify.
pub struct TimerQueue<C> {
    next_id: u64,
    entries: HashMap<TimerId, (Instant, C)>,
    order: BTreeSet<(Instant, TimerId)>,
}

impl<C> TimerQueue<C> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            order: BTreeSet::new(),
        }
    }

    pub fn insert(&mut self, fire_at: Instant, client: C) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, (fire_at, client));
        self.order.insert((fire_at, id));
        id
    }

    /// Move a timer's deadline. Returns `false` for unknown timers.
    pub fn reschedule(&mut self, id: TimerId, fire_at: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        self.order.remove(&(entry.0, id));
        entry.0 = fire_at;
        self.order.insert((fire_at, id));
        true
    }

    pub fn remove(&mut self, id: TimerId) -> Option<C> {
        let (fire_at, client) = self.entries.remove(&id)?;
        self.order.remove(&(fire_at, id));
        Some(client)
    }

    pub fn client(&self, id: TimerId) -> Option<&C> {
        self.entries.get(&id).map(|(_, client)| client)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.entries.get(&id).map(|(fire_at, _)| *fire_at)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.order.first().map(|(fire_at, _)| *fire_at)
    }

    /// How long poll may sleep before the next timer is due.
    pub fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|fire_at| fire_at.saturating_duration_since(now))
    }

    /// Timers due at `now`, earliest first.
    pub fn expired(&self, now: Instant) -> Vec<TimerId> {
        self.order
            .iter()
            .take_while(|(fire_at, _)| *fire_at <= now)
            .map(|(_, id)| *id)
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
