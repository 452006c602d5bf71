//! Logical clocks
//!
//! Each clock keeps a queue of delayed entries keyed by logical deadline,
//! with a sequence number breaking ties so that entries with equal deadlines
//! resume in the order they were added. A clock only advances when nothing
//! else in the engine can run and every token under it is quiescent.
//!
//! Clocks nest: a token that enters a new clock scope gets a child clock,
//! and its activity also holds back every ancestor.

use crate::arena::{Arena, ArenaIndex};
use crate::pq::MinPq;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ClockId(ArenaIndex);

/// A single logical timeline.
pub struct LogicalClock<T> {
    parent: Option<ClockId>,
    now: u64,
    /// Deterministic sequence counter; doubles as the event id.
    seq: u64,
    queue: MinPq<T>,
    /// Non-quiescent tokens on this clock or any descendant.
    active: usize,
}

impl<T> LogicalClock<T> {
    pub fn new(parent: Option<ClockId>) -> Self {
        Self {
            parent,
            now: 0,
            seq: 0,
            queue: MinPq::new(),
            active: 0,
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn parent(&self) -> Option<ClockId> {
        self.parent
    }

    /// Schedule `entry` at `now + delay`. Returns the event id.
    pub fn add_event(&mut self, delay: u64, entry: T) -> u64 {
        let id = self.seq;
        self.seq += 1;
        self.queue.add(id, self.now.saturating_add(delay), id, entry);
        id
    }

    /// Cancel a scheduled entry.
    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.queue.remove(id)
    }

    /// Deadline of the next entry, if any.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.queue.peek_deadline()
    }

    /// Jump to the earliest deadline and hand every entry due at that time
    /// to `resume` with its event id, in (deadline, sequence) order. Returns
    /// false and does nothing if the queue is empty.
    pub fn advance(&mut self, mut resume: impl FnMut(u64, T)) -> bool {
        let Some(deadline) = self.queue.peek_deadline() else {
            return false;
        };
        self.now = self.now.max(deadline);
        while let Some(next) = self.queue.peek_deadline() {
            if next > self.now {
                break;
            }
            if let Some((id, _, _, entry)) = self.queue.pop() {
                resume(id, entry);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Remove every remaining entry in firing order without advancing time.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some((_, _, _, entry)) = self.queue.pop() {
            out.push(entry);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_quiescent(&self) -> bool {
        self.active == 0
    }

    pub fn active(&self) -> usize {
        self.active
    }

    fn unset_quiescent(&mut self) {
        self.active += 1;
    }

    fn set_quiescent(&mut self) {
        self.active = self.active.saturating_sub(1);
    }
}

/// All live clocks of one engine.
pub struct ClockTable<T> {
    clocks: Arena<LogicalClock<T>>,
}

impl<T> Default for ClockTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClockTable<T> {
    pub fn new() -> Self {
        Self {
            clocks: Arena::new(),
        }
    }

    pub fn open(&mut self, parent: Option<ClockId>) -> ClockId {
        ClockId(self.clocks.insert(LogicalClock::new(parent)))
    }

    /// Remove a clock, returning it with any entries it still holds.
    pub fn close(&mut self, c: ClockId) -> Option<LogicalClock<T>> {
        self.clocks.remove(c.0)
    }

    pub fn get(&self, c: ClockId) -> Option<&LogicalClock<T>> {
        self.clocks.get(c.0)
    }

    pub fn get_mut(&mut self, c: ClockId) -> Option<&mut LogicalClock<T>> {
        self.clocks.get_mut(c.0)
    }

    /// A token on `c` became active.
    pub fn unset_quiescent(&mut self, c: ClockId) {
        let mut cur = Some(c);
        while let Some(id) = cur {
            let Some(clock) = self.clocks.get_mut(id.0) else {
                break;
            };
            clock.unset_quiescent();
            cur = clock.parent;
        }
    }

    /// A token on `c` became quiescent or died.
    pub fn set_quiescent(&mut self, c: ClockId) {
        let mut cur = Some(c);
        while let Some(id) = cur {
            let Some(clock) = self.clocks.get_mut(id.0) else {
                break;
            };
            clock.set_quiescent();
            cur = clock.parent;
        }
    }

    pub fn add_event(&mut self, c: ClockId, delay: u64, entry: T) -> Result<u64, T> {
        match self.clocks.get_mut(c.0) {
            Some(clock) => Ok(clock.add_event(delay, entry)),
            None => Err(entry),
        }
    }

    pub fn remove_event(&mut self, c: ClockId, id: u64) -> Option<T> {
        self.clocks.get_mut(c.0)?.remove(id)
    }

    /// Advance every quiescent clock once, in creation-slot order. Returns
    /// true if any clock fired.
    pub fn advance_all(&mut self, mut resume: impl FnMut(ClockId, u64, T)) -> bool {
        let mut progressed = false;
        for (idx, clock) in self.clocks.iter_mut() {
            if !clock.is_quiescent() {
                continue;
            }
            progressed |= clock.advance(|id, entry| resume(ClockId(idx), id, entry));
        }
        progressed
    }

    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }
}
