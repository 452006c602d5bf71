//! Deadline queue for logical clock events
//!
//! A binary heap of `(deadline, tie, id)` keys next to a map from event id
//! to its entry. Cancelling an event only touches the map; the orphaned heap
//! key is skipped the next time it reaches the top.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

type Key = Reverse<(u64, u64, u64)>;

struct Entry<M> {
    deadline: u64,
    tie: u64,
    meta: M,
}

pub struct MinPq<M> {
    heap: BinaryHeap<Key>,
    entries: HashMap<u64, Entry<M>>,
}

impl<M> Default for MinPq<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MinPq<M> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            entries: HashMap::new(),
        }
    }

    /// Schedule event `id`. An id that is already queued is refused.
    pub fn add(&mut self, id: u64, deadline: u64, tie: u64, meta: M) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, Entry { deadline, tie, meta });
        self.heap.push(Reverse((deadline, tie, id)));
        true
    }

    /// Cancel event `id`.
    pub fn remove(&mut self, id: u64) -> Option<M> {
        self.entries.remove(&id).map(|e| e.meta)
    }

    pub fn peek_deadline(&mut self) -> Option<u64> {
        self.skip_cancelled();
        self.heap.peek().map(|Reverse((deadline, _, _))| *deadline)
    }

    /// Take the earliest event as `(id, deadline, tie, meta)`.
    pub fn pop(&mut self) -> Option<(u64, u64, u64, M)> {
        self.skip_cancelled();
        let Reverse((_, _, id)) = self.heap.pop()?;
        let e = self.entries.remove(&id)?;
        Some((id, e.deadline, e.tie, e.meta))
    }

    fn is_current(&self, key: &Key) -> bool {
        let Reverse((deadline, tie, id)) = key;
        self.entries
            .get(id)
            .is_some_and(|e| e.deadline == *deadline && e.tie == *tie)
    }

    fn skip_cancelled(&mut self) {
        while let Some(top) = self.heap.peek() {
            if self.is_current(top) {
                break;
            }
            self.heap.pop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeued_id_ignores_its_cancelled_key() {
        let mut pq = MinPq::new();
        pq.add(4, 1, 0, "early");
        pq.add(5, 3, 1, "other");
        assert_eq!(pq.remove(4), Some("early"));
        assert!(pq.add(4, 6, 2, "late"));

        assert_eq!(pq.peek_deadline(), Some(3));
        assert_eq!(pq.pop().map(|(id, ..)| id), Some(5));
        assert_eq!(pq.pop(), Some((4, 6, 2, "late")));
        assert_eq!(pq.pop(), None);
    }

    #[test]
    fn queued_id_is_refused() {
        let mut pq = MinPq::new();
        assert!(pq.add(1, 2, 0, 'a'));
        assert!(!pq.add(1, 0, 0, 'b'));
        assert_eq!(pq.len(), 1);
        assert_eq!(pq.pop().map(|(.., m)| m), Some('a'));
    }

    #[test]
    fn cancelling_everything_empties_the_queue() {
        let mut pq = MinPq::new();
        for id in 0..5 {
            pq.add(id, id, id, ());
        }
        for id in 0..5 {
            assert!(pq.remove(id).is_some());
        }
        assert!(pq.is_empty());
        assert_eq!(pq.peek_deadline(), None);
        assert!(pq.remove(0).is_none());
    }
}
