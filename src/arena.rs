//! Generational arena for runtime records
//!
//! Groups, regions and logical clocks live in arenas and refer to each
//! other through copyable indices instead of shared pointers. A removed
//! slot bumps its generation, so a stale index held by a token simply
//! stops resolving instead of aliasing a newer record.

use std::fmt;

/// Index into an [`Arena`], tagged with the slot generation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArenaIndex {
    index: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Raw slot number.
    pub fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: Option<u32>, generation: u32 },
}

/// Vec-backed arena with a free list.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value and return its index. Vacant slots are reused first.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(free) = self.free_head {
            let slot = &mut self.slots[free as usize];
            if let Slot::Vacant {
                next_free,
                generation,
            } = *slot
            {
                self.free_head = next_free;
                *slot = Slot::Occupied { value, generation };
                return ArenaIndex {
                    index: free,
                    generation,
                };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        ArenaIndex {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, idx: ArenaIndex) -> Option<&T> {
        match self.slots.get(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, idx: ArenaIndex) -> Option<&mut T> {
        match self.slots.get_mut(idx.index as usize)? {
            Slot::Occupied { value, generation } if *generation == idx.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, idx: ArenaIndex) -> bool {
        self.get(idx).is_some()
    }

    /// Remove the value at `idx`. Returns `None` for stale or vacant indices.
    pub fn remove(&mut self, idx: ArenaIndex) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == idx.generation => {}
            _ => return None,
        }
        let next_generation = idx.generation.wrapping_add(1);
        let old = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
                generation: next_generation,
            },
        );
        self.free_head = Some(idx.index);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// Iterate occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { value, generation } => Some((
                    ArenaIndex {
                        index: i as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }

    /// Mutable iteration in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ArenaIndex, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied { value, generation } => Some((
                    ArenaIndex {
                        index: i as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn stale_index_does_not_alias_reused_slot() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        arena.remove(a);
        let c = arena.insert(3);
        assert_eq!(a.index(), c.index());
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(c), Some(&3));
        assert_eq!(arena.remove(a), None);
    }

    #[test]
    fn iteration_is_in_slot_order() {
        let mut arena = Arena::new();
        let ids: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(ids[1]);
        let seen: Vec<i32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(seen, vec![0, 2, 3]);
    }
}
