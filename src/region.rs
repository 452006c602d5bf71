//! Region table
//!
//! A region counts its inhabitants: the tokens currently inside it and its
//! open child regions. When the count drops back to zero the region closes,
//! which the engine turns into the region kind's completion action and then
//! a removal from the parent. Regions track completion only; cancellation
//! belongs to groups.

use crate::arena::{Arena, ArenaIndex};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegionId(ArenaIndex);

struct Record<K> {
    parent: Option<RegionId>,
    inhabitants: usize,
    kind: K,
}

/// A region that has just closed. Its record is gone from the table.
#[derive(Debug)]
pub struct Closed<K> {
    pub id: RegionId,
    pub parent: Option<RegionId>,
    pub kind: K,
}

pub struct RegionTable<K> {
    regions: Arena<Record<K>>,
}

impl<K> Default for RegionTable<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> RegionTable<K> {
    pub fn new() -> Self {
        Self {
            regions: Arena::new(),
        }
    }

    /// Open a region. A child counts as one inhabitant of its parent until
    /// it closes. Returns `None` if the parent is already closed.
    pub fn open(&mut self, parent: Option<RegionId>, kind: K) -> Option<RegionId> {
        if let Some(p) = parent {
            if !self.add(p) {
                return None;
            }
        }
        Some(RegionId(self.regions.insert(Record {
            parent,
            inhabitants: 0,
            kind,
        })))
    }

    /// Count one more inhabitant. Returns false if the region is closed.
    pub fn add(&mut self, r: RegionId) -> bool {
        match self.regions.get_mut(r.0) {
            Some(rec) => {
                rec.inhabitants += 1;
                true
            }
            None => false,
        }
    }

    /// Count one inhabitant out. Closes the region when the count reaches
    /// zero; removing from an empty or closed region does nothing.
    pub fn remove(&mut self, r: RegionId) -> Option<Closed<K>> {
        let rec = self.regions.get_mut(r.0)?;
        if rec.inhabitants == 0 {
            return None;
        }
        rec.inhabitants -= 1;
        if rec.inhabitants > 0 {
            return None;
        }
        self.close(r)
    }

    /// Close the region regardless of its count. Closing twice is a no-op.
    /// The parent is not decremented here; that is the caller's cascade.
    pub fn close(&mut self, r: RegionId) -> Option<Closed<K>> {
        let rec = self.regions.remove(r.0)?;
        Some(Closed {
            id: r,
            parent: rec.parent,
            kind: rec.kind,
        })
    }

    pub fn is_open(&self, r: RegionId) -> bool {
        self.regions.contains(r.0)
    }

    pub fn inhabitants(&self, r: RegionId) -> Option<usize> {
        self.regions.get(r.0).map(|rec| rec.inhabitants)
    }

    pub fn parent(&self, r: RegionId) -> Option<RegionId> {
        self.regions.get(r.0).and_then(|rec| rec.parent)
    }

    pub fn kind(&self, r: RegionId) -> Option<&K> {
        self.regions.get(r.0).map(|rec| &rec.kind)
    }

    pub fn kind_mut(&mut self, r: RegionId) -> Option<&mut K> {
        self.regions.get_mut(r.0).map(|rec| &mut rec.kind)
    }

    /// Number of open regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closes_when_last_inhabitant_leaves() {
        let mut t = RegionTable::new();
        let r = t.open(None, "root").unwrap();
        t.add(r);
        t.add(r);
        assert!(t.remove(r).is_none());
        let closed = t.remove(r).unwrap();
        assert_eq!(closed.id, r);
        assert_eq!(closed.kind, "root");
        assert!(!t.is_open(r));
        assert!(t.remove(r).is_none());
        assert!(!t.add(r));
    }

    #[test]
    fn empty_region_does_not_close_on_remove() {
        let mut t: RegionTable<()> = RegionTable::new();
        let r = t.open(None, ()).unwrap();
        assert!(t.remove(r).is_none());
        assert!(t.is_open(r));
        assert_eq!(t.inhabitants(r), Some(0));
    }

    #[test]
    fn child_counts_in_parent() {
        let mut t = RegionTable::new();
        let root = t.open(None, 0).unwrap();
        t.add(root);
        let child = t.open(Some(root), 1).unwrap();
        assert_eq!(t.inhabitants(root), Some(2));
        t.add(child);

        // Token leaves the root directly; child still holds it open.
        assert!(t.remove(root).is_none());
        let closed = t.remove(child).unwrap();
        assert_eq!(closed.parent, Some(root));
        let closed_root = t.remove(closed.parent.unwrap()).unwrap();
        assert_eq!(closed_root.kind, 0);
        assert!(t.is_empty());
    }

    #[test]
    fn force_close_is_idempotent() {
        let mut t = RegionTable::new();
        let r = t.open(None, ()).unwrap();
        t.add(r);
        assert!(t.close(r).is_some());
        assert!(t.close(r).is_none());
        assert!(t.open(Some(r), ()).is_none());
    }

    mod proptest_region {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Count mirrors a model counter; it never goes negative and the
            /// region closes exactly once, at the removal that reaches zero.
            #[test]
            fn count_matches_model(ops in proptest::collection::vec(any::<bool>(), 1..64)) {
                let mut t: RegionTable<()> = RegionTable::new();
                let r = t.open(None, ()).unwrap();
                let mut model: usize = 0;
                let mut ever_positive = false;
                let mut closes = 0;
                for add in ops {
                    if closes > 0 {
                        prop_assert!(!t.add(r));
                        prop_assert!(t.remove(r).is_none());
                        continue;
                    }
                    if add {
                        prop_assert!(t.add(r));
                        model += 1;
                        ever_positive = true;
                    } else {
                        let closed = t.remove(r);
                        if model == 0 {
                            prop_assert!(closed.is_none());
                        } else {
                            model -= 1;
                            prop_assert_eq!(closed.is_some(), model == 0);
                            if closed.is_some() {
                                prop_assert!(ever_positive);
                                closes += 1;
                            }
                        }
                    }
                    if closes == 0 {
                        prop_assert_eq!(t.inhabitants(r), Some(model));
                    }
                }
                prop_assert!(closes <= 1);
            }
        }
    }
}
